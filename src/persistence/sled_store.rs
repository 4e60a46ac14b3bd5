use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use sled::{Db, Tree};
use tracing::{debug, warn};

use super::{Store, effective_limit};
use crate::model::{IngestionError, RoomDefinition, StoredBeaconReading, TrainingCommand};
use crate::utils::error::StoreError;

const READINGS_TREE: &str = "beacon_readings";
const LATEST_TREE: &str = "latest_readings";
const ERRORS_TREE: &str = "ingestion_errors";
const COMMANDS_TREE: &str = "training_commands";
const APP_CONFIG_TREE: &str = "app_config";
const ROOM_DEFINITIONS_KEY: &str = "room_definitions";

/// `Store` backed by sled.
///
/// Append-only records are keyed by `Db::generate_id`, which is monotonic, so
/// tree order is ingestion order and retention trims from the front. The
/// latest view is keyed `beacon_id \0 tag_id`.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    readings: Tree,
    latest: Tree,
    errors: Tree,
    commands: Tree,
    app_config: Tree,
    max_readings: Option<usize>,
    reading_count: Arc<AtomicUsize>,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>, max_readings: Option<usize>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let readings = db.open_tree(READINGS_TREE)?;
        let reading_count = Arc::new(AtomicUsize::new(readings.len()));
        Ok(Self {
            latest: db.open_tree(LATEST_TREE)?,
            errors: db.open_tree(ERRORS_TREE)?,
            commands: db.open_tree(COMMANDS_TREE)?,
            app_config: db.open_tree(APP_CONFIG_TREE)?,
            readings,
            db,
            max_readings,
            reading_count,
        })
    }

    /// Block until everything written so far is durable.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn append<T: Serialize>(&self, tree: &Tree, record: &T) -> Result<(), StoreError> {
        let id = self.db.generate_id()?;
        tree.insert(id.to_be_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }

    fn enforce_retention(&self) -> Result<(), StoreError> {
        let Some(max) = self.max_readings else {
            return Ok(());
        };
        let mut trimmed = 0usize;
        while self.reading_count.load(Ordering::SeqCst) > max {
            if self.readings.pop_min()?.is_none() {
                self.reading_count.store(0, Ordering::SeqCst);
                break;
            }
            self.reading_count.fetch_sub(1, Ordering::SeqCst);
            trimmed += 1;
        }
        if trimmed > 0 {
            debug!(trimmed, max, "trimmed old beacon readings");
        }
        Ok(())
    }
}

fn latest_key(beacon_id: &str, tag_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(beacon_id.len() + tag_id.len() + 1);
    key.extend_from_slice(beacon_id.as_bytes());
    key.push(0);
    key.extend_from_slice(tag_id.as_bytes());
    key
}

/// Decode the newest `limit` records of an append-only tree. Records that no
/// longer decode are skipped.
fn newest<T: DeserializeOwned>(tree: &Tree, limit: usize) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for entry in tree.iter().rev() {
        if out.len() == limit {
            break;
        }
        let (_, value) = entry?;
        match serde_json::from_slice(&value) {
            Ok(record) => out.push(record),
            Err(e) => warn!(error = %e, "skipping undecodable record"),
        }
    }
    Ok(out)
}

impl Store for SledStore {
    fn insert_reading(&self, reading: &StoredBeaconReading) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(reading)?;
        let id = self.db.generate_id()?;
        self.readings.insert(id.to_be_bytes(), encoded.as_slice())?;
        self.reading_count.fetch_add(1, Ordering::SeqCst);

        // Keep whichever reading carries the later beacon timestamp, so an
        // out-of-order delivery never replaces a newer observation.
        let timestamp = reading.reading.timestamp;
        let key = latest_key(&reading.reading.beacon_id, &reading.reading.tag_id);
        self.latest.fetch_and_update(key, |current| match current {
            Some(old)
                if serde_json::from_slice::<StoredBeaconReading>(old)
                    .is_ok_and(|old| old.reading.timestamp > timestamp) =>
            {
                Some(old.to_vec())
            }
            _ => Some(encoded.clone()),
        })?;

        self.enforce_retention()
    }

    fn insert_ingestion_error(&self, error: &IngestionError) -> Result<(), StoreError> {
        self.append(&self.errors, error)
    }

    fn insert_training_command(&self, command: &TrainingCommand) -> Result<(), StoreError> {
        self.append(&self.commands, command)
    }

    fn latest_readings(&self, tag: Option<&str>) -> Result<Vec<StoredBeaconReading>, StoreError> {
        let mut per_beacon: BTreeMap<String, StoredBeaconReading> = BTreeMap::new();
        for entry in self.latest.iter() {
            let (_, value) = entry?;
            let stored: StoredBeaconReading = match serde_json::from_slice(&value) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable latest reading");
                    continue;
                }
            };
            if tag.is_some_and(|tag| stored.reading.tag_id != tag) {
                continue;
            }
            match per_beacon.get(&stored.reading.beacon_id) {
                Some(current) if current.reading.timestamp >= stored.reading.timestamp => {}
                _ => {
                    per_beacon.insert(stored.reading.beacon_id.clone(), stored);
                }
            }
        }
        Ok(per_beacon.into_values().collect())
    }

    fn recent_readings(&self, limit: usize) -> Result<Vec<StoredBeaconReading>, StoreError> {
        newest(&self.readings, effective_limit(limit))
    }

    fn recent_ingestion_errors(&self, limit: usize) -> Result<Vec<IngestionError>, StoreError> {
        newest(&self.errors, effective_limit(limit))
    }

    fn recent_training_commands(&self, limit: usize) -> Result<Vec<TrainingCommand>, StoreError> {
        newest(&self.commands, effective_limit(limit))
    }

    fn room_definitions(&self) -> Result<Vec<RoomDefinition>, StoreError> {
        match self.app_config.get(ROOM_DEFINITIONS_KEY)? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn save_room_definitions(&self, rooms: &[RoomDefinition]) -> Result<(), StoreError> {
        self.app_config
            .insert(ROOM_DEFINITIONS_KEY, serde_json::to_vec(rooms)?)?;
        Ok(())
    }

    fn wipe(&self) -> Result<(), StoreError> {
        self.readings.clear()?;
        self.reading_count.store(0, Ordering::SeqCst);
        self.latest.clear()?;
        self.errors.clear()?;
        self.commands.clear()?;
        self.db.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .field("max_readings", &self.max_readings)
            .finish()
    }
}
