//! Ingestion router
//!
//! `IngestionRouter` is the broker's publish handler. It classifies every
//! inbound publish by topic, decodes and validates the payload and hands the
//! result to the store. Nothing here ever fails back into the network layer:
//! a rejected payload or a failed store call is logged and, where possible,
//! recorded as an `IngestionError`.
//!
//! Store calls run on the blocking pool under `store_timeout`, so a stalled
//! store delays one connection by at most that long per message.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{debug, error, info, warn};

use super::payload::{decode_beacon_reading, decode_training_command};
use crate::broker::{PublishHandler, PublishMessage};
use crate::config::IngestSettings;
use crate::model::{IngestionError, StoredBeaconReading};
use crate::persistence::Store;
use crate::utils::error::{IngestError, StoreError};

pub const BEACON_TOPIC_PREFIX: &str = "beacons/";
pub const TRAINING_COMMAND_TOPIC: &str = "catlocator/training/commands";

/// Beacon id recorded with training command failures.
const TRAINING_ERROR_SOURCE: &str = "training";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    BeaconReading,
    TrainingCommand,
    Ignored,
}

/// Dispatch on topic prefix. Unknown families are ignored so new topics can
/// appear without touching the router.
pub fn classify(topic: &str) -> TopicKind {
    if topic.starts_with(BEACON_TOPIC_PREFIX) {
        TopicKind::BeaconReading
    } else if topic.starts_with(TRAINING_COMMAND_TOPIC) {
        TopicKind::TrainingCommand
    } else {
        TopicKind::Ignored
    }
}

/// What happened to one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored,
    Rejected,
    Ignored,
}

/// Keep at most `max` characters. `max == 0` disables truncation.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if max == 0 {
        return s.to_string();
    }
    match s.char_indices().nth(max) {
        Some((cut, _)) => s[..cut].to_string(),
        None => s.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct IngestionRouter {
    store: Arc<dyn Store>,
    store_timeout: Duration,
    max_error_payload: usize,
}

impl IngestionRouter {
    pub fn new(store: Arc<dyn Store>, settings: &IngestSettings) -> Self {
        Self::with_limits(
            store,
            Duration::from_millis(settings.store_timeout_ms),
            settings.max_error_payload,
        )
    }

    pub fn with_limits(store: Arc<dyn Store>, store_timeout: Duration, max_error_payload: usize) -> Self {
        Self {
            store,
            store_timeout,
            max_error_payload,
        }
    }

    pub async fn route(&self, message: &PublishMessage) -> IngestOutcome {
        match classify(&message.topic) {
            TopicKind::BeaconReading => self.ingest_beacon_reading(message).await,
            TopicKind::TrainingCommand => self.ingest_training_command(message).await,
            TopicKind::Ignored => {
                debug!(topic = %message.topic, client = %message.client_id, "topic ignored");
                IngestOutcome::Ignored
            }
        }
    }

    async fn ingest_beacon_reading(&self, message: &PublishMessage) -> IngestOutcome {
        let now = Utc::now();
        let reading = match decode_beacon_reading(&message.topic, &message.payload, now) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "beacon reading rejected");
                let beacon_id = match &e {
                    IngestError::MissingIdentifiers { beacon_id, .. } => beacon_id.as_str(),
                    _ => "",
                };
                self.record_error(beacon_id, &message.payload, &e).await;
                return IngestOutcome::Rejected;
            }
        };

        let stored = StoredBeaconReading {
            reading,
            received_at: now,
        };
        let record = stored.clone();
        if let Err(e) = self
            .call_store(move |store| store.insert_reading(&record))
            .await
        {
            let reading = &stored.reading;
            error!(beacon = %reading.beacon_id, tag = %reading.tag_id, error = %e, "failed to persist beacon reading");
            self.record_error(&reading.beacon_id, &message.payload, &e.into())
                .await;
            return IngestOutcome::Rejected;
        }

        let reading = &stored.reading;
        info!(beacon = %reading.beacon_id, tag = %reading.tag_id, rssi = reading.rssi, "ingested beacon reading");
        IngestOutcome::Stored
    }

    async fn ingest_training_command(&self, message: &PublishMessage) -> IngestOutcome {
        let command = match decode_training_command(&message.payload, Utc::now()) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "training command rejected");
                self.record_error(TRAINING_ERROR_SOURCE, &message.payload, &e)
                    .await;
                return IngestOutcome::Rejected;
            }
        };

        let record = command.clone();
        if let Err(e) = self
            .call_store(move |store| store.insert_training_command(&record))
            .await
        {
            error!(room = %command.room, command = %command.command, error = %e, "failed to persist training command");
            self.record_error(TRAINING_ERROR_SOURCE, &message.payload, &e.into())
                .await;
            return IngestOutcome::Rejected;
        }

        info!(room = %command.room, command = %command.command, source = %command.source, "ingested training command");
        IngestOutcome::Stored
    }

    async fn record_error(&self, beacon_id: &str, payload: &[u8], cause: &IngestError) {
        let entry = IngestionError {
            beacon_id: beacon_id.to_string(),
            payload: truncate_chars(&String::from_utf8_lossy(payload), self.max_error_payload),
            error: cause.to_string(),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self
            .call_store(move |store| store.insert_ingestion_error(&entry))
            .await
        {
            error!(error = %e, "failed to persist ingestion error");
        }
    }

    /// Run a synchronous store call on the blocking pool, giving up after
    /// `store_timeout`. The call itself may still finish in the background.
    async fn call_store<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Store) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        let task = tokio::task::spawn_blocking(move || op(store.as_ref()));
        match tokio::time::timeout(self.store_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StoreError::Task(join.to_string())),
            Err(_) => Err(StoreError::Timeout(self.store_timeout)),
        }
    }
}

impl PublishHandler for IngestionRouter {
    fn handle(&self, message: PublishMessage) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.route(&message).await;
        })
    }
}
