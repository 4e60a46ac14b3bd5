//! The `persistence` module is the Persistence Port: a narrow store contract
//! for beacon readings, ingestion errors, training commands and room
//! definitions.
//!
//! The ingestion router and the estimator only see the `Store` trait. The
//! shipped implementation, `SledStore`, keeps everything in an embedded
//! `sled` database.
//!
//! `Store` methods are synchronous; async callers run them on the blocking
//! pool. Implementations must tolerate concurrent calls from many connection
//! tasks.

pub mod sled_store;

use crate::model::{IngestionError, RoomDefinition, StoredBeaconReading, TrainingCommand};
use crate::utils::error::StoreError;

pub use sled_store::SledStore;

/// Limit applied by the `recent_*` queries when the caller passes 0.
pub const DEFAULT_RECENT_LIMIT: usize = 50;

pub trait Store: Send + Sync + std::fmt::Debug {
    /// Append a validated reading and update the per-(beacon, tag) latest view.
    fn insert_reading(&self, reading: &StoredBeaconReading) -> Result<(), StoreError>;

    fn insert_ingestion_error(&self, error: &IngestionError) -> Result<(), StoreError>;

    fn insert_training_command(&self, command: &TrainingCommand) -> Result<(), StoreError>;

    /// Newest reading per beacon, ordered by beacon id. With a tag only that
    /// tag's readings are considered; without one the newest reading per
    /// beacon wins regardless of tag.
    fn latest_readings(&self, tag: Option<&str>) -> Result<Vec<StoredBeaconReading>, StoreError>;

    /// Most recently ingested readings, newest first.
    fn recent_readings(&self, limit: usize) -> Result<Vec<StoredBeaconReading>, StoreError>;

    fn recent_ingestion_errors(&self, limit: usize) -> Result<Vec<IngestionError>, StoreError>;

    fn recent_training_commands(&self, limit: usize) -> Result<Vec<TrainingCommand>, StoreError>;

    /// Configured rooms; empty when none were ever saved.
    fn room_definitions(&self) -> Result<Vec<RoomDefinition>, StoreError>;

    fn save_room_definitions(&self, rooms: &[RoomDefinition]) -> Result<(), StoreError>;

    /// Drop all telemetry, errors and commands. Room definitions survive.
    fn wipe(&self) -> Result<(), StoreError>;
}

pub(crate) fn effective_limit(limit: usize) -> usize {
    if limit == 0 { DEFAULT_RECENT_LIMIT } else { limit }
}

#[cfg(test)]
mod tests;
