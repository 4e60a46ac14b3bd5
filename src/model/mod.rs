//! The `model` module holds the records that flow from the ingestion router
//! into the store and from the store into the estimator.
//!
//! Field names match the JSON the beacons publish, so the same types are used
//! for decoding, persistence and the estimation report.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point in the building, in meters. Missing axes decode as 0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: &Location) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// One RSSI observation of a tag by a fixed beacon. `beacon_id` and `tag_id`
/// are never empty once a reading has passed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconReading {
    pub beacon_id: String,
    pub tag_id: String,
    pub rssi: i32,
    pub timestamp: DateTime<Utc>,
    pub beacon_location: Location,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// A persisted reading plus the time the server ingested it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBeaconReading {
    #[serde(flatten)]
    pub reading: BeaconReading,
    pub received_at: DateTime<Utc>,
}

/// Audit record for a publish that failed decoding, validation or storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionError {
    /// Empty when the payload never yielded a beacon id.
    pub beacon_id: String,
    pub payload: String,
    pub error: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingAction {
    Start,
    Stop,
}

impl TrainingAction {
    /// Accepts exactly "start" or "stop" after trimming and lowercasing.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for TrainingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A labeling session marker published by the training app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingCommand {
    pub room: String,
    pub command: TrainingAction,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    pub received_at: DateTime<Utc>,
}

/// Operator-configured room: a center point and a radius in meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDefinition {
    pub name: String,
    pub center: Location,
    pub radius: f64,
}
