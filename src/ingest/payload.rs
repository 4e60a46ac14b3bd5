//! Decoders and validators for the two payload families the router accepts.
//!
//! Both are pure: they take the raw bytes plus "now" and either return a
//! record ready for the store or the `IngestError` that explains the drop.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::{BeaconReading, Location, TrainingAction, TrainingCommand};
use crate::utils::error::IngestError;

/// Wire shape of `beacons/<id>/readings`. Everything is optional here so the
/// validation step, not serde, decides what is missing.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BeaconReadingPayload {
    beacon_id: String,
    tag_id: String,
    rssi: i32,
    timestamp: Option<serde_json::Value>,
    beacon_location: Location,
    metadata: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TrainingCommandPayload {
    room: String,
    command: String,
    timestamp: Option<serde_json::Value>,
    source: String,
}

/// Beacon id taken from `beacons/<id>/...`, if that segment exists.
pub fn beacon_id_from_topic(topic: &str) -> Option<&str> {
    topic.split('/').nth(1)
}

/// Parse an RFC 3339 timestamp, falling back to `now` when it is absent,
/// not a string or not parseable.
pub fn timestamp_or(value: Option<&serde_json::Value>, now: DateTime<Utc>) -> DateTime<Utc> {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(now)
}

/// Decode a beacon reading published on `topic`.
///
/// An empty `beacon_id` is taken from the topic. Both identifiers must be
/// non-empty afterwards. The error for a missing identifier carries whatever
/// beacon id was resolved so it can be recorded with the failure.
pub fn decode_beacon_reading(
    topic: &str,
    payload: &[u8],
    now: DateTime<Utc>,
) -> Result<BeaconReading, IngestError> {
    let raw: BeaconReadingPayload = serde_json::from_slice(payload)?;

    let mut beacon_id = raw.beacon_id.trim().to_string();
    if beacon_id.is_empty() {
        beacon_id = beacon_id_from_topic(topic).unwrap_or_default().to_string();
    }
    let tag_id = raw.tag_id.trim().to_string();

    if beacon_id.is_empty() || tag_id.is_empty() {
        return Err(IngestError::MissingIdentifiers { beacon_id, tag_id });
    }

    Ok(BeaconReading {
        beacon_id,
        tag_id,
        rssi: raw.rssi,
        timestamp: timestamp_or(raw.timestamp.as_ref(), now),
        beacon_location: raw.beacon_location,
        metadata: raw.metadata.unwrap_or_default(),
    })
}

/// Decode a training command. `room` is trimmed and must be non-empty;
/// `command` must be "start" or "stop" in any case.
pub fn decode_training_command(payload: &[u8], now: DateTime<Utc>) -> Result<TrainingCommand, IngestError> {
    let raw: TrainingCommandPayload = serde_json::from_slice(payload)?;

    let room = raw.room.trim().to_string();
    let action = TrainingAction::parse(&raw.command);
    let Some(command) = action.filter(|_| !room.is_empty()) else {
        return Err(IngestError::InvalidTrainingCommand {
            room,
            command: raw.command.trim().to_lowercase(),
        });
    };

    Ok(TrainingCommand {
        room,
        command,
        timestamp: timestamp_or(raw.timestamp.as_ref(), now),
        source: raw.source,
        received_at: now,
    })
}
