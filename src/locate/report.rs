//! Estimation surface
//!
//! `locate` builds an `EstimationReport` from the store on demand. The
//! `LocationPublisher` does the same on a fixed interval and publishes the
//! JSON through the broker for any subscribed dashboard.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::estimator::{LocationEstimator, TriangulationResult};
use super::rooms::RoomMatch;
use crate::broker::Broker;
use crate::config::EstimatorSettings;
use crate::persistence::Store;
use crate::utils::error::LocateError;

/// JSON shape of a triangulation. `x`, `y` and `z` are null when no location
/// could be computed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriangulationView {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub confidence: f64,
    pub residual: f64,
    pub beacons: usize,
    pub message: String,
    pub rooms: Vec<RoomMatch>,
}

impl From<TriangulationResult> for TriangulationView {
    fn from(result: TriangulationResult) -> Self {
        Self {
            x: result.location.map(|l| l.x),
            y: result.location.map(|l| l.y),
            z: result.location.map(|l| l.z),
            confidence: result.confidence,
            residual: result.residual,
            beacons: result.beacon_count,
            message: result.message,
            rooms: result.rooms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimationReport {
    pub tag_id: Option<String>,
    pub triangulation: TriangulationView,
    pub updated_at: DateTime<Utc>,
}

/// Estimate the tag position from the newest reading per beacon.
///
/// Room definitions that fail to load are logged and treated as empty; the
/// estimate itself does not depend on them.
pub fn locate(
    store: &dyn Store,
    estimator: &LocationEstimator,
    tag: Option<&str>,
) -> Result<EstimationReport, LocateError> {
    let rooms = store.room_definitions().unwrap_or_else(|e| {
        warn!(error = %e, "failed to load room definitions");
        Vec::new()
    });
    let latest = store.latest_readings(tag)?;
    let result = estimator.estimate(latest.iter().map(|s| &s.reading), &rooms);

    Ok(EstimationReport {
        tag_id: tag.map(str::to_string),
        triangulation: result.into(),
        updated_at: Utc::now(),
    })
}

/// Periodically publishes the current estimate on `topic`.
#[derive(Debug)]
pub struct LocationPublisher {
    broker: Arc<Broker>,
    store: Arc<dyn Store>,
    estimator: LocationEstimator,
    tag: Option<String>,
    topic: String,
    interval: Duration,
}

impl LocationPublisher {
    pub fn new(broker: Arc<Broker>, store: Arc<dyn Store>, settings: &EstimatorSettings) -> Self {
        Self {
            broker,
            store,
            estimator: LocationEstimator::from_settings(settings),
            tag: settings.tag_id.clone(),
            topic: settings.location_topic.clone(),
            interval: Duration::from_secs(settings.publish_interval_secs),
        }
    }

    /// Compute one report and publish it. Returns the number of subscribers
    /// it reached.
    pub async fn publish_once(&self) -> Result<usize, LocateError> {
        let store = self.store.clone();
        let estimator = self.estimator;
        let tag = self.tag.clone();
        let report =
            tokio::task::spawn_blocking(move || locate(store.as_ref(), &estimator, tag.as_deref()))
                .await??;

        let payload = serde_json::to_vec(&report)?;
        let delivered = self.broker.publish(&self.topic, &payload).await?;
        debug!(topic = %self.topic, delivered, beacons = report.triangulation.beacons, "published location");
        Ok(delivered)
    }

    /// Publish every `interval` until `shutdown` flips to true or its sender
    /// is dropped. A zero interval returns immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if self.interval.is_zero() {
            return;
        }
        info!(topic = %self.topic, interval = ?self.interval, "location publisher started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.publish_once().await {
                        warn!(topic = %self.topic, error = %e, "location publish failed");
                    }
                }
            }
        }
        info!("location publisher stopped");
    }
}
