//! Beacon simulator
//!
//! Stands in for real beacon hardware during development. A virtual tag
//! random-walks through a box-shaped house; on every tick each simulated
//! beacon publishes the RSSI the path-loss model predicts for its distance
//! to the tag, plus Gaussian noise, on `beacons/<id>/readings`.
//!
//! The simulator talks to the broker over plain TCP using the same packet
//! codec the broker uses.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::locate::PathLossModel;
use crate::model::{BeaconReading, Location};
use crate::transport::codec::{self, MAX_REMAINING_LENGTH};
use crate::transport::packet::{CONNACK_ACCEPTED, Connect, DISCONNECT, encode_publish};
use crate::utils::error::SimulatorError;

pub fn feet_to_meters(feet: f64) -> f64 {
    feet * 0.3048
}

/// A fixed beacon. The layout file is a JSON array of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimBeacon {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SimBeacon {
    pub fn location(&self) -> Location {
        Location::new(self.x, self.y, self.z)
    }
}

/// Extent of the simulated house, in meters, with the origin in a corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct House {
    pub width: f64,
    pub depth: f64,
    pub height: f64,
}

impl Default for House {
    /// 40 ft x 25 ft, three 10 ft stories.
    fn default() -> Self {
        Self {
            width: feet_to_meters(40.0),
            depth: feet_to_meters(25.0),
            height: feet_to_meters(30.0),
        }
    }
}

impl House {
    pub fn clamp(&self, p: Location) -> Location {
        Location::new(
            p.x.clamp(0.0, self.width),
            p.y.clamp(0.0, self.depth),
            p.z.clamp(0.0, self.height),
        )
    }

    pub fn random_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Location {
        Location::new(
            rng.gen_range(0.0..=self.width),
            rng.gen_range(0.0..=self.depth),
            rng.gen_range(0.0..=self.height),
        )
    }

    /// One beacon in each corner of each of three floors, at mid-floor height.
    pub fn default_layout(&self) -> Vec<SimBeacon> {
        let floor = self.height / 3.0;
        let levels = [floor / 2.0, 3.0 * floor / 2.0, 5.0 * floor / 2.0];
        let corners = [
            (0.0, 0.0),
            (self.width, 0.0),
            (0.0, self.depth),
            (self.width, self.depth),
        ];
        levels
            .iter()
            .flat_map(|&z| corners.iter().map(move |&(x, y)| (x, y, z)))
            .enumerate()
            .map(|(i, (x, y, z))| SimBeacon {
                id: format!("sim-beacon-{}", i + 1),
                x,
                y,
                z,
            })
            .collect()
    }
}

/// Read a beacon layout (JSON array of `{id, x, y, z}`).
pub fn load_layout(path: &Path) -> Result<Vec<SimBeacon>, SimulatorError> {
    let raw = std::fs::read(path).map_err(SimulatorError::Layout)?;
    Ok(serde_json::from_slice(&raw)?)
}

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub broker: String,
    pub tag_id: String,
    pub house: House,
    /// Empty means `House::default_layout`.
    pub beacons: Vec<SimBeacon>,
    /// Starting tag position; random when `None`.
    pub start: Option<Location>,
    pub stationary: bool,
    /// Standard deviation of each axis step, in meters.
    pub tag_step: f64,
    pub interval: Duration,
    pub model: PathLossModel,
    /// Standard deviation of the RSSI noise, in dB.
    pub noise_std: f64,
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            broker: "127.0.0.1:1883".to_string(),
            tag_id: "cat-collar-1".to_string(),
            house: House::default(),
            beacons: Vec::new(),
            start: None,
            stationary: false,
            tag_step: 0.6,
            interval: Duration::from_secs(2),
            model: PathLossModel::default(),
            noise_std: 2.0,
            seed: None,
        }
    }
}

#[derive(Debug)]
pub struct BeaconSimulator {
    config: SimulatorConfig,
    beacons: Vec<SimBeacon>,
    tag: Location,
    step_dist: Normal<f64>,
    noise_dist: Normal<f64>,
    rng: StdRng,
}

impl BeaconSimulator {
    /// Fails when `tag_step` or `noise_std` is negative or not finite.
    pub fn new(config: SimulatorConfig) -> Result<Self, SimulatorError> {
        let step_dist = Normal::new(0.0, config.tag_step)?;
        let noise_dist = Normal::new(0.0, config.noise_std)?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let beacons = if config.beacons.is_empty() {
            config.house.default_layout()
        } else {
            config.beacons.clone()
        };
        let tag = match config.start {
            Some(start) => config.house.clamp(start),
            None => config.house.random_point(&mut rng),
        };
        Ok(Self {
            config,
            beacons,
            tag,
            step_dist,
            noise_dist,
            rng,
        })
    }

    pub fn tag_position(&self) -> Location {
        self.tag
    }

    /// Move the tag by a Gaussian step on each axis, staying inside the house.
    pub fn step(&mut self) {
        if self.config.stationary {
            return;
        }
        let moved = Location::new(
            self.tag.x + self.step_dist.sample(&mut self.rng),
            self.tag.y + self.step_dist.sample(&mut self.rng),
            self.tag.z + self.step_dist.sample(&mut self.rng),
        );
        self.tag = self.config.house.clamp(moved);
    }

    /// One reading per beacon for the current tag position.
    pub fn readings(&mut self, now: DateTime<Utc>) -> Vec<BeaconReading> {
        let tag = self.tag;
        let model = self.config.model;
        let noisy = self.config.noise_std > 0.0;

        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), "simulator".to_string());
        metadata.insert("tag_x".to_string(), format!("{:.2}", tag.x));
        metadata.insert("tag_y".to_string(), format!("{:.2}", tag.y));
        metadata.insert("tag_z".to_string(), format!("{:.2}", tag.z));
        metadata.insert("tag_stationary".to_string(), self.config.stationary.to_string());

        let mut out = Vec::with_capacity(self.beacons.len());
        for beacon in &self.beacons {
            let location = beacon.location();
            let mut rssi = model.rssi_at(location.distance_to(&tag));
            if noisy {
                rssi += self.noise_dist.sample(&mut self.rng);
            }
            out.push(BeaconReading {
                beacon_id: beacon.id.clone(),
                tag_id: self.config.tag_id.clone(),
                rssi: rssi.round() as i32,
                timestamp: now,
                beacon_location: location,
                metadata: metadata.clone(),
            });
        }
        out
    }

    /// Connect, publish a round immediately and then every `interval` until
    /// `shutdown` flips, then send DISCONNECT.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SimulatorError> {
        let client_id = format!("catlocator-sim-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
        let mut client = SimulatorClient::connect(&self.config.broker, &client_id).await?;
        info!(broker = %self.config.broker, client = %client_id, beacons = self.beacons.len(), "simulator connected");

        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.step();
                    for reading in self.readings(Utc::now()) {
                        client.publish_reading(&reading).await?;
                    }
                }
            }
        }

        info!("simulator disconnecting");
        client.disconnect().await
    }
}

/// Minimal publish-only MQTT client.
#[derive(Debug)]
pub struct SimulatorClient {
    stream: TcpStream,
}

impl SimulatorClient {
    pub async fn connect(addr: &str, client_id: &str) -> Result<Self, SimulatorError> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|source| SimulatorError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        stream
            .write_all(&Connect::new(client_id).encode()?)
            .await
            .map_err(codec_io)?;

        let reply = codec::read_packet(&mut stream, MAX_REMAINING_LENGTH)
            .await?
            .ok_or(SimulatorError::Closed)?;
        let reply = reply.encode()?;
        if reply != CONNACK_ACCEPTED {
            return Err(SimulatorError::Refused(reply));
        }
        Ok(Self { stream })
    }

    pub async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SimulatorError> {
        let packet = encode_publish(topic, payload)?;
        self.stream.write_all(&packet).await.map_err(codec_io)
    }

    pub async fn publish_reading(&mut self, reading: &BeaconReading) -> Result<(), SimulatorError> {
        let topic = format!("beacons/{}/readings", reading.beacon_id);
        let payload = serde_json::to_vec(reading)?;
        self.publish(&topic, &payload).await?;
        debug!(topic = %topic, rssi = reading.rssi, "published reading");
        Ok(())
    }

    pub async fn disconnect(mut self) -> Result<(), SimulatorError> {
        self.stream.write_all(&DISCONNECT).await.map_err(codec_io)?;
        self.stream.shutdown().await.map_err(codec_io)
    }
}

fn codec_io(e: std::io::Error) -> SimulatorError {
    SimulatorError::Protocol(e.into())
}

#[cfg(test)]
mod tests;
