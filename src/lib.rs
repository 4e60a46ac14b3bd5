//! # CatLocator
//!
//! `catlocator` locates a Bluetooth tag (a pet collar) inside a building from
//! the RSSI reports of fixed beacons. It bundles its own minimal MQTT 3.1.1
//! broker, so beacons publish straight to this process.
//!
//! ## Core Modules
//!
//! - `transport`: MQTT framing and the typed control packets.
//! - `client`: per-connection session state held by the broker.
//! - `broker`: listener, session registry, publish handler and fan-out.
//! - `ingest`: turns publishes into validated store records.
//! - `locate`: path-loss ranging, multilateration and room ranking.
//! - `persistence`: the store contract and its sled implementation.
//! - `model`: records shared by ingestion, storage and estimation.
//! - `simulator`: a beacon simulator for development.
//! - `config`: layered settings.
//! - `utils`: error types and logging bootstrap.

pub mod broker;
pub mod client;
pub mod config;
pub mod ingest;
pub mod locate;
pub mod model;
pub mod persistence;
pub mod simulator;
pub mod transport;
pub mod utils;
