//! The broker: a hand-written MQTT 3.1.1 server for QoS 0 publish/subscribe.
//!
//! Documented limitations: no QoS 1/2, retained messages, wildcard
//! subscriptions, TLS or authentication, and no keepalive enforcement.

pub mod engine;
pub mod message;
pub mod topic;

pub use engine::Broker;
pub use message::{NoopHandler, PublishHandler, PublishMessage};
