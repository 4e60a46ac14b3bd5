//! The `client` module defines the representation of a connected MQTT client
//! inside the broker.
//!
//! It provides the `ClientSession` struct, which encapsulates the state of a
//! single connection: its write half, subscriptions, client id and closed flag.

pub mod session;
pub use session::{ClientSession, SessionId};
