//! The `error` module defines the error types used across `catlocator`.
//!
//! Each layer gets its own enum so callers can tell a protocol violation
//! (close the connection) from a store failure (record and carry on) without
//! string matching.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// MQTT wire and session-state violations. Any of these closes the offending
/// connection; none of them affects the broker or other clients.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed remaining length")]
    MalformedRemainingLength,

    #[error("remaining length {0} exceeds the protocol maximum")]
    RemainingLengthTooLarge(usize),

    #[error("packet of {size} bytes exceeds the {limit} byte limit")]
    PacketTooLarge { size: usize, limit: usize },

    #[error("packet truncated while reading {0}")]
    Truncated(&'static str),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("{0} longer than 65535 bytes")]
    StringTooLong(&'static str),

    #[error("unsupported protocol {0:?}")]
    UnsupportedProtocol(String),

    #[error("unsupported protocol level {0}")]
    UnsupportedProtocolLevel(u8),

    #[error("unsupported connect flags {0:08b}")]
    UnsupportedConnectFlags(u8),

    #[error("unsupported qos {0}")]
    UnsupportedQos(u8),

    #[error("missing qos byte for topic {0:?}")]
    MissingQos(String),

    #[error("subscribe packet carries no topics")]
    EmptySubscribe,

    #[error("unsupported packet type {0}")]
    UnsupportedPacketType(u8),

    #[error("expected CONNECT, got packet type {0}")]
    ExpectedConnect(u8),

    #[error("duplicate CONNECT on an established session")]
    DuplicateConnect,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced by the broker lifecycle rather than by a single connection.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("mqtt listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("mqtt accept: {0}")]
    Accept(#[source] io::Error),

    #[error("broker already started")]
    AlreadyStarted,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("broker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failures of the Persistence Port.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),

    #[error("encode record: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store task failed: {0}")]
    Task(String),
}

/// Why an inbound publish did not become a persisted record. The `Display`
/// text is what ends up in the ingestion error audit trail.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("missing required identifiers (beacon_id={beacon_id:?} tag_id={tag_id:?})")]
    MissingIdentifiers { beacon_id: String, tag_id: String },

    #[error("invalid training command (room={room:?} command={command:?})")]
    InvalidTrainingCommand { room: String, command: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures while building or publishing an estimation report.
#[derive(Debug, Error)]
pub enum LocateError {
    #[error("load readings: {0}")]
    Store(#[from] StoreError),

    #[error("encode report: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("estimation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failures of the beacon simulator's MQTT client.
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("broker refused CONNECT (reply {0:02x?})")]
    Refused(Vec<u8>),

    #[error("broker closed the connection")]
    Closed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("encode reading: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("read beacon layout: {0}")]
    Layout(#[source] io::Error),

    #[error("invalid standard deviation: {0}")]
    Distribution(#[from] rand_distr::NormalError),
}
