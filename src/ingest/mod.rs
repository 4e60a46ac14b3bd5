//! The `ingest` module turns raw publishes into store records.
//!
//! - `payload`: pure decoders/validators for beacon readings and training commands.
//! - `router`: topic classification, bounded store calls and error recording.

pub mod payload;
pub mod router;

pub use router::{IngestOutcome, IngestionRouter, TopicKind, classify};
