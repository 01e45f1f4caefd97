//! logport-core - Shared types for the log ingestion pipeline
//!
//! Defines the `LogEntry` value type, its validation and deterministic-id
//! rules, and the error taxonomy that every other `logport` crate shares.

mod entry;
mod error;

pub use entry::{IncomingLogEntry, LogEntry, LogLevel, MetadataValue};
pub use error::IngestError;

/// Result alias used throughout the ingestion engine.
pub type IngestResult<T> = Result<T, IngestError>;
