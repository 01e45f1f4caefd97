use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

const MAX_APP_ID_LEN: usize = 100;
const MAX_MESSAGE_LEN: usize = 10_000;
const MAX_SOURCE_LEN: usize = 255;

/// Severity of a log entry. Case-normalized on accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }
}

impl FromStr for LogLevel {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            "FATAL" => Ok(LogLevel::Fatal),
            other => Err(IngestError::Validation(format!(
                "unrecognized log level: {other}"
            ))),
        }
    }
}

/// A scalar value in a `LogEntry`'s free-form metadata map.
///
/// Deliberately not recursive: the metadata mapping is string -> scalar,
/// not string -> arbitrary JSON, so producers cannot smuggle unbounded
/// nested structures past the size checks in `LogEntry::validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
}

/// Raw, producer-supplied fields prior to validation and acceptance.
///
/// This is the shape deserialized directly off the wire by the (out of
/// scope) transport layer. `LogEntry::from_incoming` is the only way to
/// turn one of these into an accepted, immutable `LogEntry`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingLogEntry {
    pub app_id: String,
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetadataValue>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
}

/// A single log entry, immutable once accepted.
///
/// Owned exclusively by one of: the producer (before acceptance), the
/// coalescer's active buffer, the stream (as serialized bytes), a
/// worker's batch buffer, or the retry store -- never two at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub app_id: String,
    pub level: LogLevel,
    pub message: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: BTreeMap<String, MetadataValue>,
    pub trace_id: Option<String>,
    pub user_id: Option<String>,
    pub environment: Option<String>,
}

impl LogEntry {
    /// Validate and normalize a raw incoming entry into an accepted one.
    ///
    /// Returns `IngestError::Validation` synchronously, before the entry
    /// ever reaches the coalescer, per spec.
    pub fn from_incoming(raw: IncomingLogEntry) -> Result<Self, IngestError> {
        if raw.app_id.is_empty() || raw.app_id.len() > MAX_APP_ID_LEN {
            return Err(IngestError::Validation(format!(
                "app_id must be non-empty and at most {MAX_APP_ID_LEN} chars"
            )));
        }
        if raw.message.len() > MAX_MESSAGE_LEN {
            return Err(IngestError::Validation(format!(
                "message must be at most {MAX_MESSAGE_LEN} chars"
            )));
        }
        if raw.source.len() > MAX_SOURCE_LEN {
            return Err(IngestError::Validation(format!(
                "source must be at most {MAX_SOURCE_LEN} chars"
            )));
        }

        let level = LogLevel::from_str(&raw.level)?;
        let timestamp = raw.timestamp.unwrap_or_else(Utc::now);

        Ok(LogEntry {
            app_id: raw.app_id,
            level,
            message: raw.message,
            source: raw.source,
            timestamp,
            metadata: raw.metadata,
            trace_id: raw.trace_id,
            user_id: raw.user_id,
            environment: raw.environment,
        })
    }

    /// A deterministic id derived from the fields that define this
    /// entry's identity, used for idempotent downstream writes and as
    /// the key carried alongside the entry through the stream.
    ///
    /// Two `from_incoming` calls with identical app_id/timestamp/source/
    /// message/trace_id produce the same id -- this is what lets the
    /// analytics sink de-duplicate a redelivered (but not yet acked)
    /// batch after a worker crash.
    pub fn deterministic_id(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.app_id.as_bytes());
        hasher.update(&self.timestamp.timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
        hasher.update(self.source.as_bytes());
        hasher.update(self.message.as_bytes());
        if let Some(trace_id) = &self.trace_id {
            hasher.update(trace_id.as_bytes());
        }
        hex::encode(hasher.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(app_id: &str, level: &str, message: &str) -> IncomingLogEntry {
        IncomingLogEntry {
            app_id: app_id.to_string(),
            level: level.to_string(),
            message: message.to_string(),
            source: "test".to_string(),
            timestamp: Some(Utc::now()),
            metadata: BTreeMap::new(),
            trace_id: None,
            user_id: None,
            environment: None,
        }
    }

    #[test]
    fn rejects_empty_app_id() {
        let err = LogEntry::from_incoming(raw("", "INFO", "hi")).unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }

    #[test]
    fn rejects_oversized_app_id() {
        let oversized = "a".repeat(MAX_APP_ID_LEN + 1);
        let err = LogEntry::from_incoming(raw(&oversized, "INFO", "hi")).unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }

    #[test]
    fn normalizes_level_case() {
        let entry = LogEntry::from_incoming(raw("svc", "warn", "hi")).unwrap();
        assert_eq!(entry.level, LogLevel::Warn);
        let entry = LogEntry::from_incoming(raw("svc", "Error", "hi")).unwrap();
        assert_eq!(entry.level, LogLevel::Error);
    }

    #[test]
    fn rejects_unknown_level() {
        let err = LogEntry::from_incoming(raw("svc", "VERBOSE", "hi")).unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }

    #[test]
    fn deterministic_id_is_stable_and_sensitive() {
        let e1 = LogEntry::from_incoming(raw("svc", "INFO", "hi")).unwrap();
        let mut e2 = e1.clone();
        assert_eq!(e1.deterministic_id(), e2.deterministic_id());

        e2.message = "bye".to_string();
        assert_ne!(e1.deterministic_id(), e2.deterministic_id());
    }

    #[test]
    fn fills_missing_timestamp_at_accept_time() {
        let mut r = raw("svc", "INFO", "hi");
        r.timestamp = None;
        let before = Utc::now();
        let entry = LogEntry::from_incoming(r).unwrap();
        assert!(entry.timestamp >= before);
    }
}
