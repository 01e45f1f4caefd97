use std::sync::{Arc, OnceLock};

use arrow::array::{ArrayRef, StringBuilder, TimestampNanosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use logport_core::LogEntry;

/// Returns the cached Arrow schema entries are encoded against.
///
/// One column per `LogEntry` field plus `id` (the deterministic id) and
/// `metadata` (JSON-encoded, mirroring the teacher's JSON-encoded
/// attribute columns rather than a nested Arrow `Map` type).
pub fn logs_schema() -> Arc<Schema> {
    static SCHEMA: OnceLock<Arc<Schema>> = OnceLock::new();
    Arc::clone(SCHEMA.get_or_init(build_schema))
}

fn build_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into())),
            false,
        ),
        Field::new("app_id", DataType::Utf8, false),
        Field::new("level", DataType::Utf8, false),
        Field::new("message", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("trace_id", DataType::Utf8, true),
        Field::new("user_id", DataType::Utf8, true),
        Field::new("environment", DataType::Utf8, true),
        Field::new("metadata", DataType::Utf8, true),
    ]))
}

/// Convert a slice of entries into a single `RecordBatch` matching
/// `logs_schema()`.
pub fn entries_to_record_batch(entries: &[LogEntry]) -> arrow::error::Result<RecordBatch> {
    let mut ids = StringBuilder::new();
    let mut timestamps = Vec::with_capacity(entries.len());
    let mut app_ids = StringBuilder::new();
    let mut levels = StringBuilder::new();
    let mut messages = StringBuilder::new();
    let mut sources = StringBuilder::new();
    let mut trace_ids = StringBuilder::new();
    let mut user_ids = StringBuilder::new();
    let mut environments = StringBuilder::new();
    let mut metadata = StringBuilder::new();

    for entry in entries {
        ids.append_value(entry.deterministic_id());
        timestamps.push(entry.timestamp.timestamp_nanos_opt().unwrap_or(0));
        app_ids.append_value(&entry.app_id);
        levels.append_value(entry.level.as_str());
        messages.append_value(&entry.message);
        sources.append_value(&entry.source);
        trace_ids.append_option(entry.trace_id.as_deref());
        user_ids.append_option(entry.user_id.as_deref());
        environments.append_option(entry.environment.as_deref());
        metadata.append_value(serde_json::to_string(&entry.metadata).unwrap_or_default());
    }

    let timestamp_array = TimestampNanosecondArray::from(timestamps).with_timezone("UTC");

    let columns: Vec<ArrayRef> = vec![
        Arc::new(ids.finish()) as ArrayRef,
        Arc::new(timestamp_array) as ArrayRef,
        Arc::new(app_ids.finish()) as ArrayRef,
        Arc::new(levels.finish()) as ArrayRef,
        Arc::new(messages.finish()) as ArrayRef,
        Arc::new(sources.finish()) as ArrayRef,
        Arc::new(trace_ids.finish()) as ArrayRef,
        Arc::new(user_ids.finish()) as ArrayRef,
        Arc::new(environments.finish()) as ArrayRef,
        Arc::new(metadata.finish()) as ArrayRef,
    ];

    RecordBatch::try_new(logs_schema(), columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use logport_core::{IncomingLogEntry, LogEntry};
    use std::collections::BTreeMap;

    #[test]
    fn builds_one_row_per_entry() {
        let entry = LogEntry::from_incoming(IncomingLogEntry {
            app_id: "svc".into(),
            level: "INFO".into(),
            message: "hi".into(),
            source: "test".into(),
            timestamp: None,
            metadata: BTreeMap::new(),
            trace_id: None,
            user_id: None,
            environment: None,
        })
        .unwrap();

        let batch = entries_to_record_batch(&[entry.clone(), entry]).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema(), logs_schema());
    }
}
