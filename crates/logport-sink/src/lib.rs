//! logport-sink - The analytics store write path.
//!
//! `AnalyticsSink` is the seam between the worker pool and the columnar
//! store; `ParquetAnalyticsSink` is the one concrete adapter shipped,
//! grounded in `otlp2parquet-storage::parquet_writer::ParquetWriter`
//! (Blake3 content hash computed while encoding, content-addressed
//! storage path, `opendal::Operator` as the storage abstraction).

mod encode;
mod mem;
mod partition;
mod schema;

pub use mem::InMemoryAnalyticsSink;
pub use schema::logs_schema;

use async_trait::async_trait;
use logport_core::{IngestError, LogEntry};
use opendal::Operator;

/// Where accepted entries end up once a worker flushes its batch
/// buffer. Out of scope: query/retrieval reads this store back out.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn write(&self, entries: &[LogEntry]) -> Result<(), IngestError>;
}

pub struct ParquetAnalyticsSink {
    operator: Operator,
}

impl ParquetAnalyticsSink {
    pub fn new(operator: Operator) -> Self {
        Self { operator }
    }
}

#[async_trait]
impl AnalyticsSink for ParquetAnalyticsSink {
    async fn write(&self, entries: &[LogEntry]) -> Result<(), IngestError> {
        if entries.is_empty() {
            return Ok(());
        }

        let batch = schema::entries_to_record_batch(entries).map_err(|e| {
            IngestError::TransientDownstream(format!("encoding entries to Arrow: {e}"))
        })?;
        let encoded = encode::encode_record_batch(&batch).map_err(|e| {
            IngestError::TransientDownstream(format!("encoding Arrow batch to Parquet: {e}"))
        })?;

        let app_id = &entries[0].app_id;
        let path = partition::generate_path(app_id, entries[0].timestamp, &encoded.hash.to_hex());

        self.operator
            .write(&path, encoded.bytes)
            .await
            .map_err(|e| IngestError::TransientDownstream(format!("writing to storage: {e}")))?;

        tracing::debug!(path = %path, rows = encoded.row_count, "wrote batch to analytics store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logport_core::{IncomingLogEntry, LogEntry};
    use opendal::services::Memory;
    use std::collections::BTreeMap;

    fn entry() -> LogEntry {
        LogEntry::from_incoming(IncomingLogEntry {
            app_id: "svc".into(),
            level: "INFO".into(),
            message: "hi".into(),
            source: "test".into(),
            timestamp: Some(chrono::Utc::now()),
            metadata: BTreeMap::new(),
            trace_id: None,
            user_id: None,
            environment: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn writes_a_batch_to_memory_storage() {
        let operator = Operator::new(Memory::default()).unwrap().finish();
        let sink = ParquetAnalyticsSink::new(operator.clone());

        sink.write(&[entry(), entry()]).await.unwrap();

        let entries = operator.list_with("logs/").recursive(true).await.unwrap();
        assert!(!entries.is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let operator = Operator::new(Memory::default()).unwrap().finish();
        let sink = ParquetAnalyticsSink::new(operator);
        sink.write(&[]).await.unwrap();
    }
}
