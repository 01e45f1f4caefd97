use async_trait::async_trait;
use logport_core::{IngestError, LogEntry};
use parking_lot::Mutex;

use crate::AnalyticsSink;

/// Records every write it receives; used by worker and retry tests in
/// place of a real Parquet/object-storage round trip.
#[derive(Default)]
pub struct InMemoryAnalyticsSink {
    written: Mutex<Vec<LogEntry>>,
    fail_next: Mutex<usize>,
}

impl InMemoryAnalyticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `write` fail with a transient error.
    pub fn fail_next_calls(&self, n: usize) {
        *self.fail_next.lock() = n;
    }

    pub fn written_entries(&self) -> Vec<LogEntry> {
        self.written.lock().clone()
    }
}

#[async_trait]
impl AnalyticsSink for InMemoryAnalyticsSink {
    async fn write(&self, entries: &[LogEntry]) -> Result<(), IngestError> {
        let mut fail_next = self.fail_next.lock();
        if *fail_next > 0 {
            *fail_next -= 1;
            return Err(IngestError::TransientDownstream(
                "InMemoryAnalyticsSink: forced failure".into(),
            ));
        }
        drop(fail_next);

        self.written.lock().extend_from_slice(entries);
        Ok(())
    }
}
