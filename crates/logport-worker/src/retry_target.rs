use std::sync::Arc;

use async_trait::async_trait;
use logport_core::{IngestError, LogEntry};
use logport_retry::RetryTarget;
use logport_sink::AnalyticsSink;

/// Bridges the retry engine to the analytics sink: a retry attempt is
/// just a one-entry write.
pub struct SinkRetryTarget {
    sink: Arc<dyn AnalyticsSink>,
}

impl SinkRetryTarget {
    pub fn new(sink: Arc<dyn AnalyticsSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl RetryTarget for SinkRetryTarget {
    async fn reprocess(&self, entry: &LogEntry) -> Result<(), IngestError> {
        self.sink.write(std::slice::from_ref(entry)).await
    }
}
