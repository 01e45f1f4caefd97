use std::sync::Arc;

use async_trait::async_trait;
use logport_coalescer::BatchProcessor;
use logport_core::{IngestError, LogEntry};

use crate::envelope::StreamEnvelope;
use crate::queue::StreamQueue;

/// The `BatchProcessor` the coalescer drains into: appends the whole
/// batch to the stream queue as a single pipelined, ordered operation.
///
/// The batch succeeds or fails as one unit -- if the pipeline fails,
/// every handle in the batch reports the same error, since none of the
/// batch's entries can be assumed to have landed.
pub struct StreamProducer {
    queue: Arc<dyn StreamQueue>,
}

impl StreamProducer {
    pub fn new(queue: Arc<dyn StreamQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl BatchProcessor for StreamProducer {
    async fn process(&self, batch: Vec<LogEntry>) -> Vec<Result<(), IngestError>> {
        let len = batch.len();
        let envelopes = batch.into_iter().map(StreamEnvelope::new).collect();

        match self.queue.append_batch(envelopes).await {
            Ok(_ids) => vec![Ok(()); len],
            Err(e) => vec![Err(e); len],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::InMemoryStreamQueue;
    use logport_core::IncomingLogEntry;
    use std::collections::BTreeMap;

    fn entry(msg: &str) -> LogEntry {
        LogEntry::from_incoming(IncomingLogEntry {
            app_id: "svc".into(),
            level: "INFO".into(),
            message: msg.into(),
            source: "test".into(),
            timestamp: None,
            metadata: BTreeMap::new(),
            trace_id: None,
            user_id: None,
            environment: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn appends_every_entry_in_the_batch() {
        let queue: Arc<InMemoryStreamQueue> = Arc::new(InMemoryStreamQueue::new());
        let producer = StreamProducer::new(queue.clone());

        let results = producer
            .process(vec![entry("a"), entry("b"), entry("c")])
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_ok()));
    }

    struct FailingQueue;

    #[async_trait]
    impl StreamQueue for FailingQueue {
        async fn initialize(&self) -> Result<(), IngestError> {
            Ok(())
        }

        async fn append(&self, _envelope: StreamEnvelope) -> Result<crate::queue::StreamMessageId, IngestError> {
            Err(IngestError::TransientDownstream("down".into()))
        }

        async fn append_batch(
            &self,
            _envelopes: Vec<StreamEnvelope>,
        ) -> Result<Vec<crate::queue::StreamMessageId>, IngestError> {
            Err(IngestError::TransientDownstream("pipeline failed".into()))
        }

        async fn read(
            &self,
            _consumer: &str,
            _count: usize,
            _block: std::time::Duration,
        ) -> Result<Vec<crate::queue::StreamMessage>, IngestError> {
            Ok(Vec::new())
        }

        async fn recover_pending(
            &self,
            _consumer: &str,
            _min_idle: std::time::Duration,
            _count: usize,
        ) -> Result<Vec<crate::queue::StreamMessage>, IngestError> {
            Ok(Vec::new())
        }

        async fn ack(&self, _ids: &[crate::queue::StreamMessageId]) -> Result<(), IngestError> {
            Ok(())
        }

        async fn pending_count(&self) -> Result<u64, IngestError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn one_failing_append_fails_every_handle_in_the_batch() {
        let producer = StreamProducer::new(Arc::new(FailingQueue));

        let results = producer
            .process(vec![entry("a"), entry("b"), entry("c")])
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_err()));
    }
}
