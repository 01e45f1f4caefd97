use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use logport_core::IngestError;
use parking_lot::Mutex;

use crate::envelope::StreamEnvelope;
use crate::queue::{StreamMessage, StreamMessageId, StreamQueue};

struct PendingEntry {
    message: StreamMessage,
    delivered_at: Instant,
}

struct Inner {
    backlog: VecDeque<StreamEnvelope>,
    pending: Vec<PendingEntry>,
    next_id: u64,
}

/// In-memory `StreamQueue` used by tests (and by `logport-worker`'s
/// crash/recovery test) in place of a real Redis connection.
///
/// Delivery is tracked explicitly so `recover_pending` can simulate a
/// worker crashing after `read` but before `ack`.
pub struct InMemoryStreamQueue {
    inner: Mutex<Inner>,
    delivery_counter: AtomicU64,
}

impl Default for InMemoryStreamQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStreamQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                backlog: VecDeque::new(),
                pending: Vec::new(),
                next_id: 1,
            }),
            delivery_counter: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

#[async_trait]
impl StreamQueue for InMemoryStreamQueue {
    async fn initialize(&self) -> Result<(), IngestError> {
        Ok(())
    }

    async fn append(&self, envelope: StreamEnvelope) -> Result<StreamMessageId, IngestError> {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.backlog.push_back(envelope);
        Ok(StreamMessageId(format!("{id}-0")))
    }

    async fn append_batch(
        &self,
        envelopes: Vec<StreamEnvelope>,
    ) -> Result<Vec<StreamMessageId>, IngestError> {
        let mut inner = self.inner.lock();
        let mut ids = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let id = inner.next_id;
            inner.next_id += 1;
            inner.backlog.push_back(envelope);
            ids.push(StreamMessageId(format!("{id}-0")));
        }
        Ok(ids)
    }

    async fn read(
        &self,
        _consumer: &str,
        count: usize,
        _block: Duration,
    ) -> Result<Vec<StreamMessage>, IngestError> {
        let mut inner = self.inner.lock();
        let mut out = Vec::new();
        while out.len() < count {
            let Some(envelope) = inner.backlog.pop_front() else {
                break;
            };
            let delivery_count = self.delivery_counter.fetch_add(1, Ordering::SeqCst) + 1;
            let id = StreamMessageId(format!("mem-{delivery_count}"));
            let message = StreamMessage {
                id: id.clone(),
                envelope,
                delivery_count: 1,
            };
            inner.pending.push(PendingEntry {
                message: message.clone(),
                delivered_at: Instant::now(),
            });
            out.push(message);
        }
        Ok(out)
    }

    async fn recover_pending(
        &self,
        _consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamMessage>, IngestError> {
        let mut inner = self.inner.lock();
        let mut recovered = Vec::new();
        for entry in inner.pending.iter_mut() {
            if recovered.len() >= count {
                break;
            }
            if entry.delivered_at.elapsed() >= min_idle {
                entry.message.delivery_count += 1;
                entry.delivered_at = Instant::now();
                recovered.push(entry.message.clone());
            }
        }
        Ok(recovered)
    }

    async fn ack(&self, ids: &[StreamMessageId]) -> Result<(), IngestError> {
        let mut inner = self.inner.lock();
        inner.pending.retain(|entry| !ids.contains(&entry.message.id));
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64, IngestError> {
        Ok(self.inner.lock().pending.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logport_core::{IncomingLogEntry, LogEntry};
    use std::collections::BTreeMap;

    fn entry() -> LogEntry {
        LogEntry::from_incoming(IncomingLogEntry {
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
        .unwrap()
    }

    #[tokio::test]
    async fn read_without_ack_is_recoverable_after_min_idle() {
        let queue = InMemoryStreamQueue::new();
        queue
            .append(StreamEnvelope::new(entry()))
            .await
            .unwrap();

        let read = queue.read("w1", 10, Duration::from_millis(0)).await.unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(queue.pending_len(), 1);

        let recovered = queue
            .recover_pending("w2", Duration::from_millis(0), 10)
            .await
            .unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].delivery_count, 2);

        queue.ack(&[recovered[0].id.clone()]).await.unwrap();
        assert_eq!(queue.pending_len(), 0);
    }
}
