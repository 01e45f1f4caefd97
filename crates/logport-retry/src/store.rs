use async_trait::async_trait;
use chrono::{DateTime, Utc};
use logport_core::IngestError;
use parking_lot::Mutex;

use crate::envelope::RetryEnvelope;

/// Persistence for entries awaiting another attempt.
///
/// Object-safe so `RetryStrategy` can be built against whichever
/// implementation `retry.persistence` selects.
#[async_trait]
pub trait RetryStore: Send + Sync {
    async fn enqueue(&self, envelope: RetryEnvelope) -> Result<(), IngestError>;

    /// Remove and return up to `limit` envelopes whose `next_attempt_at`
    /// has passed.
    async fn take_due(&self, now: DateTime<Utc>, limit: usize)
        -> Result<Vec<RetryEnvelope>, IngestError>;

    /// Number of envelopes currently queued, due or not. Used for
    /// health/backpressure signals.
    async fn len(&self) -> Result<usize, IngestError>;
}

/// Non-durable `RetryStore`; lost on process restart.
///
/// Adequate when the deployment already tolerates losing in-flight
/// retries (e.g. a development environment, or a downstream sink that
/// re-derives missed data some other way).
pub struct InMemoryRetryStore {
    queue: Mutex<Vec<RetryEnvelope>>,
}

impl Default for InMemoryRetryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRetryStore {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RetryStore for InMemoryRetryStore {
    async fn enqueue(&self, envelope: RetryEnvelope) -> Result<(), IngestError> {
        self.queue.lock().push(envelope);
        Ok(())
    }

    async fn take_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RetryEnvelope>, IngestError> {
        let mut queue = self.queue.lock();
        let mut due = Vec::new();
        let mut remaining = Vec::with_capacity(queue.len());
        for envelope in queue.drain(..) {
            if due.len() < limit && envelope.next_attempt_at <= now {
                due.push(envelope);
            } else {
                remaining.push(envelope);
            }
        }
        *queue = remaining;
        Ok(due)
    }

    async fn len(&self) -> Result<usize, IngestError> {
        Ok(self.queue.lock().len())
    }
}

/// Fire-and-forget `RetryStore`: every failure is logged and discarded
/// rather than retried. Opt in via `retry.persistence = "drop"` only
/// when losing entries on downstream failure is acceptable -- this is
/// explicitly a data-loss mode, not a default.
pub struct DropOnFailureRetryStore;

#[async_trait]
impl RetryStore for DropOnFailureRetryStore {
    async fn enqueue(&self, envelope: RetryEnvelope) -> Result<(), IngestError> {
        tracing::warn!(
            app_id = %envelope.entry.app_id,
            attempt = envelope.attempt,
            error = %envelope.last_error,
            "dropping failed entry: retry.persistence = drop"
        );
        metrics::counter!("logport_entries_dropped_total").increment(1);
        Ok(())
    }

    async fn take_due(
        &self,
        _now: DateTime<Utc>,
        _limit: usize,
    ) -> Result<Vec<RetryEnvelope>, IngestError> {
        Ok(Vec::new())
    }

    async fn len(&self) -> Result<usize, IngestError> {
        Ok(0)
    }
}
