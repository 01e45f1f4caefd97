use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use logport_core::{IngestError, LogEntry};

use crate::envelope::{backoff_delay, RetryEnvelope, RetryPolicy};
use crate::store::RetryStore;

/// The operation a `RetryStrategy` re-attempts: normally a thin wrapper
/// around `AnalyticsSink::write` for a single entry.
#[async_trait]
pub trait RetryTarget: Send + Sync {
    async fn reprocess(&self, entry: &LogEntry) -> Result<(), IngestError>;
}

/// Drives entries that failed their first downstream attempt through
/// backoff, retry, and eventual success or permanent failure.
///
/// Owns no task by itself; `run` is a long-lived loop meant to be
/// spawned once per process and driven until shutdown.
pub struct RetryStrategy<T: RetryTarget> {
    store: Arc<dyn RetryStore>,
    target: Arc<T>,
    policy: RetryPolicy,
    poll_interval: Duration,
}

impl<T: RetryTarget + 'static> RetryStrategy<T> {
    pub fn new(store: Arc<dyn RetryStore>, target: Arc<T>, policy: RetryPolicy) -> Self {
        Self {
            store,
            target,
            policy,
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Number of envelopes currently awaiting another attempt. Consulted
    /// by workers to pause reading the stream under sustained sink
    /// failure rather than growing the retry backlog unboundedly.
    pub async fn outstanding_len(&self) -> Result<usize, IngestError> {
        self.store.len().await
    }

    /// Queue an entry that just failed its first attempt.
    pub async fn submit_failure(&self, entry: LogEntry, error: IngestError) -> Result<(), IngestError> {
        let envelope = RetryEnvelope {
            entry,
            attempt: 1,
            next_attempt_at: Utc::now() + chrono::Duration::from_std(backoff_delay(&self.policy, 1))
                .unwrap_or_default(),
            last_error: error.to_string(),
        };
        self.store.enqueue(envelope).await
    }

    /// Pull every envelope due right now and attempt it once more, each
    /// on its own task so a slow reprocess doesn't stall the others.
    /// Returns once this sweep's spawned attempts have all completed.
    pub async fn drive_due(&self) -> Result<(), IngestError> {
        let due = self.store.take_due(Utc::now(), 256).await?;
        if due.is_empty() {
            return Ok(());
        }

        let mut handles = Vec::with_capacity(due.len());
        for envelope in due {
            let target = Arc::clone(&self.target);
            let store = Arc::clone(&self.store);
            let policy = self.policy.clone();
            handles.push(tokio::spawn(async move {
                retry_once(target, store, policy, envelope).await
            }));
        }
        for handle in handles {
            if let Err(join_err) = handle.await {
                tracing::error!(error = %join_err, "retry task panicked");
            }
        }
        Ok(())
    }

    /// Run the retry loop until `shutdown` fires.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.drive_due().await {
                tracing::warn!(error = %e, "error driving due retries");
            }
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

async fn retry_once<T: RetryTarget>(
    target: Arc<T>,
    store: Arc<dyn RetryStore>,
    policy: RetryPolicy,
    envelope: RetryEnvelope,
) {
    match target.reprocess(&envelope.entry).await {
        Ok(()) => {
            tracing::info!(
                app_id = %envelope.entry.app_id,
                attempt = envelope.attempt,
                "retry succeeded"
            );
        }
        Err(e) if envelope.attempt >= policy.max_attempts => {
            tracing::error!(
                app_id = %envelope.entry.app_id,
                attempt = envelope.attempt,
                error = %e,
                "retry budget exhausted, treating entry as permanently failed"
            );
            metrics::counter!("logport_entries_dropped_total").increment(1);
        }
        Err(e) => {
            let next_attempt = envelope.attempt + 1;
            let delay = backoff_delay(&policy, next_attempt);
            let retried = RetryEnvelope {
                entry: envelope.entry,
                attempt: next_attempt,
                next_attempt_at: Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_default(),
                last_error: e.to_string(),
            };
            if let Err(store_err) = store.enqueue(retried).await {
                tracing::error!(error = %store_err, "failed to re-enqueue retry envelope");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRetryStore;
    use logport_core::{IncomingLogEntry, LogEntry};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    struct FlakyTarget {
        fail_times: AtomicUsize,
    }

    #[async_trait]
    impl RetryTarget for FlakyTarget {
        async fn reprocess(&self, _entry: &LogEntry) -> Result<(), IngestError> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                Err(IngestError::TransientDownstream("still down".into()))
            } else {
                Ok(())
            }
        }
    }

    struct AlwaysFailTarget;

    #[async_trait]
    impl RetryTarget for AlwaysFailTarget {
        async fn reprocess(&self, _entry: &LogEntry) -> Result<(), IngestError> {
            Err(IngestError::TransientDownstream("permanently down".into()))
        }
    }

    #[tokio::test]
    async fn eventually_succeeds_after_transient_failures() {
        let store: Arc<dyn RetryStore> = Arc::new(InMemoryRetryStore::new());
        let target = Arc::new(FlakyTarget {
            fail_times: AtomicUsize::new(2),
        });
        let strategy = RetryStrategy::new(
            store.clone(),
            target,
            RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(0),
                max_delay: Duration::from_millis(0),
            },
        );

        strategy
            .submit_failure(entry(), IngestError::TransientDownstream("first failure".into()))
            .await
            .unwrap();

        for _ in 0..3 {
            strategy.drive_due().await.unwrap();
        }

        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn drops_envelope_once_attempts_are_exhausted() {
        let store: Arc<dyn RetryStore> = Arc::new(InMemoryRetryStore::new());
        let target = Arc::new(AlwaysFailTarget);
        let strategy = RetryStrategy::new(
            store.clone(),
            target,
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(0),
                max_delay: Duration::from_millis(0),
            },
        );

        strategy
            .submit_failure(entry(), IngestError::TransientDownstream("first failure".into()))
            .await
            .unwrap();

        for _ in 0..3 {
            strategy.drive_due().await.unwrap();
        }

        assert_eq!(store.len().await.unwrap(), 0);
    }
}
