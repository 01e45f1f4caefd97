//! logport-worker - The worker pool that drains the stream queue into
//! the analytics sink.
//!
//! Each `Worker` reads from a `StreamQueue`, accumulates into a
//! write-through `BatchBuffer`, and flushes into an `AnalyticsSink`,
//! routing sink failures to a `RetryStrategy` instead of blocking
//! stream consumption on them. `WorkerPool` supervises a fixed-size set
//! of workers, restarting a crashed or hung one with backoff.

mod buffer;
mod health;
mod pool;
mod retry_target;
mod worker;

pub use health::{HealthRegistry, HealthReport};
pub use pool::{WorkerPool, WorkerPoolConfig};
pub use retry_target::SinkRetryTarget;
pub use worker::{Worker, WorkerConfig};

#[cfg(test)]
mod tests {
    use super::*;
    use logport_core::{IncomingLogEntry, LogEntry};
    use logport_retry::{InMemoryRetryStore, RetryPolicy, RetryStrategy};
    use logport_sink::InMemoryAnalyticsSink;
    use logport_stream::{InMemoryStreamQueue, StreamEnvelope, StreamQueue};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;

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

    /// S4: a worker reads a message, then "crashes" before acking it
    /// (simulated by dropping the worker without calling ack). A second
    /// worker must be able to recover it via `recover_pending` once the
    /// idle threshold has passed, and eventually flush it to the sink.
    #[tokio::test]
    async fn crashed_worker_messages_are_recovered_and_flushed() {
        let queue: Arc<InMemoryStreamQueue> = Arc::new(InMemoryStreamQueue::new());
        queue
            .append(StreamEnvelope::new(entry("unacked")))
            .await
            .unwrap();

        // Simulate worker A's read, without ever acking.
        let read = queue.read("worker-a", 10, Duration::from_millis(0)).await.unwrap();
        assert_eq!(read.len(), 1);

        let sink = Arc::new(InMemoryAnalyticsSink::new());
        let retry_store = Arc::new(InMemoryRetryStore::new());
        let retry_target = Arc::new(SinkRetryTarget::new(sink.clone()));
        let retry = Arc::new(RetryStrategy::new(
            retry_store,
            retry_target,
            RetryPolicy::default(),
        ));

        let health = Arc::new(HealthRegistry::new());
        let worker_b = Worker::new(
            queue.clone(),
            sink.clone(),
            retry,
            WorkerConfig {
                consumer_id: "worker-b".into(),
                batch_size: 10,
                max_batch_size: 10,
                max_wait: Duration::from_millis(5),
                read_block: Duration::from_millis(0),
                claim_min_idle: Duration::from_millis(0),
                claim_interval: Duration::from_millis(0),
                retry_queue_limit: None,
            },
            health,
        );

        let (tx, shutdown_rx) = watch::channel(false);
        let run_handle = tokio::spawn(async move { worker_b.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let _ = run_handle.await;

        assert_eq!(sink.written_entries().len(), 1);
        assert_eq!(sink.written_entries()[0].message, "unacked");
    }

    /// A worker whose retry queue is already at `retry_queue_limit`
    /// must not read new messages off the stream at all.
    #[tokio::test]
    async fn pauses_reading_while_retry_queue_is_over_the_limit() {
        let queue: Arc<InMemoryStreamQueue> = Arc::new(InMemoryStreamQueue::new());
        queue
            .append(StreamEnvelope::new(entry("blocked")))
            .await
            .unwrap();

        let sink = Arc::new(InMemoryAnalyticsSink::new());
        let retry_store = Arc::new(InMemoryRetryStore::new());
        let retry_target = Arc::new(SinkRetryTarget::new(sink.clone()));
        let retry = Arc::new(RetryStrategy::new(
            retry_store,
            retry_target,
            RetryPolicy::default(),
        ));
        retry
            .submit_failure(
                entry("already-failed"),
                logport_core::IngestError::TransientDownstream("down".into()),
            )
            .await
            .unwrap();

        let health = Arc::new(HealthRegistry::new());
        let worker = Worker::new(
            queue.clone(),
            sink.clone(),
            retry,
            WorkerConfig {
                consumer_id: "worker-c".into(),
                batch_size: 10,
                max_batch_size: 10,
                max_wait: Duration::from_millis(5),
                read_block: Duration::from_millis(0),
                claim_min_idle: Duration::from_secs(30),
                claim_interval: Duration::from_secs(60),
                retry_queue_limit: Some(1),
            },
            health,
        );

        let (tx, shutdown_rx) = watch::channel(false);
        let run_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let _ = run_handle.await;

        assert!(sink.written_entries().is_empty());
        let still_queued = queue.read("checker", 10, Duration::from_millis(0)).await.unwrap();
        assert_eq!(still_queued.len(), 1);
    }
}
