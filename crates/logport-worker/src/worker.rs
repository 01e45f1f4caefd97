use std::sync::Arc;
use std::time::Duration;

use logport_retry::RetryStrategy;
use logport_sink::AnalyticsSink;
use logport_stream::{StreamMessageId, StreamQueue};
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};

use crate::buffer::BatchBuffer;
use crate::health::HealthRegistry;
use crate::retry_target::SinkRetryTarget;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub consumer_id: String,
    /// Number of messages requested per `StreamQueue::read` call.
    /// Independent of `max_batch_size`: a worker may read in small
    /// chunks while still flushing large buffers, or vice versa.
    pub batch_size: usize,
    /// Buffer occupancy at which the ping-pong buffer is swapped and
    /// flushed, regardless of `max_wait`.
    pub max_batch_size: usize,
    pub max_wait: Duration,
    pub read_block: Duration,
    pub claim_min_idle: Duration,
    pub claim_interval: Duration,
    /// Pause reading the stream while the retry store holds at least
    /// this many outstanding envelopes, so sustained sink failure
    /// back-pressures ingestion instead of growing the retry backlog
    /// unboundedly. `None` disables the check.
    pub retry_queue_limit: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumer_id: "worker-0".to_string(),
            batch_size: 200,
            max_batch_size: 200,
            max_wait: Duration::from_millis(250),
            read_block: Duration::from_millis(500),
            claim_min_idle: Duration::from_secs(30),
            claim_interval: Duration::from_secs(60),
            retry_queue_limit: Some(10_000),
        }
    }
}

/// One consumer against the stream queue: reads, accumulates into a
/// ping-pong `BatchBuffer`, and flushes into the analytics sink,
/// routing failures to the retry strategy rather than blocking the
/// stream consumer on them.
pub struct Worker {
    queue: Arc<dyn StreamQueue>,
    sink: Arc<dyn AnalyticsSink>,
    retry: Arc<RetryStrategy<SinkRetryTarget>>,
    config: WorkerConfig,
    health: Arc<HealthRegistry>,
    buffer: Mutex<BatchBuffer>,
    /// Bounds in-flight flushes to 2, matching the ping-pong buffer's
    /// own bound of at most one buffer draining while the other fills.
    flush_permits: Arc<Semaphore>,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn StreamQueue>,
        sink: Arc<dyn AnalyticsSink>,
        retry: Arc<RetryStrategy<SinkRetryTarget>>,
        config: WorkerConfig,
        health: Arc<HealthRegistry>,
    ) -> Arc<Self> {
        let buffer = Mutex::new(BatchBuffer::new(config.max_batch_size.max(1)));
        Arc::new(Self {
            queue,
            sink,
            retry,
            config,
            health,
            buffer,
            flush_permits: Arc::new(Semaphore::new(2)),
        })
    }

    pub fn consumer_id(&self) -> &str {
        &self.config.consumer_id
    }

    /// Run until `shutdown` reports true. Returns once any in-flight
    /// flush it started has completed.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        self.queue.initialize().await.ok();
        if let Ok(reclaimed) = self
            .queue
            .recover_pending(
                &self.config.consumer_id,
                self.config.claim_min_idle,
                self.config.max_batch_size,
            )
            .await
        {
            let mut buffer = self.buffer.lock();
            for message in reclaimed {
                buffer.push(message);
            }
        }

        let mut last_claim = tokio::time::Instant::now();
        let mut in_flight = Vec::new();

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.health.heartbeat(&self.config.consumer_id);
            self.health
                .record_buffered(&self.config.consumer_id, self.buffer.lock().len());

            if let Some(limit) = self.config.retry_queue_limit {
                match self.retry.outstanding_len().await {
                    Ok(outstanding) if outstanding >= limit => {
                        tracing::warn!(
                            outstanding,
                            limit,
                            "retry queue limit reached, pausing stream reads"
                        );
                        tokio::select! {
                            _ = shutdown.changed() => {}
                            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                        }
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to check retry queue depth");
                    }
                }
            }

            if last_claim.elapsed() >= self.config.claim_interval {
                match self
                    .queue
                    .recover_pending(
                        &self.config.consumer_id,
                        self.config.claim_min_idle,
                        self.config.max_batch_size,
                    )
                    .await
                {
                    Ok(reclaimed) => {
                        let mut buffer = self.buffer.lock();
                        for message in reclaimed {
                            buffer.push(message);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed reclaiming pending messages");
                    }
                }
                last_claim = tokio::time::Instant::now();
            }

            let want = {
                let buffer = self.buffer.lock();
                self.config
                    .batch_size
                    .min(self.config.max_batch_size.saturating_sub(buffer.len()))
            };
            if want > 0 {
                match self
                    .queue
                    .read(&self.config.consumer_id, want, self.config.read_block)
                    .await
                {
                    Ok(messages) => {
                        let mut buffer = self.buffer.lock();
                        for message in messages {
                            buffer.push(message);
                        }
                    }
                    Err(e) => {
                        self.health.record_error(&self.config.consumer_id, e.to_string());
                        tracing::warn!(error = %e, "error reading from stream queue");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                }
            }

            let flush_due = {
                let buffer = self.buffer.lock();
                buffer.reached_max_size()
                    || buffer.age().map(|age| age >= self.config.max_wait).unwrap_or(false)
            };
            if flush_due {
                let batch = self.buffer.lock().swap();
                if !batch.is_empty() {
                    in_flight.push(self.spawn_flush(batch));
                }
            }

            in_flight.retain(|h: &tokio::task::JoinHandle<()>| !h.is_finished());

            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(Duration::from_millis(10)) => {}
            }
        }

        let remainder = self.buffer.lock().swap();
        if !remainder.is_empty() {
            in_flight.push(self.spawn_flush(remainder));
        }
        for handle in in_flight {
            let _ = handle.await;
        }
    }

    fn spawn_flush(
        self: &Arc<Self>,
        batch: Vec<logport_stream::StreamMessage>,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let permit = this
                .flush_permits
                .clone()
                .acquire_owned()
                .await
                .expect("flush semaphore is never closed");
            this.flush(batch).await;
            drop(permit);
        })
    }

    async fn flush(&self, batch: Vec<logport_stream::StreamMessage>) {
        let ids: Vec<StreamMessageId> = batch.iter().map(|m| m.id.clone()).collect();
        let entries: Vec<_> = batch.into_iter().map(|m| m.envelope.entry).collect();
        let batch_len = entries.len() as u64;

        match self.sink.write(&entries).await {
            Ok(()) => {
                self.health
                    .record_flush(&self.config.consumer_id, batch_len);
                metrics::counter!("logport_entries_processed_total").increment(batch_len);
            }
            Err(e) => {
                self.health
                    .record_error(&self.config.consumer_id, e.to_string());
                for entry in entries {
                    if let Err(submit_err) = self.retry.submit_failure(entry, e.clone()).await {
                        tracing::error!(error = %submit_err, "failed to submit entry to retry strategy");
                    } else {
                        metrics::counter!("logport_entries_retried_total").increment(1);
                    }
                }
            }
        }

        // The entry's durability is now owned either by the sink (on
        // success) or the retry store (on failure); either way the
        // stream message can be acked.
        if let Err(e) = self.queue.ack(&ids).await {
            tracing::error!(error = %e, "failed to ack flushed messages");
        }
    }
}
