//! logport-coalescer - In-process batching of concurrent producer calls.
//!
//! `Coalescer<P>` merges overlapping `add()` calls into batches bounded
//! by size and wait time, and hands each batch to a `BatchProcessor`.
//! Modeled on the ping-pong double buffer in `otlp2parquet-batch`'s
//! `BatchManager`, generalized from a per-key map to a single pair of
//! buffers with a wait timer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use logport_core::{IngestError, LogEntry};
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Receives a coalesced batch and reports a result per entry.
///
/// The returned vector must have exactly one entry per input entry, in
/// the same order; this is what lets the coalescer route each result
/// back to the `add()` call that produced it.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, batch: Vec<LogEntry>) -> Vec<Result<(), IngestError>>;
}

#[derive(Debug, Clone)]
pub struct CoalescerConfig {
    /// Number of entries that triggers an immediate flush.
    pub max_batch_size: usize,
    /// How long the first entry in an otherwise-idle buffer waits
    /// before it is flushed anyway.
    pub max_wait: Duration,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 500,
            max_wait: Duration::from_millis(100),
        }
    }
}

struct PendingRequest {
    entry: LogEntry,
    completion: oneshot::Sender<Result<(), IngestError>>,
}

struct Inner {
    buffers: [Vec<PendingRequest>; 2],
    /// Index (0 or 1) of the buffer currently accepting new entries.
    active: usize,
    /// Bumped every time the active buffer is swapped out for draining,
    /// so a wait-timer firing against a now-stale buffer is a no-op.
    generation: u64,
    /// True while a drain is in flight (processor call running).
    draining: bool,
    /// Set when a flush condition fires while a drain is already in
    /// flight, so the just-finished drain immediately starts another.
    pending_flush: bool,
    shutting_down: bool,
}

impl Inner {
    fn new(max_batch_size: usize) -> Self {
        Self {
            buffers: [
                Vec::with_capacity(max_batch_size),
                Vec::with_capacity(max_batch_size),
            ],
            active: 0,
            generation: 0,
            draining: false,
            pending_flush: false,
            shutting_down: false,
        }
    }
}

/// Coalesces concurrent `add()` calls into batches for a `BatchProcessor`.
pub struct Coalescer<P: BatchProcessor> {
    inner: Mutex<Inner>,
    processor: Arc<P>,
    config: CoalescerConfig,
}

impl<P: BatchProcessor + 'static> Coalescer<P> {
    pub fn new(processor: P, config: CoalescerConfig) -> Arc<Self> {
        Self::new_with_arc(Arc::new(processor), config)
    }

    /// Like `new`, but takes an already-shared processor so callers can
    /// retain their own handle to it (tests inspecting call counts, a
    /// caller wiring the same processor into more than one coalescer).
    pub fn new_with_arc(processor: Arc<P>, config: CoalescerConfig) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::new(config.max_batch_size.max(1))),
            processor,
            config,
        })
    }

    /// Submit a single entry and await its result.
    ///
    /// The returned future resolves once the batch this entry landed in
    /// has been processed, not merely enqueued.
    pub async fn add(self: &Arc<Self>, entry: LogEntry) -> Result<(), IngestError> {
        let (tx, rx) = oneshot::channel();

        enum AfterPush {
            StartDrain,
            StartTimer(u64),
            Nothing,
        }

        let after = {
            let mut inner = self.inner.lock();
            if inner.shutting_down {
                return Err(IngestError::ShuttingDown);
            }
            let active = inner.active;
            inner.buffers[active].push(PendingRequest {
                entry,
                completion: tx,
            });
            let len = inner.buffers[active].len();
            if len >= self.config.max_batch_size {
                AfterPush::StartDrain
            } else if len == 1 {
                AfterPush::StartTimer(inner.generation)
            } else {
                AfterPush::Nothing
            }
        };

        match after {
            AfterPush::StartDrain => self.kick_drain(),
            AfterPush::StartTimer(generation) => self.spawn_wait_timer(generation),
            AfterPush::Nothing => {}
        }

        rx.await.unwrap_or(Err(IngestError::ShuttingDown))
    }

    fn spawn_wait_timer(self: &Arc<Self>, generation: u64) {
        let this = Arc::clone(self);
        let wait = self.config.max_wait;
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            this.on_wait_elapsed(generation);
        });
    }

    fn on_wait_elapsed(self: &Arc<Self>, generation: u64) {
        let still_current = {
            let inner = self.inner.lock();
            inner.generation == generation && !inner.buffers[inner.active].is_empty()
        };
        if still_current {
            self.kick_drain();
        }
    }

    /// Swap the active buffer out for draining, or mark a pending flush
    /// if a drain is already in flight.
    fn kick_drain(self: &Arc<Self>) {
        let batch = {
            let mut inner = self.inner.lock();
            if inner.draining {
                inner.pending_flush = true;
                return;
            }
            take_active_buffer(&mut inner)
        };
        if let Some(batch) = batch {
            self.spawn_drain(batch);
        }
    }

    fn spawn_drain(self: &Arc<Self>, batch: Vec<PendingRequest>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_drain(batch).await;
        });
    }

    async fn run_drain(self: Arc<Self>, batch: Vec<PendingRequest>) {
        let mut entries = Vec::with_capacity(batch.len());
        let mut completions = Vec::with_capacity(batch.len());
        for req in batch {
            entries.push(req.entry);
            completions.push(req.completion);
        }

        let results = self.processor.process(entries).await;
        if results.len() != completions.len() {
            tracing::error!(
                expected = completions.len(),
                got = results.len(),
                "BatchProcessor returned a mismatched result count"
            );
        }

        for (completion, result) in completions.into_iter().zip(
            results
                .into_iter()
                .chain(std::iter::repeat_with(|| Err(IngestError::Supervisor(
                    "processor returned too few results".into(),
                )))),
        ) {
            let _ = completion.send(result);
        }

        let next = {
            let mut inner = self.inner.lock();
            inner.draining = false;
            let flush_due = inner.pending_flush
                || inner.buffers[inner.active].len() >= self.config.max_batch_size;
            if flush_due {
                inner.pending_flush = false;
                take_active_buffer(&mut inner)
            } else {
                None
            }
        };

        if let Some(next_batch) = next {
            self.spawn_drain(next_batch);
        }
    }

    /// Stop accepting new entries; in-flight batches still complete.
    pub fn shutdown(&self) {
        self.inner.lock().shutting_down = true;
    }

    #[cfg(test)]
    fn active_len(&self) -> usize {
        let inner = self.inner.lock();
        inner.buffers[inner.active].len()
    }
}

/// Take the active buffer, swap in the other (now-empty) one, and bump
/// the generation so any outstanding wait timer for the old buffer is
/// recognized as stale. Marks `draining` if anything was taken.
fn take_active_buffer(inner: &mut Inner) -> Option<Vec<PendingRequest>> {
    let active = inner.active;
    if inner.buffers[active].is_empty() {
        return None;
    }
    let drained = std::mem::take(&mut inner.buffers[active]);
    inner.active = 1 - active;
    inner.generation += 1;
    inner.draining = true;
    Some(drained)
}

#[cfg(test)]
mod tests {
    use super::*;
    use logport_core::{IncomingLogEntry, LogEntry};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct CountingProcessor {
        calls: AtomicUsize,
        batch_sizes: Mutex<Vec<usize>>,
        notify: Notify,
    }

    impl CountingProcessor {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                batch_sizes: Mutex::new(Vec::new()),
                notify: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl BatchProcessor for CountingProcessor {
        async fn process(&self, batch: Vec<LogEntry>) -> Vec<Result<(), IngestError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().push(batch.len());
            self.notify.notify_waiters();
            batch.iter().map(|_| Ok(())).collect()
        }
    }

    struct FailingProcessor;

    #[async_trait]
    impl BatchProcessor for FailingProcessor {
        async fn process(&self, batch: Vec<LogEntry>) -> Vec<Result<(), IngestError>> {
            batch
                .iter()
                .map(|_| Err(IngestError::TransientDownstream("boom".into())))
                .collect()
        }
    }

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
    async fn coalesces_concurrent_adds_into_one_batch() {
        let processor = Arc::new(CountingProcessor::new());
        let coalescer = Coalescer::new_with_arc(processor.clone(), CoalescerConfig {
            max_batch_size: 4,
            max_wait: Duration::from_secs(60),
        });

        let mut handles = Vec::new();
        for i in 0..4 {
            let c = Arc::clone(&coalescer);
            handles.push(tokio::spawn(async move { c.add(entry(&format!("{i}"))).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(processor.batch_sizes.lock()[0], 4);
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_on_timeout_when_under_max_batch_size() {
        let processor = Arc::new(CountingProcessor::new());
        let coalescer = Coalescer::new_with_arc(processor.clone(), CoalescerConfig {
            max_batch_size: 100,
            max_wait: Duration::from_millis(50),
        });

        let c = Arc::clone(&coalescer);
        let handle = tokio::spawn(async move { c.add(entry("solo")).await });

        tokio::time::advance(Duration::from_millis(51)).await;
        handle.await.unwrap().unwrap();

        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(processor.batch_sizes.lock()[0], 1);
    }

    #[tokio::test]
    async fn propagates_per_entry_processor_errors() {
        let coalescer = Coalescer::new_with_arc(
            Arc::new(FailingProcessor),
            CoalescerConfig {
                max_batch_size: 2,
                max_wait: Duration::from_secs(60),
            },
        );

        let c1 = Arc::clone(&coalescer);
        let c2 = Arc::clone(&coalescer);
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { c1.add(entry("a")).await }),
            tokio::spawn(async move { c2.add(entry("b")).await }),
        );

        assert!(matches!(
            r1.unwrap(),
            Err(IngestError::TransientDownstream(_))
        ));
        assert!(matches!(
            r2.unwrap(),
            Err(IngestError::TransientDownstream(_))
        ));
    }

    #[tokio::test]
    async fn active_buffer_empties_after_drain() {
        let processor = Arc::new(CountingProcessor::new());
        let coalescer = Coalescer::new_with_arc(processor.clone(), CoalescerConfig {
            max_batch_size: 2,
            max_wait: Duration::from_secs(60),
        });

        let c1 = Arc::clone(&coalescer);
        let c2 = Arc::clone(&coalescer);
        let _ = tokio::join!(
            tokio::spawn(async move { c1.add(entry("a")).await }),
            tokio::spawn(async move { c2.add(entry("b")).await }),
        );

        assert_eq!(coalescer.active_len(), 0);
    }
}
