use std::sync::Arc;

/// The error taxonomy shared by every stage of the ingestion pipeline.
///
/// `Clone` so a single processor failure can be broadcast to every
/// completion handle in a coalesced batch without re-running the
/// operation that produced it. Variants that wrap a non-`Clone` source
/// error hold it behind an `Arc` for that reason.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IngestError {
    /// The entry itself is malformed; never reaches the coalescer.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Upstream (producer-facing) transient failure, e.g. the coalescer
    /// or stream queue is momentarily unable to accept work. Safe to
    /// retry from the caller's side.
    #[error("transient upstream failure: {0}")]
    TransientUpstream(String),

    /// Downstream (sink-facing) transient failure, e.g. a connection
    /// reset talking to the analytics store. Handled internally by the
    /// retry strategy; not normally surfaced to the producer.
    #[error("transient downstream failure: {0}")]
    TransientDownstream(String),

    /// Downstream failure judged non-recoverable by the retry strategy
    /// (retry budget exhausted, or the sink reported a permanent
    /// rejection). Terminal for the entry.
    #[error("permanent downstream failure: {0}")]
    PermanentDownstream(String),

    /// The component is mid-shutdown and cannot accept new work.
    #[error("shutting down")]
    ShuttingDown,

    /// A supervisory failure internal to the worker pool (e.g. a worker
    /// task panicked) rather than a failure of the work itself.
    #[error("supervisor error: {0}")]
    Supervisor(Arc<str>),
}

impl IngestError {
    /// Whether retrying the same operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::TransientUpstream(_) | IngestError::TransientDownstream(_)
        )
    }
}
