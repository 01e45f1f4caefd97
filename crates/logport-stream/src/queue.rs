use std::time::Duration;

use async_trait::async_trait;
use logport_core::IngestError;

use crate::envelope::StreamEnvelope;

/// Opaque handle identifying a message's position in the stream, used
/// to ack it later. For `RedisStreamQueue` this is the Redis stream ID
/// (`<ms>-<seq>`); treat it as opaque everywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamMessageId(pub String);

impl std::fmt::Display for StreamMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: StreamMessageId,
    pub envelope: StreamEnvelope,
    /// Number of times this message has been delivered (1 on first
    /// read, incremented by redelivery via `recover_pending`).
    pub delivery_count: u64,
}

/// A durable, append-only queue consumed by a named worker group with
/// explicit ack and stalled-delivery recovery.
///
/// Object-safe so workers and tests can hold a `Arc<dyn StreamQueue>`
/// and swap the Redis-backed implementation for an in-memory fake.
#[async_trait]
pub trait StreamQueue: Send + Sync {
    /// Idempotently create the underlying stream and consumer group.
    /// Must tolerate being called concurrently by multiple workers.
    async fn initialize(&self) -> Result<(), IngestError>;

    /// Append one entry. Returns once durably persisted.
    async fn append(&self, envelope: StreamEnvelope) -> Result<StreamMessageId, IngestError>;

    /// Append every envelope as a single pipelined, ordered operation.
    /// Either every entry is durably appended, in order, or the whole
    /// call fails -- callers must not observe a torn result where some
    /// entries landed and others didn't.
    async fn append_batch(
        &self,
        envelopes: Vec<StreamEnvelope>,
    ) -> Result<Vec<StreamMessageId>, IngestError>;

    /// Read up to `count` new messages for `consumer`, blocking for up
    /// to `block` waiting for at least one to arrive.
    async fn read(
        &self,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, IngestError>;

    /// Reclaim messages that have been pending (delivered, unacked) for
    /// at least `min_idle` and hand them to `consumer`.
    async fn recover_pending(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamMessage>, IngestError>;

    /// Acknowledge successful processing of the given messages.
    async fn ack(&self, ids: &[StreamMessageId]) -> Result<(), IngestError>;

    /// Number of messages currently pending (delivered, unacked) across
    /// the whole consumer group. Used for health/backpressure signals.
    async fn pending_count(&self) -> Result<u64, IngestError>;
}
