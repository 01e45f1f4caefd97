//! logport-stream - Durable stream queue between the coalescer and the
//! worker pool.
//!
//! `StreamQueue` is an object-safe trait so tests can swap in an
//! in-memory fake; `RedisStreamQueue` is the production implementation
//! against Redis Streams, grounded in the consumer-group/claim pattern
//! of the `stream-worker` reference crate.

mod envelope;
mod mem;
mod producer;
mod queue;
mod redis_queue;

pub use envelope::StreamEnvelope;
pub use mem::InMemoryStreamQueue;
pub use producer::StreamProducer;
pub use queue::{StreamMessage, StreamMessageId, StreamQueue};
pub use redis_queue::{RedisStreamConfig, RedisStreamQueue};
