//! logport-retry - Backoff-and-retry handling for entries that failed
//! their first downstream write.
//!
//! Two `RetryStore` implementations ship: `InMemoryRetryStore` (lost on
//! restart) and `SqliteRetryStore` (durable, WAL-backed, grounded in
//! the `log_buffer_batcher` reference file's buffer-persistence
//! pattern). `DropOnFailureRetryStore` is the explicit, opt-in
//! fire-and-forget mode.

mod envelope;
mod sqlite_store;
mod store;
mod strategy;

pub use envelope::{backoff_delay, RetryEnvelope, RetryPolicy};
pub use sqlite_store::SqliteRetryStore;
pub use store::{DropOnFailureRetryStore, InMemoryRetryStore, RetryStore};
pub use strategy::{RetryStrategy, RetryTarget};
