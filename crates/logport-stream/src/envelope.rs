use logport_core::LogEntry;
use serde::{Deserialize, Serialize};

/// The wire shape stored in a stream entry's `data` field.
///
/// `id` is `LogEntry::deterministic_id()`, carried alongside the entry
/// itself so a worker that crashes between writing to the sink and
/// acking the message reprocesses the same id on redelivery rather than
/// recomputing and possibly racing a clock tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEnvelope {
    pub id: String,
    pub entry: LogEntry,
}

impl StreamEnvelope {
    pub fn new(entry: LogEntry) -> Self {
        let id = entry.deterministic_id();
        Self { id, entry }
    }
}
