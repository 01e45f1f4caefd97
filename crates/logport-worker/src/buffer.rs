use std::time::Instant;

use logport_stream::StreamMessage;

/// Write-through double buffer: one side accepts newly-read messages
/// while the other (if non-empty) is being flushed to the sink. Bounded
/// by `2 * max_batch_size` the way the coalescer's own ping-pong
/// buffers are.
pub struct BatchBuffer {
    buffers: [Vec<StreamMessage>; 2],
    active: usize,
    oldest_pending_since: Option<Instant>,
    max_batch_size: usize,
}

impl BatchBuffer {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            buffers: [
                Vec::with_capacity(max_batch_size),
                Vec::with_capacity(max_batch_size),
            ],
            active: 0,
            oldest_pending_since: None,
            max_batch_size,
        }
    }

    pub fn push(&mut self, message: StreamMessage) {
        if self.buffers[self.active].is_empty() {
            self.oldest_pending_since = Some(Instant::now());
        }
        self.buffers[self.active].push(message);
    }

    pub fn len(&self) -> usize {
        self.buffers[self.active].len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers[self.active].is_empty()
    }

    pub fn reached_max_size(&self) -> bool {
        self.buffers[self.active].len() >= self.max_batch_size
    }

    pub fn age(&self) -> Option<std::time::Duration> {
        self.oldest_pending_since.map(|since| since.elapsed())
    }

    /// Swap the active buffer out for flushing and clear the age clock.
    pub fn swap(&mut self) -> Vec<StreamMessage> {
        let drained = std::mem::take(&mut self.buffers[self.active]);
        self.active = 1 - self.active;
        self.oldest_pending_since = None;
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logport_core::{IncomingLogEntry, LogEntry};
    use logport_stream::{StreamEnvelope, StreamMessageId};
    use std::collections::BTreeMap;

    fn message(n: u64) -> StreamMessage {
        let entry = LogEntry::from_incoming(IncomingLogEntry {
            app_id: "svc".into(),
            level: "INFO".into(),
            message: format!("{n}"),
            source: "test".into(),
            timestamp: None,
            metadata: BTreeMap::new(),
            trace_id: None,
            user_id: None,
            environment: None,
        })
        .unwrap();
        StreamMessage {
            id: StreamMessageId(format!("{n}-0")),
            envelope: StreamEnvelope::new(entry),
            delivery_count: 1,
        }
    }

    #[test]
    fn tracks_max_size_and_swaps_cleanly() {
        let mut buffer = BatchBuffer::new(2);
        assert!(!buffer.reached_max_size());
        buffer.push(message(1));
        assert!(!buffer.reached_max_size());
        buffer.push(message(2));
        assert!(buffer.reached_max_size());

        let drained = buffer.swap();
        assert_eq!(drained.len(), 2);
        assert!(buffer.is_empty());
        assert!(buffer.age().is_none());
    }

    #[test]
    fn ages_from_first_push() {
        let mut buffer = BatchBuffer::new(10);
        assert!(buffer.age().is_none());
        buffer.push(message(1));
        assert!(buffer.age().is_some());
    }
}
