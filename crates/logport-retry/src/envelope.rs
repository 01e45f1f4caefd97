use std::time::Duration;

use chrono::{DateTime, Utc};
use logport_core::LogEntry;
use serde::{Deserialize, Serialize};

/// A log entry that failed its downstream write, queued for another
/// attempt. `attempt` counts completed attempts so far (starts at 1 for
/// the original failure that created this envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryEnvelope {
    pub entry: LogEntry,
    pub attempt: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: String,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Exponential backoff with a cap: `base_delay * 2^attempt`, clamped to
/// `max_delay`. Shared shape with `WorkerPool`'s restart backoff.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
    policy
        .base_delay
        .saturating_mul(factor)
        .min(policy.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        };
        assert_eq!(backoff_delay(&policy, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(400));
        assert_eq!(backoff_delay(&policy, 10), Duration::from_secs(2));
    }
}
