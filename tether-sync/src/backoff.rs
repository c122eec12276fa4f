//! Retry spacing for queue entries that failed transiently.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tether_types::QueueEntry;

/// Capped exponential backoff: `base * 2^(attempts - 1)`, clamped to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(300))
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the next attempt, given how many attempts already failed.
    pub fn delay(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let exp = (attempts - 1).min(31);
        self.base.saturating_mul(1u32 << exp).min(self.max)
    }

    /// Earliest time the entry may be retried.
    pub fn next_attempt_at(&self, entry: &QueueEntry) -> DateTime<Utc> {
        let Some(last) = entry.last_attempt_at else {
            return entry.enqueued_at;
        };
        let delay = TimeDelta::from_std(self.delay(entry.attempts)).unwrap_or(TimeDelta::MAX);
        last.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_ready(&self, entry: &QueueEntry, now: DateTime<Utc>) -> bool {
        entry.attempts == 0 || self.next_attempt_at(entry) <= now
    }
}
