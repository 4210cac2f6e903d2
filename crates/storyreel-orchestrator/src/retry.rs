//! Retry policy with exponential backoff.
//!
//! A failed item re-enters its phase once its backoff has elapsed, as long as
//! the failure was retryable and the retry budget is not exhausted. The budget
//! is `WorkItem::max_retries`, fixed when the item is created and persisted
//! with it; the policy only decides when a retry is due.

use std::time::Duration;

use chrono::{DateTime, Utc};
use storyreel_models::WorkItem;

/// Backoff settings shared by every phase.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before re-entry number `retry_count + 1`.
    pub fn delay_for_attempt(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Time left before `item` may re-enter its phase.
    ///
    /// `None` when the item cannot be retried at all.
    pub fn remaining_wait(&self, item: &WorkItem, now: DateTime<Utc>) -> Option<Duration> {
        if !item.can_retry() {
            return None;
        }
        let failed_at = item.last_failure.as_ref().map(|f| f.at).unwrap_or(item.updated_at);
        let elapsed = (now - failed_at).to_std().unwrap_or(Duration::ZERO);
        Some(self.delay_for_attempt(item.retry_count).saturating_sub(elapsed))
    }

    /// Whether `item` may re-enter its phase at `now`.
    pub fn is_due(&self, item: &WorkItem, now: DateTime<Utc>) -> bool {
        self.remaining_wait(item, now) == Some(Duration::ZERO)
    }
}
