//! Exponential backoff schedule for delivery retries

use std::time::Duration;

/// Backoff parameters for one channel dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts (the first attempt included)
    pub max_attempts: u32,

    /// Base delay for exponential backoff
    pub base_delay: Duration,

    /// Cap on a single backoff sleep
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(900),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Sleep after a failed attempt `n` (0-indexed): `base_delay * 2^n`,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Whether another attempt may follow attempt `n` (0-indexed)
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}
