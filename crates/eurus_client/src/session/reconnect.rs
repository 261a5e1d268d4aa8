//! Reconnect budget and backoff.
//!
//! The attempt counter grows by one per transport failure and resets once a
//! connection reaches `Connected`, so `max_attempts` bounds consecutive
//! failures. Delays double from `initial` up to `max` and are never zero.

use std::time::Duration;

/// Smallest delay ever returned, so a zero config cannot busy-loop.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Exponential backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(MIN_DELAY);
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Constant delay.
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay)
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay before retry number `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// Reconnect attempt bookkeeping for one session run.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    attempt: u32,
    backoff: Backoff,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            attempt: 0,
            backoff,
        }
    }

    /// Count a transport failure. Returns the new attempt number.
    pub fn record_failure(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt
    }

    /// Whether the current attempt is still within budget.
    pub fn should_retry(&self) -> bool {
        self.attempt <= self.max_attempts
    }

    /// Delay before the current attempt.
    pub fn next_delay(&self) -> Duration {
        self.backoff.delay_for(self.attempt)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Forget past failures after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
