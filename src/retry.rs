//! Retry policy for Retryable outcomes.
//!
//! Exponential backoff with a fixed retry ceiling. The delay before retry `n`
//! (0-based) is the maximum of:
//! - the collaborator's retry-after hint
//! - `initial * 2^n`, capped at `max_backoff`

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry configuration section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt before the outcome turns Fatal
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 6,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff_ms: initial.as_millis() as u64,
            max_backoff_ms: max.as_millis() as u64,
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Total attempts allowed, first one included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Returns true if another attempt is allowed after `retries_so_far` retries
    pub fn allows_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }

    /// Backoff before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        // 2^20 already dwarfs any sane cap
        let factor = 1u64 << retry.min(20);
        let exp_ms = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        let exp_backoff = Duration::from_millis(exp_ms);

        let delay = match retry_after {
            Some(hint) => hint.max(exp_backoff),
            None => exp_backoff,
        };

        tracing::warn!(
            retry = retry + 1,
            max_retries = self.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Retryable outcome, backing off"
        );

        delay
    }
}
