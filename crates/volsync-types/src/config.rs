//! Volume-level resilience configuration
//!
//! Retrying flaky remote operations is the volume adapter's job, never the
//! diff/plan/execute pipeline's. These types configure that behavior.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for remote volume operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts beyond the first.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for the backoff.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Delay to sleep before the given retry attempt (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }
        let millis =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

/// Timeouts for single remote operations.
///
/// A timeout that fires during scanning is fatal (an incomplete tree
/// cannot be safely diffed); during transfer it is a per-entry error. That
/// classification happens upstream; here are just the budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Budget for metadata operations (stat, list, mkdir, delete).
    pub operation: Duration,
    /// Budget for executed remote commands (bulk fingerprinting can be
    /// slow on large batches).
    pub exec: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            operation: Duration::from_secs(30),
            exec: Duration::from_secs(120),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(250));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(500));
        assert!(retry.delay_for_attempt(10) <= retry.max_delay);
    }
}
