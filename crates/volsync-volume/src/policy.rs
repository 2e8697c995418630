//! Timeout and retry policy for remote operations
//!
//! The engine core performs no retries; flaky-operation handling lives
//! here, inside the adapters. Only timeouts are retried — a genuine I/O
//! failure from the remote side means the same request would fail again.

use std::future::Future;
use std::time::Duration;

use volsync_types::{Error, Result, RetryConfig, TimeoutConfig};

/// Combined timeout and retry policy for one remote volume.
#[derive(Debug, Clone, Default)]
pub struct RemotePolicy {
    /// Per-operation time budgets.
    pub timeout: TimeoutConfig,
    /// Retry behavior for timed-out operations.
    pub retry: RetryConfig,
}

impl RemotePolicy {
    /// Run a metadata-class operation under the policy.
    pub async fn op<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(self.timeout.operation, f).await
    }

    /// Run an executed-command operation under the policy.
    pub async fn exec<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(self.timeout.exec, f).await
    }

    async fn run<T, F, Fut>(&self, budget: Duration, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = match tokio::time::timeout(budget, f()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    seconds: budget.as_secs(),
                }),
            };

            match outcome {
                Err(Error::Timeout { seconds }) if attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::debug!(
                        attempt,
                        timeout_secs = seconds,
                        delay_ms = delay.as_millis() as u64,
                        "remote operation timed out, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
