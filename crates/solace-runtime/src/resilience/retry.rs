//! Per-attempt timeout plus bounded exponential retry.
//!
//! Only [`ProviderError::is_transient`] errors are retried. Terminal errors
//! return after the first attempt, and once the budget is spent the last
//! error is returned unchanged.

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use super::CircuitBreaker;
use crate::providers::ProviderError;

/// Retry and timeout settings for one upstream operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Wall-clock bound for a single attempt
    #[serde(with = "crate::config::duration")]
    pub attempt_timeout: Duration,

    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles afterwards
    #[serde(with = "crate::config::duration")]
    pub backoff_base: Duration,

    /// Upper bound for any single delay
    #[serde(with = "crate::config::duration")]
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(10),
            max_attempts: 2,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.backoff_base)
            .with_max_delay(self.backoff_cap.max(self.backoff_base))
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Run `op` until it succeeds, fails terminally or the budget is spent.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let timeout = self.attempt_timeout;
        let mut attempt = 0u32;

        let attempt_once = || {
            attempt += 1;
            let current = attempt;
            let fut = op();
            async move {
                tracing::trace!(attempt = current, "Upstream attempt");
                tokio::time::timeout(timeout, fut)
                    .await
                    .unwrap_or(Err(ProviderError::Timeout(timeout)))
            }
        };

        attempt_once
            .retry(self.backoff())
            .sleep(tokio::time::sleep)
            .when(|err: &ProviderError| err.is_transient())
            .notify(|err: &ProviderError, delay: Duration| {
                tracing::debug!(
                    error = %err,
                    kind = err.kind(),
                    delay_ms = delay.as_millis() as u64,
                    "Transient upstream failure, retrying"
                );
            })
            .await
    }

    /// Run the whole retry loop as one protected call of `breaker`.
    ///
    /// The breaker sees a single outcome per logical operation, so its
    /// thresholds track sustained health rather than individual attempts.
    pub async fn run_guarded<T, F, Fut>(
        &self,
        breaker: &CircuitBreaker,
        op: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        breaker.call(|| self.run(op)).await
    }
}
