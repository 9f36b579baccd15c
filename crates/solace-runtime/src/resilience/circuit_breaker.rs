//! Circuit breaker around one upstream provider.
//!
//! When calls to a provider fail repeatedly the circuit opens and further
//! calls are rejected without touching the network. After the cool-down the
//! next call is let through as a probe; enough probe successes close the
//! circuit again.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures before opening circuit
    pub failure_threshold: u32,

    /// Cool-down before a probe is allowed
    #[serde(with = "crate::config::duration")]
    pub recovery_timeout: Duration,

    /// Probe successes needed to close circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

/// State of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Calls are rejected
    Open,

    /// Probing whether the upstream recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

/// Rejection raised instead of running the protected call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("circuit '{breaker}' is open, retry in {retry_in:?}")]
pub struct CircuitOpen {
    pub breaker: String,
    pub retry_in: Duration,
}

/// Point-in-time view for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
        }
    }
}

/// Three-state circuit breaker.
///
/// All transitions happen under one mutex that is never held across an
/// `.await`, so concurrent callers observe atomic state changes.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `f` as the protected call.
    ///
    /// Returns `CircuitOpen` (through `E: From<CircuitOpen>`) without calling
    /// `f` while the circuit is open and cooling down. Otherwise the outcome
    /// of `f` is recorded and returned unchanged.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpen>,
    {
        self.try_acquire()?;

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    /// Admission check. Moves an elapsed `Open` circuit to `HalfOpen`.
    pub fn try_acquire(&self) -> Result<(), CircuitOpen> {
        self.try_acquire_at(Instant::now())
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    *inner = BreakerInner::closed();
                    tracing::info!(breaker = %self.name, "Circuit closed after successful recovery");
                }
            }
            // A straggler that was admitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> Result<(), CircuitOpen> {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = inner
            .last_failure
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(self.config.recovery_timeout);

        if elapsed >= self.config.recovery_timeout {
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            tracing::info!(breaker = %self.name, "Circuit half-open, probing upstream");
            Ok(())
        } else {
            Err(CircuitOpen {
                breaker: self.name.clone(),
                retry_in: self.config.recovery_timeout - elapsed,
            })
        }
    }

    fn record_failure_at(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                tracing::warn!(breaker = %self.name, "Circuit reopened after failed probe");
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                tracing::warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    "Circuit opened after repeated failures"
                );
            }
            _ => {}
        }
    }

    /// True when a call right now would be rejected.
    ///
    /// Read-only: an `Open` circuit whose cool-down has elapsed reports
    /// `false` and is left for the next call to probe.
    pub fn is_rejecting(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == CircuitState::Open
            && inner
                .last_failure
                .map(|at| at.elapsed() < self.config.recovery_timeout)
                .unwrap_or(false)
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.inner.lock().success_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
        }
    }

    /// Force the circuit closed with zeroed counters.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::closed();
        tracing::info!(breaker = %self.name, "Circuit manually reset");
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("CircuitBreaker")
            .field("name", &snapshot.name)
            .field("state", &snapshot.state)
            .field("failure_count", &snapshot.failure_count)
            .finish()
    }
}
