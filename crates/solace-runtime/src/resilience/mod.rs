//! Resilience primitives for upstream AI calls.
//!
//! - [`CircuitBreaker`]: per-provider Closed/Open/HalfOpen gate
//! - [`RetryPolicy`]: per-attempt timeout plus bounded exponential retry
//! - [`PrimaryBackoff`]: cool-down hint after the primary runs out of capacity
//! - [`FallbackOrchestrator`]: primary first, then ordered secondaries

mod backoff;
mod circuit_breaker;
mod fallback;
mod retry;

pub use backoff::{PrimaryBackoff, DEFAULT_PRIMARY_COOLDOWN, MIN_PRIMARY_COOLDOWN};
pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitState,
};
pub use fallback::{
    FailedAttempt, FallbackOrchestrator, FallbackOrchestratorBuilder, FallbackReason, Generation,
    OrchestratorError, Route, TextGenerator, ALERT_FALLBACK_FAILED, ALERT_FALLBACK_PRIMARY,
};
pub use retry::RetryPolicy;
