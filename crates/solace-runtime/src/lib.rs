//! # solace-runtime
//!
//! Resilient AI calls for the Solace companion bot.
//!
//! Everything here sits between the dialogue code and the LLM vendors:
//!
//! - [`resilience`]: circuit breakers, retry with per-attempt timeouts and
//!   the primary/secondary fallback chain
//! - [`providers`]: Gemini and OpenAI adapters behind one [`LlmProvider`] trait
//! - [`gateway`]: named provider chains built from [`config`]
//! - [`cache`]: process-local TTL cache
//! - [`alerting`]: operator alerts with per-key throttling
//! - [`services`]: cached metrics, user context and portraits
//! - [`health`]: the `/health` report
//!
//! ## Example
//!
//! ```rust,ignore
//! use solace_core::Conversation;
//! use solace_runtime::{Gateway, ProviderRegistry, SolaceConfig};
//!
//! let config = SolaceConfig::load("solace.yaml")?;
//! let gateway = Gateway::from_config(&config, &ProviderRegistry::with_defaults())?;
//!
//! let dialogue = gateway.profile("dialogue")?;
//! match dialogue.generate(&Conversation::from_prompt("I can't sleep again")).await {
//!     Ok(reply) => println!("{}", reply.text),
//!     Err(err) => println!("{}", err.user_message()),
//! }
//! ```

pub mod alerting;
pub mod cache;
pub mod config;
pub mod gateway;
pub mod health;
pub mod providers;
pub mod resilience;
pub mod services;
pub mod tasks;

#[cfg(test)]
mod testing;

pub use alerting::{AlertError, AlertOutcome, AlertSink, AlertThrottle, LogAlertSink};
pub use cache::{CacheStats, TtlCache};
pub use config::{ConfigError, SolaceConfig};
pub use gateway::{models_missing_key, Gateway, GatewayError, ModelCheck, ModelOutcome};
pub use health::{DatabaseProbe, HealthChecker, HealthReport, HealthStatus};
pub use providers::{LlmProvider, ProviderError, ProviderRegistry};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, FallbackOrchestrator, Generation,
    OrchestratorError, RetryPolicy, Route, TextGenerator,
};
pub use services::{StoreError, UserStore};
pub use tasks::BackgroundTasks;

#[cfg(feature = "telegram")]
pub use alerting::TelegramAlertSink;
