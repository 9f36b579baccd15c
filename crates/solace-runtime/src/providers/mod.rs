//! LLM provider abstractions for solace-runtime.
//!
//! This module defines the trait for LLM providers and the typed error
//! hierarchy every adapter maps its vendor's failures into. The retry
//! wrapper and the fallback orchestrator only ever look at
//! [`ProviderError`] variants, never at error text.
//!
//! ## Security
//!
//! All providers use the [`secrets`] module for credential handling.
//! See [`ApiCredential`] for the recommended patterns.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use solace_core::Conversation;
use std::time::Duration;
use thiserror::Error;

use crate::resilience::CircuitOpen;

mod factory;
pub mod secrets;

#[cfg(feature = "gemini")]
mod gemini;

#[cfg(feature = "openai")]
mod openai;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "gemini")]
pub use gemini::{GeminiProvider, GeminiProviderFactory};

#[cfg(feature = "openai")]
pub use openai::{OpenAiProvider, OpenAiProviderFactory};

/// Sampling temperature used for dialogue unless configured otherwise.
pub const DEFAULT_TEMPERATURE: f32 = 0.8;

/// Errors from LLM providers.
///
/// | variant        | transient | resource exhausted |
/// |----------------|-----------|--------------------|
/// | `RateLimited`  | yes       | yes                |
/// | `Unavailable`  | yes       | yes                |
/// | `Timeout`      | yes       | yes                |
/// | `Connection`   | yes       | yes                |
/// | `ApiError` 5xx | yes       | no                 |
/// | everything else| no        | no                 |
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limit exceeded ({message}), retry after {retry_after:?}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("Service unavailable: {status} - {message}")]
    Unavailable { status: u16, message: String },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Bad request: {status} - {message}")]
    BadRequest { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Provider returned an empty response")]
    EmptyResponse,

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),
}

impl ProviderError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. }
            | ProviderError::Unavailable { .. }
            | ProviderError::Timeout(_)
            | ProviderError::Connection(_) => true,
            ProviderError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether the upstream signalled it cannot take more load right now.
    ///
    /// Only capacity failures justify moving to another provider; an
    /// authorization failure never does.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Unavailable { .. }
                | ProviderError::Timeout(_)
                | ProviderError::Connection(_)
        )
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ProviderError::CircuitOpen(_))
    }

    /// Server-provided hint for when to try again.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after, .. } => *retry_after,
            ProviderError::CircuitOpen(open) => Some(open.retry_in),
            _ => None,
        }
    }

    /// Short machine-friendly label for logs and alerts.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Connection(_) => "connection",
            ProviderError::RateLimited { .. } => "rate_limited",
            ProviderError::Unavailable { .. } => "unavailable",
            ProviderError::ApiError { .. } => "api_error",
            ProviderError::BadRequest { .. } => "bad_request",
            ProviderError::AuthError(_) => "auth",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::ParseError(_) => "parse",
            ProviderError::EmptyResponse => "empty_response",
            ProviderError::NotConfigured(_) => "not_configured",
            ProviderError::CircuitOpen(_) => "circuit_open",
        }
    }
}

/// Map an HTTP status code to the typed hierarchy.
///
/// Adapters call this after handling the vendor-specific error codes they
/// know about.
pub fn classify_status(
    status: u16,
    message: impl Into<String>,
    retry_after: Option<Duration>,
) -> ProviderError {
    let message = message.into();
    match status {
        429 => ProviderError::RateLimited {
            retry_after,
            message,
        },
        401 | 403 => ProviderError::AuthError(message),
        502 | 503 | 504 | 529 => ProviderError::Unavailable { status, message },
        400..=499 => ProviderError::BadRequest { status, message },
        _ => ProviderError::ApiError { status, message },
    }
}

lazy_static! {
    static ref RETRY_IN: Option<Regex> = Regex::new(r"(?i)retry in (\d+(?:\.\d+)?)\s*s").ok();
}

/// Extract a "retry in 12.5s" hint from vendor error text.
pub fn retry_hint_from_message(message: &str) -> Option<Duration> {
    let caps = RETRY_IN.as_ref()?.captures(message)?;
    let secs: f64 = caps.get(1)?.as_str().parse().ok()?;
    hint_from_secs(secs)
}

/// Seconds from vendor text as a `Duration`; `None` when negative or out of range.
pub(crate) fn hint_from_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// Parse a `Retry-After` header given in whole seconds.
pub fn parse_retry_after_header(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Map a transport-level failure.
#[cfg(feature = "reqwest")]
pub(crate) fn map_transport_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if err.is_decode() {
        ProviderError::ParseError(err.to_string())
    } else {
        ProviderError::Connection(err.to_string())
    }
}

/// Configuration for a completion request.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Model to use
    pub model: String,

    /// Maximum tokens to generate (provider default when unset)
    pub max_tokens: Option<u32>,

    pub temperature: f32,

    /// Request timeout
    pub timeout: Duration,
}

impl CompletionConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            max_tokens: None,
            temperature: DEFAULT_TEMPERATURE,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Response from an LLM completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,

    pub usage: TokenUsage,

    /// Model used
    pub model: String,

    pub stop_reason: Option<String>,
}

/// Token usage from a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Provider abstraction allows swapping LLM backends.
///
/// Implementations must translate every failure into a [`ProviderError`]
/// variant; callers classify on the variant alone.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a chat completion.
    async fn complete(
        &self,
        conversation: &Conversation,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Count prompt tokens for a conversation.
    ///
    /// Providers without a counting endpoint fall back to the estimate.
    async fn count_tokens(
        &self,
        conversation: &Conversation,
        _model: &str,
    ) -> Result<u32, ProviderError> {
        Ok(self.estimate_tokens(&conversation.transcript()))
    }

    /// Check if provider is healthy.
    async fn health_check(&self) -> bool;

    /// Model ids the account may call, or `None` when the vendor has no catalogue.
    async fn list_models(&self) -> Result<Option<Vec<String>>, ProviderError> {
        Ok(None)
    }

    /// Get provider name for metrics.
    fn name(&self) -> &str;

    /// Estimate tokens for a prompt.
    fn estimate_tokens(&self, text: &str) -> u32 {
        // ~4 chars per token
        (text.chars().count() / 4) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
        };
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(429, "slow down", None), ProviderError::RateLimited { .. }));
        assert!(matches!(classify_status(403, "forbidden", None), ProviderError::AuthError(_)));
        assert!(matches!(classify_status(401, "unauthorized", None), ProviderError::AuthError(_)));
        assert!(matches!(classify_status(503, "overloaded", None), ProviderError::Unavailable { .. }));
        assert!(matches!(classify_status(400, "bad request", None), ProviderError::BadRequest { .. }));
        assert!(matches!(classify_status(500, "internal", None), ProviderError::ApiError { .. }));
    }

    #[test]
    fn test_server_errors_transient_but_not_exhausted() {
        let err = classify_status(500, "internal", None);
        assert!(err.is_transient());
        assert!(!err.is_resource_exhausted());
    }

    #[test]
    fn test_forbidden_is_never_capacity() {
        let err = classify_status(403, "quota project forbidden", None);
        assert!(!err.is_transient());
        assert!(!err.is_resource_exhausted());
    }

    #[test]
    fn test_timeout_and_connection_are_exhaustion() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_resource_exhausted());
        assert!(ProviderError::Connection("reset by peer".into()).is_resource_exhausted());
        assert!(!ProviderError::EmptyResponse.is_transient());
    }

    #[test]
    fn test_retry_hints() {
        assert_eq!(
            retry_hint_from_message("Quota exceeded. Please retry in 37.5s."),
            Some(Duration::from_millis(37_500))
        );
        assert_eq!(retry_hint_from_message("no hint here"), None);
        assert_eq!(parse_retry_after_header(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after_header("soon"), None);
    }

    #[test]
    fn test_out_of_range_retry_hint_is_dropped() {
        assert_eq!(
            retry_hint_from_message("quota exceeded, retry in 99999999999999999999999s"),
            None
        );
        assert_eq!(hint_from_secs(f64::NAN), None);
        assert_eq!(hint_from_secs(-1.0), None);

        let err = classify_status(
            429,
            "quota exceeded, retry in 99999999999999999999999s".to_string(),
            retry_hint_from_message("quota exceeded, retry in 99999999999999999999999s"),
        );
        assert!(matches!(err, ProviderError::RateLimited { retry_after: None, .. }));
    }

    proptest! {
        #[test]
        fn client_errors_are_terminal_except_429(status in 400u16..500) {
            let err = classify_status(status, "x", None);
            if status == 429 {
                prop_assert!(err.is_transient());
                prop_assert!(err.is_resource_exhausted());
            } else {
                prop_assert!(!err.is_transient());
                prop_assert!(!err.is_resource_exhausted());
            }
        }

        #[test]
        fn server_errors_are_transient(status in 500u16..600) {
            prop_assert!(classify_status(status, "x", None).is_transient());
        }

        #[test]
        fn exhaustion_implies_transient(status in 100u16..600) {
            let err = classify_status(status, "x", None);
            prop_assert!(!err.is_resource_exhausted() || err.is_transient());
        }
    }
}
