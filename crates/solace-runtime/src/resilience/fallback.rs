//! Primary/secondary provider chain.
//!
//! A [`FallbackOrchestrator`] owns one primary [`Route`] and an ordered list
//! of secondaries. The primary gets the full retry budget inside its circuit
//! breaker; secondaries are tried once each, in order, only when the primary
//! is known to be unavailable or reports resource exhaustion. Any other
//! primary failure goes straight back to the caller.
//!
//! Every attempt is sequential. Operator alerts are spawned on
//! [`BackgroundTasks`] and never awaited by the request.

use async_trait::async_trait;
use solace_core::{Conversation, DomainError};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::{CircuitBreaker, PrimaryBackoff, RetryPolicy, DEFAULT_PRIMARY_COOLDOWN};
use crate::alerting::{AlertThrottle, LogAlertSink, DEFAULT_ALERT_WINDOW};
use crate::providers::{
    CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
    DEFAULT_TEMPERATURE,
};
use crate::tasks::BackgroundTasks;

/// Alert key used when a request is served by a secondary.
pub const ALERT_FALLBACK_PRIMARY: &str = "fallback_primary";

/// Alert key used when no provider produced an answer.
pub const ALERT_FALLBACK_FAILED: &str = "fallback_failed";

/// One provider/model pair, optionally behind a circuit breaker.
#[derive(Clone)]
pub struct Route {
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
    pub breaker: Option<Arc<CircuitBreaker>>,
    pub max_tokens: Option<u32>,
    pub temperature: f32,
}

impl Route {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            breaker: None,
            max_tokens: None,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn completion_config(&self, timeout: Duration) -> CompletionConfig {
        CompletionConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout,
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("breaker", &self.breaker.as_ref().map(|b| b.name().to_string()))
            .finish()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider.name(), self.model)
    }
}

/// A successful generation.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub provider: String,
    pub model: String,
    /// Served by a secondary
    pub fell_back: bool,
    pub usage: TokenUsage,
}

/// Why the primary was skipped.
#[derive(Debug, Clone)]
pub enum FallbackReason {
    CircuitOpen,
    Backoff { remaining: Duration },
    ResourceExhausted(ProviderError),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::CircuitOpen => write!(f, "circuit open"),
            FallbackReason::Backoff { remaining } => {
                write!(f, "backoff active (~{}s left)", remaining.as_secs().max(1))
            }
            FallbackReason::ResourceExhausted(err) => write!(f, "resource exhausted: {}", err),
        }
    }
}

/// A secondary that did not produce an answer.
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    pub provider: String,
    pub model: String,
    pub error: ProviderError,
}

impl fmt::Display for FailedAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.provider, self.model, self.error)
    }
}

/// Errors from the fallback orchestrator.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] DomainError),

    #[error("Orchestrator not configured: {0}")]
    NotConfigured(String),

    #[error("{provider}/{model} failed: {source}")]
    Upstream {
        provider: String,
        model: String,
        #[source]
        source: ProviderError,
    },

    #[error("All providers failed (primary skipped: {reason}; {} secondary attempts)", attempts.len())]
    Exhausted {
        reason: FallbackReason,
        attempts: Vec<FailedAttempt>,
    },
}

impl OrchestratorError {
    /// Text suitable for the end user of the chat.
    pub fn user_message(&self) -> &'static str {
        match self {
            OrchestratorError::InvalidRequest(_) => {
                "I didn't catch anything in your message. Could you write a little more?"
            }
            OrchestratorError::Upstream { source, .. } if !source.is_transient() => {
                "Sorry, I can't answer right now. Please try again a bit later."
            }
            _ => {
                "Sorry, the model is overloaded right now. Please resend your last message! \
                 If the error repeats, end the session."
            }
        }
    }
}

/// The plain callable handed to dialogue code.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, conversation: &Conversation) -> Result<String, OrchestratorError>;
}

/// Runs a conversation against a primary route with ordered fallbacks.
pub struct FallbackOrchestrator {
    name: String,
    primary: Route,
    secondaries: Vec<Route>,
    retry: RetryPolicy,
    /// Single attempt, same timeout
    secondary_retry: RetryPolicy,
    backoff: PrimaryBackoff,
    alerts: Arc<AlertThrottle>,
    tasks: Arc<BackgroundTasks>,
}

impl FallbackOrchestrator {
    pub fn builder(primary: Route) -> FallbackOrchestratorBuilder {
        FallbackOrchestratorBuilder::new(primary)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backoff(&self) -> &PrimaryBackoff {
        &self.backoff
    }

    /// Generate a reply, falling back to secondaries when the primary is
    /// unavailable for capacity reasons.
    pub async fn generate(&self, conversation: &Conversation) -> Result<Generation, OrchestratorError> {
        conversation.validate()?;
        let has_secondaries = !self.secondaries.is_empty();

        let skipped = if self.primary_rejecting() {
            Some(FallbackReason::CircuitOpen)
        } else if has_secondaries {
            self.backoff
                .remaining()
                .map(|remaining| FallbackReason::Backoff { remaining })
        } else {
            None
        };

        let reason = match skipped {
            Some(reason) => reason,
            None => match self.run_route(&self.primary, &self.retry, conversation).await {
                Ok(generation) => {
                    self.backoff.clear();
                    return Ok(generation);
                }
                Err(err) if err.is_circuit_open() => FallbackReason::CircuitOpen,
                Err(err) if err.is_resource_exhausted() && has_secondaries => {
                    self.backoff.activate();
                    tracing::warn!(
                        profile = %self.name,
                        route = %self.primary,
                        cooldown_secs = self.backoff.cooldown().as_secs(),
                        error = %err,
                        "Primary out of capacity, backing off"
                    );
                    FallbackReason::ResourceExhausted(err)
                }
                Err(err) => {
                    tracing::error!(
                        profile = %self.name,
                        route = %self.primary,
                        kind = err.kind(),
                        error = %err,
                        "Primary provider failed"
                    );
                    return Err(OrchestratorError::Upstream {
                        provider: self.primary.provider_name().to_string(),
                        model: self.primary.model.clone(),
                        source: err,
                    });
                }
            },
        };

        self.fall_back(conversation, reason).await
    }

    /// Count prompt tokens with the primary provider. No fallback.
    pub async fn count_tokens(&self, conversation: &Conversation) -> Result<u32, OrchestratorError> {
        let route = &self.primary;
        let model = route.model.as_str();
        let provider = &route.provider;

        self.protected(route, &self.retry, || async move {
            provider.count_tokens(conversation, model).await
        })
        .await
        .map_err(|source| OrchestratorError::Upstream {
            provider: route.provider_name().to_string(),
            model: route.model.clone(),
            source,
        })
    }

    fn primary_rejecting(&self) -> bool {
        self.primary
            .breaker
            .as_ref()
            .map(|b| b.is_rejecting())
            .unwrap_or(false)
    }

    async fn fall_back(
        &self,
        conversation: &Conversation,
        reason: FallbackReason,
    ) -> Result<Generation, OrchestratorError> {
        if !self.secondaries.is_empty() {
            tracing::warn!(
                profile = %self.name,
                route = %self.primary,
                reason = %reason,
                "Switching to fallback providers"
            );
            self.alert(
                ALERT_FALLBACK_PRIMARY,
                format!(
                    "Fallback triggered for '{}': primary {} skipped ({})",
                    self.name, self.primary, reason
                ),
            );
        }

        let mut attempts = Vec::with_capacity(self.secondaries.len());
        for route in &self.secondaries {
            match self.run_route(route, &self.secondary_retry, conversation).await {
                Ok(mut generation) => {
                    tracing::info!(profile = %self.name, route = %route, "Fallback provider answered");
                    generation.fell_back = true;
                    return Ok(generation);
                }
                Err(err) => {
                    tracing::warn!(
                        profile = %self.name,
                        route = %route,
                        kind = err.kind(),
                        error = %err,
                        "Fallback provider failed"
                    );
                    attempts.push(FailedAttempt {
                        provider: route.provider_name().to_string(),
                        model: route.model.clone(),
                        error: err,
                    });
                }
            }
        }

        tracing::error!(
            profile = %self.name,
            reason = %reason,
            attempts = attempts.len(),
            "No provider produced an answer"
        );
        let tried: Vec<String> = self.secondaries.iter().map(|r| r.to_string()).collect();
        self.alert(
            ALERT_FALLBACK_FAILED,
            format!(
                "Fallback failed for '{}': none of [{}] answered",
                self.name,
                tried.join(", ")
            ),
        );

        Err(OrchestratorError::Exhausted { reason, attempts })
    }

    /// One generation on `route` under `policy`; blank text is a failure.
    async fn run_route(
        &self,
        route: &Route,
        policy: &RetryPolicy,
        conversation: &Conversation,
    ) -> Result<Generation, ProviderError> {
        let config = route.completion_config(policy.attempt_timeout);
        let config = &config;
        let provider = &route.provider;

        let response: CompletionResponse = self
            .protected(route, policy, || async move {
                let response = provider.complete(conversation, config).await?;
                if response.content.trim().is_empty() {
                    return Err(ProviderError::EmptyResponse);
                }
                Ok(response)
            })
            .await?;

        Ok(Generation {
            text: response.content,
            provider: route.provider_name().to_string(),
            model: route.model.clone(),
            fell_back: false,
            usage: response.usage,
        })
    }

    async fn protected<T, F, Fut>(
        &self,
        route: &Route,
        policy: &RetryPolicy,
        op: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        match &route.breaker {
            Some(breaker) => policy.run_guarded(breaker, op).await,
            None => policy.run(op).await,
        }
    }

    fn alert(&self, key: &'static str, message: String) {
        let alerts = self.alerts.clone();
        self.tasks.spawn("alert", async move {
            alerts.notify(Some(key), &message).await;
        });
    }
}

impl fmt::Debug for FallbackOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackOrchestrator")
            .field("name", &self.name)
            .field("primary", &self.primary)
            .field("secondaries", &self.secondaries)
            .field("retry", &self.retry)
            .finish()
    }
}

#[async_trait]
impl TextGenerator for FallbackOrchestrator {
    async fn generate_text(&self, conversation: &Conversation) -> Result<String, OrchestratorError> {
        self.generate(conversation).await.map(|g| g.text)
    }
}

/// Builder for [`FallbackOrchestrator`].
pub struct FallbackOrchestratorBuilder {
    name: String,
    primary: Route,
    secondaries: Vec<Route>,
    retry: RetryPolicy,
    primary_cooldown: Duration,
    alerts: Option<Arc<AlertThrottle>>,
    tasks: Option<Arc<BackgroundTasks>>,
}

impl FallbackOrchestratorBuilder {
    pub fn new(primary: Route) -> Self {
        Self {
            name: "default".to_string(),
            primary,
            secondaries: Vec::new(),
            retry: RetryPolicy::default(),
            primary_cooldown: DEFAULT_PRIMARY_COOLDOWN,
            alerts: None,
            tasks: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append a secondary; order of calls is the order of attempts.
    pub fn secondary(mut self, route: Route) -> Self {
        self.secondaries.push(route);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn primary_cooldown(mut self, cooldown: Duration) -> Self {
        self.primary_cooldown = cooldown;
        self
    }

    pub fn alerts(mut self, alerts: Arc<AlertThrottle>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn tasks(mut self, tasks: Arc<BackgroundTasks>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn build(self) -> Result<FallbackOrchestrator, OrchestratorError> {
        if self.retry.max_attempts == 0 {
            return Err(OrchestratorError::NotConfigured(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        let secondary_retry = RetryPolicy {
            max_attempts: 1,
            ..self.retry.clone()
        };

        Ok(FallbackOrchestrator {
            name: self.name,
            primary: self.primary,
            secondaries: self.secondaries,
            retry: self.retry,
            secondary_retry,
            backoff: PrimaryBackoff::new(self.primary_cooldown),
            alerts: self.alerts.unwrap_or_else(|| {
                Arc::new(AlertThrottle::new(Arc::new(LogAlertSink), DEFAULT_ALERT_WINDOW))
            }),
            tasks: self.tasks.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitBreakerConfig, CircuitState};
    use crate::testing::{RecordingSink, ScriptedProvider, Step};

    struct Harness {
        sink: Arc<RecordingSink>,
        tasks: Arc<BackgroundTasks>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                sink: Arc::new(RecordingSink::default()),
                tasks: Arc::new(BackgroundTasks::new()),
            }
        }

        fn builder(&self, primary: Route) -> FallbackOrchestratorBuilder {
            FallbackOrchestrator::builder(primary)
                .name("dialogue")
                .alerts(Arc::new(AlertThrottle::new(self.sink.clone(), DEFAULT_ALERT_WINDOW)))
                .tasks(self.tasks.clone())
        }

        async fn alerts(&self) -> Vec<String> {
            self.tasks.drain().await;
            self.sink.messages()
        }
    }

    fn rate_limited() -> ProviderError {
        ProviderError::RateLimited {
            retry_after: None,
            message: "quota".into(),
        }
    }

    fn breaker(name: &str, threshold: u32) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            name,
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(30),
                success_threshold: 2,
            },
        ))
    }

    fn hello() -> Conversation {
        Conversation::from_prompt("hello")
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_success() {
        let h = Harness::new();
        let primary = Arc::new(ScriptedProvider::replying("gemini", "hi there"));
        let secondary = Arc::new(ScriptedProvider::replying("openai", "fallback"));
        let orchestrator = h
            .builder(Route::new(primary.clone(), "gemini-2.5-flash"))
            .secondary(Route::new(secondary.clone(), "gpt-4.1"))
            .build()
            .unwrap();

        let generation = orchestrator.generate(&hello()).await.unwrap();
        assert_eq!(generation.text, "hi there");
        assert_eq!(generation.provider, "gemini");
        assert!(!generation.fell_back);
        assert_eq!(secondary.calls(), 0);
        assert!(h.alerts().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_falls_back_and_sets_backoff() {
        let h = Harness::new();
        let primary = Arc::new(ScriptedProvider::failing("gemini", rate_limited()));
        let secondary = Arc::new(ScriptedProvider::replying("openai", "from openai"));
        let orchestrator = h
            .builder(Route::new(primary.clone(), "gemini-2.5-flash"))
            .secondary(Route::new(secondary.clone(), "gpt-4.1"))
            .build()
            .unwrap();

        let generation = orchestrator.generate(&hello()).await.unwrap();
        assert!(generation.fell_back);
        assert_eq!(generation.model, "gpt-4.1");
        // full retry budget on the primary
        assert_eq!(primary.calls(), 2);
        assert!(orchestrator.backoff().is_active());

        // while backing off the primary is not called at all
        orchestrator.generate(&hello()).await.unwrap();
        assert_eq!(primary.calls(), 2);
        assert_eq!(secondary.calls(), 2);

        let alerts = h.alerts().await;
        assert_eq!(alerts.len(), 1, "second fallback alert is throttled");
        assert!(alerts[0].contains("resource exhausted"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_primary_error_propagates() {
        let h = Harness::new();
        let primary = Arc::new(ScriptedProvider::failing(
            "gemini",
            ProviderError::AuthError("403 forbidden".into()),
        ));
        let secondary = Arc::new(ScriptedProvider::replying("openai", "unused"));
        let orchestrator = h
            .builder(Route::new(primary.clone(), "gemini-2.5-flash"))
            .secondary(Route::new(secondary.clone(), "gpt-4.1"))
            .build()
            .unwrap();

        let err = orchestrator.generate(&hello()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Upstream { source: ProviderError::AuthError(_), .. }
        ));
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 0);
        assert!(!orchestrator.backoff().is_active());
        assert!(h.alerts().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_without_secondary_propagates() {
        let h = Harness::new();
        let primary = Arc::new(ScriptedProvider::failing("gemini", rate_limited()));
        let orchestrator = h
            .builder(Route::new(primary.clone(), "gemini-2.5-flash"))
            .build()
            .unwrap();

        let err = orchestrator.generate(&hello()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Upstream { .. }));
        assert!(!orchestrator.backoff().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_skips_primary() {
        let h = Harness::new();
        let primary = Arc::new(ScriptedProvider::replying("gemini", "primary"));
        let secondary = Arc::new(ScriptedProvider::replying("openai", "secondary"));
        let gemini_breaker = breaker("gemini", 1);
        gemini_breaker.record_failure();

        let orchestrator = h
            .builder(Route::new(primary.clone(), "gemini-2.5-flash").with_breaker(gemini_breaker))
            .secondary(Route::new(secondary.clone(), "gpt-4.1"))
            .build()
            .unwrap();

        let generation = orchestrator.generate(&hello()).await.unwrap();
        assert_eq!(generation.text, "secondary");
        assert_eq!(primary.calls(), 0);
        assert!(h.alerts().await[0].contains("circuit open"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_secondaries_in_order_and_blank_text_fails() {
        let h = Harness::new();
        let primary = Arc::new(ScriptedProvider::failing(
            "gemini",
            ProviderError::Unavailable {
                status: 503,
                message: "overloaded".into(),
            },
        ));
        let first = Arc::new(ScriptedProvider::replying("openai", "   "));
        let second = Arc::new(ScriptedProvider::replying("openai-backup", "second answer"));

        let orchestrator = h
            .builder(Route::new(primary, "gemini-2.5-flash"))
            .secondary(Route::new(first.clone(), "gpt-4.1"))
            .secondary(Route::new(second.clone(), "gpt-5-chat-latest"))
            .build()
            .unwrap();

        let generation = orchestrator.generate(&hello()).await.unwrap();
        assert_eq!(generation.text, "second answer");
        assert_eq!(generation.model, "gpt-5-chat-latest");
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_fail_is_exhausted() {
        let h = Harness::new();
        let primary = Arc::new(ScriptedProvider::failing("gemini", rate_limited()));
        let secondary = Arc::new(ScriptedProvider::new("openai").then(Step::Hang));

        let orchestrator = h
            .builder(Route::new(primary, "gemini-2.5-flash"))
            .secondary(Route::new(secondary.clone(), "gpt-4.1"))
            .build()
            .unwrap();

        let err = orchestrator.generate(&hello()).await.unwrap_err();
        match &err {
            OrchestratorError::Exhausted { reason, attempts } => {
                assert!(matches!(reason, FallbackReason::ResourceExhausted(_)));
                assert_eq!(attempts.len(), 1);
                assert!(matches!(attempts[0].error, ProviderError::Timeout(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
        // secondaries get a single attempt
        assert_eq!(secondary.calls(), 1);
        assert!(err.user_message().contains("overloaded"));

        let alerts = h.alerts().await;
        assert_eq!(alerts.len(), 2);
        assert!(alerts[1].starts_with("Fallback failed for 'dialogue'"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejecting_secondary_breaker_counts_as_failure() {
        let h = Harness::new();
        let primary = Arc::new(ScriptedProvider::failing("gemini", rate_limited()));
        let secondary = Arc::new(ScriptedProvider::replying("openai", "unused"));
        let openai_breaker = breaker("openai", 1);
        openai_breaker.record_failure();

        let orchestrator = h
            .builder(Route::new(primary, "gemini-2.5-flash"))
            .secondary(Route::new(secondary.clone(), "gpt-4.1").with_breaker(openai_breaker))
            .build()
            .unwrap();

        let err = orchestrator.generate(&hello()).await.unwrap_err();
        match err {
            OrchestratorError::Exhausted { attempts, .. } => {
                assert!(attempts[0].error.is_circuit_open());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_success_clears_backoff() {
        let h = Harness::new();
        let primary = Arc::new(
            ScriptedProvider::failing("gemini", rate_limited())
                .then(Step::Fail(rate_limited()))
                .then(Step::Reply("back again".into())),
        );
        let secondary = Arc::new(ScriptedProvider::replying("openai", "fallback"));
        let orchestrator = h
            .builder(Route::new(primary.clone(), "gemini-2.5-flash"))
            .secondary(Route::new(secondary, "gpt-4.1"))
            .primary_cooldown(Duration::from_secs(5))
            .build()
            .unwrap();

        assert!(orchestrator.generate(&hello()).await.unwrap().fell_back);
        tokio::time::advance(Duration::from_secs(5)).await;

        let generation = orchestrator.generate(&hello()).await.unwrap();
        assert_eq!(generation.text, "back again");
        assert!(!orchestrator.backoff().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_primary_text_is_terminal() {
        let h = Harness::new();
        let primary = Arc::new(ScriptedProvider::replying("gemini", ""));
        let secondary = Arc::new(ScriptedProvider::replying("openai", "unused"));
        let orchestrator = h
            .builder(Route::new(primary.clone(), "gemini-2.5-flash"))
            .secondary(Route::new(secondary.clone(), "gpt-4.1"))
            .build()
            .unwrap();

        let err = orchestrator.generate(&hello()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Upstream { source: ProviderError::EmptyResponse, .. }
        ));
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_conversation_rejected_without_calls() {
        let h = Harness::new();
        let primary = Arc::new(ScriptedProvider::replying("gemini", "x"));
        let orchestrator = h
            .builder(Route::new(primary.clone(), "gemini-2.5-flash"))
            .build()
            .unwrap();

        let err = orchestrator
            .generate_text(&Conversation::from_prompt("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest(_)));
        assert_eq!(primary.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_tokens_uses_primary_breaker() {
        let h = Harness::new();
        let primary = Arc::new(ScriptedProvider::replying("gemini", "x"));
        let gemini_breaker = breaker("gemini", 1);
        let orchestrator = h
            .builder(Route::new(primary, "gemini-2.5-flash").with_breaker(gemini_breaker.clone()))
            .build()
            .unwrap();

        let conversation = Conversation::from_prompt("a".repeat(40));
        assert_eq!(orchestrator.count_tokens(&conversation).await.unwrap(), 11);

        gemini_breaker.record_failure();
        assert_eq!(gemini_breaker.state(), CircuitState::Open);
        let err = orchestrator.count_tokens(&conversation).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Upstream { source: ProviderError::CircuitOpen(_), .. }
        ));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let primary = Arc::new(ScriptedProvider::new("gemini"));
        let result = FallbackOrchestrator::builder(Route::new(primary, "m"))
            .retry(RetryPolicy {
                max_attempts: 0,
                ..Default::default()
            })
            .build();
        assert!(matches!(result, Err(OrchestratorError::NotConfigured(_))));
    }
}
