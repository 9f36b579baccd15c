//! End-to-end breaker and fallback behaviour through the public API.
//!
//! Runs on tokio's paused clock, so timeouts and cool-downs elapse
//! instantly and deterministically.

use async_trait::async_trait;
use parking_lot::Mutex;
use solace_core::Conversation;
use solace_runtime::alerting::{AlertError, AlertSink, AlertThrottle};
use solace_runtime::providers::{
    CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use solace_runtime::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, FallbackOrchestrator, FallbackReason,
    OrchestratorError, RetryPolicy, Route,
};
use solace_runtime::BackgroundTasks;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

const HEALTHY: u8 = 0;
const HANGING: u8 = 1;
const QUOTA: u8 = 2;

/// Provider whose behaviour can be switched between calls.
struct SwitchableProvider {
    name: &'static str,
    mode: AtomicU8,
    calls: AtomicU32,
}

impl SwitchableProvider {
    fn new(name: &'static str, mode: u8) -> Arc<Self> {
        Arc::new(Self {
            name,
            mode: AtomicU8::new(mode),
            calls: AtomicU32::new(0),
        })
    }

    fn set(&self, mode: u8) {
        self.mode.store(mode, Ordering::SeqCst);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for SwitchableProvider {
    async fn complete(
        &self,
        _conversation: &Conversation,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode.load(Ordering::SeqCst) {
            HANGING => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Connection("unreachable".into()))
            }
            QUOTA => Err(ProviderError::RateLimited {
                retry_after: None,
                message: "RESOURCE_EXHAUSTED".into(),
            }),
            _ => Ok(CompletionResponse {
                content: format!("answer from {}", self.name),
                usage: TokenUsage::default(),
                model: config.model.clone(),
                stop_reason: None,
            }),
        }
    }

    async fn health_check(&self) -> bool {
        self.mode.load(Ordering::SeqCst) == HEALTHY
    }

    fn name(&self) -> &str {
        self.name
    }
}

#[derive(Default)]
struct Outbox(Mutex<Vec<String>>);

#[async_trait]
impl AlertSink for Outbox {
    async fn deliver(&self, message: &str) -> Result<(), AlertError> {
        self.0.lock().push(message.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "outbox"
    }
}

fn single_attempt() -> RetryPolicy {
    RetryPolicy {
        attempt_timeout: Duration::from_secs(1),
        max_attempts: 1,
        ..RetryPolicy::default()
    }
}

fn prompt() -> Conversation {
    Conversation::from_prompt("how do I stop overthinking?")
}

#[tokio::test(start_paused = true)]
async fn breaker_opens_on_timeouts_and_recovers_through_half_open() {
    let gemini = SwitchableProvider::new("gemini", HANGING);
    let breaker = Arc::new(CircuitBreaker::new(
        "gemini",
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        },
    ));
    let orchestrator = FallbackOrchestrator::builder(
        Route::new(gemini.clone(), "gemini-2.5-flash").with_breaker(breaker.clone()),
    )
    .retry(single_attempt())
    .build()
    .unwrap();

    for _ in 0..3 {
        let err = orchestrator.generate(&prompt()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Upstream { source: ProviderError::Timeout(_), .. }
        ));
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(gemini.calls(), 3);

    // rejected without touching the provider
    let err = orchestrator.generate(&prompt()).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Exhausted { reason: FallbackReason::CircuitOpen, .. }
    ));
    assert_eq!(gemini.calls(), 3);

    gemini.set(HEALTHY);
    tokio::time::advance(Duration::from_secs(30)).await;

    let reply = orchestrator.generate(&prompt()).await.unwrap();
    assert_eq!(reply.text, "answer from gemini");
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    orchestrator.generate(&prompt()).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_probe_reopens_circuit() {
    let gemini = SwitchableProvider::new("gemini", HANGING);
    let breaker = Arc::new(CircuitBreaker::new(
        "gemini",
        CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        },
    ));
    let orchestrator = FallbackOrchestrator::builder(
        Route::new(gemini.clone(), "gemini-2.5-flash").with_breaker(breaker.clone()),
    )
    .retry(single_attempt())
    .build()
    .unwrap();

    orchestrator.generate(&prompt()).await.unwrap_err();
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(30)).await;
    orchestrator.generate(&prompt()).await.unwrap_err();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(gemini.calls(), 2);

    // the cool-down restarted with the failed probe
    tokio::time::advance(Duration::from_secs(29)).await;
    orchestrator.generate(&prompt()).await.unwrap_err();
    assert_eq!(gemini.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn quota_exhaustion_backs_off_to_secondary() {
    let gemini = SwitchableProvider::new("gemini", QUOTA);
    let openai = SwitchableProvider::new("openai", HEALTHY);
    let outbox = Arc::new(Outbox::default());
    let tasks = Arc::new(BackgroundTasks::new());

    let orchestrator = FallbackOrchestrator::builder(Route::new(gemini.clone(), "gemini-2.5-flash"))
        .name("dialogue")
        .secondary(Route::new(openai.clone(), "gpt-4.1"))
        .retry(single_attempt())
        .primary_cooldown(Duration::from_secs(300))
        .alerts(Arc::new(AlertThrottle::new(outbox.clone(), Duration::from_secs(60))))
        .tasks(tasks.clone())
        .build()
        .unwrap();

    let reply = orchestrator.generate(&prompt()).await.unwrap();
    assert!(reply.fell_back);
    assert_eq!(reply.text, "answer from openai");
    assert_eq!(gemini.calls(), 1);

    // inside the cool-down the primary is skipped entirely
    tokio::time::advance(Duration::from_secs(120)).await;
    let reply = orchestrator.generate(&prompt()).await.unwrap();
    assert!(reply.fell_back);
    assert_eq!(gemini.calls(), 1);

    gemini.set(HEALTHY);
    tokio::time::advance(Duration::from_secs(180)).await;
    let reply = orchestrator.generate(&prompt()).await.unwrap();
    assert!(!reply.fell_back);
    assert_eq!(reply.provider, "gemini");
    assert_eq!(openai.calls(), 2);

    tasks.drain().await;
    let alerts = outbox.0.lock().clone();
    // the second fallback fell outside the 60s alert window
    assert_eq!(alerts.len(), 2);
    assert!(alerts[0].contains("resource exhausted"));
    assert!(alerts[1].contains("backoff active"));
}
