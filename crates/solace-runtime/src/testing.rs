//! Test doubles shared by unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use solace_core::{Conversation, MetricCounts, MoodScore, TestResult, UserMessage};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use crate::alerting::{AlertError, AlertSink};
use crate::services::{StoreError, UserStore};
use crate::providers::{
    CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};

pub(crate) enum Step {
    Reply(String),
    Fail(ProviderError),
    /// Never answers within any reasonable timeout
    Hang,
}

/// Provider that replays a script; the last step repeats forever.
pub(crate) struct ScriptedProvider {
    name: String,
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
    models: Option<Vec<String>>,
}

impl ScriptedProvider {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            steps: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            models: None,
        }
    }

    pub(crate) fn replying(name: &str, text: &str) -> Self {
        Self::new(name).then(Step::Reply(text.to_string()))
    }

    pub(crate) fn failing(name: &str, err: ProviderError) -> Self {
        Self::new(name).then(Step::Fail(err))
    }

    pub(crate) fn then(self, step: Step) -> Self {
        self.steps.lock().push_back(step);
        self
    }

    /// Advertise a model catalogue.
    pub(crate) fn with_models(mut self, models: &[&str]) -> Self {
        self.models = Some(models.iter().map(|m| m.to_string()).collect());
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock();
        let step = if steps.len() > 1 { steps.pop_front() } else { None };
        match step {
            Some(step) => step,
            None => match steps.front() {
                Some(Step::Reply(text)) => Step::Reply(text.clone()),
                Some(Step::Fail(err)) => Step::Fail(err.clone()),
                Some(Step::Hang) => Step::Hang,
                None => Step::Reply(format!("reply from {}", self.name)),
            },
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        conversation: &Conversation,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Reply(content) => Ok(CompletionResponse {
                usage: TokenUsage {
                    prompt_tokens: self.estimate_tokens(&conversation.transcript()),
                    completion_tokens: self.estimate_tokens(&content),
                },
                content,
                model: config.model.clone(),
                stop_reason: Some("stop".to_string()),
            }),
            Step::Fail(err) => Err(err),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Timeout(Duration::from_secs(3600)))
            }
        }
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Option<Vec<String>>, ProviderError> {
        Ok(self.models.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Alert sink that keeps every delivered message.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) delivered: Mutex<Vec<String>>,
    pub(crate) fail: bool,
}

impl RecordingSink {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn deliver(&self, message: &str) -> Result<(), AlertError> {
        self.delivered.lock().push(message.to_string());
        if self.fail {
            return Err(AlertError::Delivery {
                failed: 1,
                total: 1,
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// In-memory store that counts reads and can be switched off.
#[derive(Default)]
pub(crate) struct MemoryStore {
    pub(crate) totals: (u64, u64),
    pub(crate) counts: MetricCounts,
    pub(crate) tests: HashMap<i64, Vec<TestResult>>,
    pub(crate) scores: HashMap<i64, Vec<MoodScore>>,
    pub(crate) messages: HashMap<i64, Vec<UserMessage>>,
    pub(crate) portraits: Mutex<Vec<(i64, String)>>,
    pub(crate) down: AtomicBool,
    pub(crate) save_fails: bool,
    pub(crate) reads: AtomicU32,
}

impl MemoryStore {
    pub(crate) fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    pub(crate) fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn read(&self) -> Result<(), StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn message_totals(&self) -> Result<(u64, u64), StoreError> {
        self.read()?;
        Ok(self.totals)
    }

    async fn metric_counts(&self, _now: DateTime<Utc>) -> Result<MetricCounts, StoreError> {
        self.read()?;
        Ok(self.counts.clone())
    }

    async fn recent_test_results(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<TestResult>, StoreError> {
        self.read()?;
        let tests = self.tests.get(&user_id).cloned().unwrap_or_default();
        Ok(tests.into_iter().take(limit).collect())
    }

    async fn recent_mood_scores(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<MoodScore>, StoreError> {
        self.read()?;
        let scores = self.scores.get(&user_id).cloned().unwrap_or_default();
        Ok(scores.into_iter().take(limit).collect())
    }

    async fn user_messages(&self, user_id: i64) -> Result<Vec<UserMessage>, StoreError> {
        self.read()?;
        Ok(self.messages.get(&user_id).cloned().unwrap_or_default())
    }

    async fn save_portrait(
        &self,
        user_id: i64,
        text: &str,
        _generated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if self.save_fails || self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Query("write rejected".into()));
        }
        self.portraits.lock().push((user_id, text.to_string()));
        Ok(())
    }
}
