//! Storage boundary used by the cached services.
//!
//! The bot keeps users, messages and questionnaire results in a document
//! database. The runtime only needs the handful of reads below plus one
//! write for portraits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use solace_core::{MetricCounts, MoodScore, TestResult, UserMessage};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Total stored user messages and the number of distinct senders.
    async fn message_totals(&self) -> Result<(u64, u64), StoreError>;

    /// Raw dashboard counts relative to `now`.
    async fn metric_counts(&self, now: DateTime<Utc>) -> Result<MetricCounts, StoreError>;

    /// Finished questionnaires, newest first.
    async fn recent_test_results(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<TestResult>, StoreError>;

    /// Mood-scale entries, newest first.
    async fn recent_mood_scores(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<MoodScore>, StoreError>;

    /// The user's own messages, oldest first.
    async fn user_messages(&self, user_id: i64) -> Result<Vec<UserMessage>, StoreError>;

    async fn save_portrait(
        &self,
        user_id: i64,
        text: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
