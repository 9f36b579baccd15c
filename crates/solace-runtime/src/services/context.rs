//! Per-user context block injected into the dialogue system prompt.

use chrono::{DateTime, Utc};
use solace_core::context::{MAX_MOOD_SCORES, MAX_TEST_RESULTS};
use solace_core::{render_user_context, time_of_day_line};
use std::sync::Arc;
use std::time::Duration;

use super::{StoreError, UserStore};
use crate::cache::TtlCache;
use crate::config::CacheConfig;

pub const CONTEXT_TTL: Duration = Duration::from_secs(300);

pub fn context_key(user_id: i64) -> String {
    format!("context:{}", user_id)
}

pub struct ContextService {
    store: Arc<dyn UserStore>,
    cache: Arc<TtlCache<String>>,
}

impl ContextService {
    pub fn new(store: Arc<dyn UserStore>, cache: Arc<TtlCache<String>>) -> Self {
        Self { store, cache }
    }

    /// Own a fresh cache swept on the configured interval.
    pub fn from_config(store: Arc<dyn UserStore>, config: &CacheConfig) -> Self {
        let cache = Arc::new(TtlCache::new("context"));
        cache.start_sweeper(config.sweep_interval);
        Self::new(store, cache)
    }

    /// Context for `user_id`. Never fails: when the store is unreachable
    /// only the time-of-day line is returned, and it is not cached.
    pub async fn user_context(&self, user_id: i64) -> String {
        self.user_context_at(user_id, Utc::now()).await
    }

    pub async fn user_context_at(&self, user_id: i64, now: DateTime<Utc>) -> String {
        let key = context_key(user_id);
        if let Some(context) = self.cache.get(&key).await {
            return context;
        }

        match self.load(user_id, now).await {
            Ok(context) => {
                self.cache.set(key, context.clone(), CONTEXT_TTL).await;
                context
            }
            Err(err) => {
                tracing::warn!(user_id, error = %err, "Failed to build user context");
                time_of_day_line(now)
            }
        }
    }

    /// Forget the cached block, e.g. after a new test result.
    pub async fn invalidate(&self, user_id: i64) {
        self.cache.delete(&context_key(user_id)).await;
    }

    async fn load(&self, user_id: i64, now: DateTime<Utc>) -> Result<String, StoreError> {
        let (tests, scores) = tokio::try_join!(
            self.store.recent_test_results(user_id, MAX_TEST_RESULTS),
            self.store.recent_mood_scores(user_id, MAX_MOOD_SCORES),
        )?;
        Ok(render_user_context(now, &tests, &scores))
    }
}
