//! Cached admin dashboard metrics.

use chrono::Utc;
use solace_core::{AdminMetrics, AverageMessages};
use std::sync::Arc;
use std::time::Duration;

use super::{StoreError, UserStore};
use crate::cache::{CacheStats, TtlCache};

pub const AVG_MESSAGES_KEY: &str = "avg_messages_per_user";
pub const ADMIN_METRICS_KEY: &str = "admin_metrics";

pub const AVG_MESSAGES_TTL: Duration = Duration::from_secs(300);
pub const ADMIN_METRICS_TTL: Duration = Duration::from_secs(120);

/// Dashboard aggregates, recomputed at most once per ttl.
pub struct MetricsService {
    store: Arc<dyn UserStore>,
    averages: TtlCache<AverageMessages>,
    dashboard: TtlCache<AdminMetrics>,
}

impl MetricsService {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self {
            store,
            averages: TtlCache::new("avg_messages"),
            dashboard: TtlCache::new("admin_metrics"),
        }
    }

    pub async fn average_messages_per_user(&self) -> Result<AverageMessages, StoreError> {
        self.averages
            .get_or_insert_with(AVG_MESSAGES_KEY, AVG_MESSAGES_TTL, || async {
                let (total, unique) = self.store.message_totals().await?;
                tracing::debug!(total, unique, "Recomputed messages per user");
                Ok::<_, StoreError>(AverageMessages::compute(total, unique))
            })
            .await
    }

    pub async fn admin_metrics(&self) -> Result<AdminMetrics, StoreError> {
        self.dashboard
            .get_or_insert_with(ADMIN_METRICS_KEY, ADMIN_METRICS_TTL, || async {
                let counts = self.store.metric_counts(Utc::now()).await?;
                let averages = self.average_messages_per_user().await?;
                Ok::<_, StoreError>(AdminMetrics::from_counts(counts, averages))
            })
            .await
    }

    /// Drop cached values so the next read hits the store.
    pub async fn invalidate(&self) {
        self.averages.delete(AVG_MESSAGES_KEY).await;
        self.dashboard.delete(ADMIN_METRICS_KEY).await;
    }

    pub async fn cache_stats(&self) -> (CacheStats, CacheStats) {
        (self.averages.stats().await, self.dashboard.stats().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use solace_core::MetricCounts;

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore {
            totals: (25, 4),
            counts: MetricCounts {
                total_users: 10,
                onboarding_completed: 4,
                avg_score_7d: Some(6.0),
                prev_avg_score_7d: Some(5.0),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_average_is_cached() {
        let store = store();
        let metrics = MetricsService::new(store.clone());

        let avg = metrics.average_messages_per_user().await.unwrap();
        assert_eq!(avg.average_messages_per_user, 6.25);
        metrics.average_messages_per_user().await.unwrap();
        assert_eq!(store.reads(), 1);

        metrics.invalidate().await;
        metrics.average_messages_per_user().await.unwrap();
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test]
    async fn test_admin_metrics_reuses_cached_average() {
        let store = store();
        let metrics = MetricsService::new(store.clone());

        metrics.average_messages_per_user().await.unwrap();
        let dashboard = metrics.admin_metrics().await.unwrap();
        // one read for the average, one for the counts
        assert_eq!(store.reads(), 2);
        assert!((dashboard.trend - 0.2).abs() < 1e-9);
        assert!((dashboard.onboarding_conv - 0.4).abs() < 1e-9);
        assert_eq!(dashboard.avg_msgs.unique_users, 4);

        metrics.admin_metrics().await.unwrap();
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test]
    async fn test_store_errors_are_not_cached() {
        let store = store();
        let metrics = MetricsService::new(store.clone());

        store.set_down(true);
        assert!(metrics.admin_metrics().await.is_err());

        store.set_down(false);
        assert!(metrics.admin_metrics().await.is_ok());
        let (averages, dashboard) = metrics.cache_stats().await;
        assert_eq!(averages.entries, 1);
        assert_eq!(dashboard.entries, 1);
    }
}
