//! Service health report for the `/health` admin command.
//!
//! The database is probed live; providers are reported from their circuit
//! breakers without making any upstream call. An open breaker marks its
//! provider as degraded but does not make the whole service unhealthy,
//! since fallbacks may still answer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::resilience::{CircuitBreaker, CircuitState};
use crate::services::StoreError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Reachability check for the backing store.
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<CircuitState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_count: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceHealth {
    fn status(status: HealthStatus) -> Self {
        Self {
            status,
            state: None,
            failure_count: None,
            error: None,
        }
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall: HealthStatus,
    pub services: BTreeMap<String, ServiceHealth>,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.overall == HealthStatus::Healthy
    }

    /// Plain-text status for chat or terminal.
    pub fn render(&self) -> String {
        let mut out = format!(
            "🏥 Service status: {}\n\n",
            self.overall.to_string().to_uppercase()
        );

        for (name, service) in &self.services {
            out.push_str(&format!("{}: {}", name, service.status));
            if let Some(state) = service.state {
                match service.failure_count {
                    Some(n) if n > 0 => out.push_str(&format!(" ({}, {} failures)", state, n)),
                    _ => out.push_str(&format!(" ({})", state)),
                }
            }
            out.push('\n');
        }

        let errors: Vec<_> = self
            .services
            .iter()
            .filter_map(|(name, s)| s.error.as_ref().map(|e| (name, e)))
            .collect();
        if !errors.is_empty() {
            out.push('\n');
            for (name, error) in errors {
                out.push_str(&format!("⚠️ {} error: {}\n", name, error));
            }
        }

        out
    }
}

pub struct HealthChecker {
    database: Option<Arc<dyn DatabaseProbe>>,
    breakers: Vec<Arc<CircuitBreaker>>,
}

impl HealthChecker {
    pub fn new(database: Option<Arc<dyn DatabaseProbe>>) -> Self {
        Self {
            database,
            breakers: Vec::new(),
        }
    }

    pub fn with_breakers<I>(mut self, breakers: I) -> Self
    where
        I: IntoIterator<Item = Arc<CircuitBreaker>>,
    {
        self.breakers.extend(breakers);
        self
    }

    pub async fn check(&self) -> HealthReport {
        let mut services = BTreeMap::new();

        let database = self.check_database().await;
        let overall = if database.status == HealthStatus::Healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        services.insert("database".to_string(), database);

        for breaker in &self.breakers {
            let snapshot = breaker.snapshot();
            let status = if snapshot.state == CircuitState::Closed {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            };
            services.insert(
                snapshot.name,
                ServiceHealth {
                    status,
                    state: Some(snapshot.state),
                    failure_count: Some(snapshot.failure_count),
                    error: None,
                },
            );
        }

        HealthReport {
            overall,
            services,
            timestamp: Utc::now(),
        }
    }

    async fn check_database(&self) -> ServiceHealth {
        let Some(database) = &self.database else {
            return ServiceHealth::status(HealthStatus::Unknown).with_error("database not configured");
        };

        match tokio::time::timeout(PROBE_TIMEOUT, database.ping()).await {
            Ok(Ok(())) => ServiceHealth::status(HealthStatus::Healthy),
            Ok(Err(err)) => {
                tracing::error!(error = %err, "Database health check failed");
                ServiceHealth::status(HealthStatus::Unhealthy).with_error(err.to_string())
            }
            Err(_) => {
                tracing::error!(timeout_secs = PROBE_TIMEOUT.as_secs(), "Database health check timed out");
                ServiceHealth::status(HealthStatus::Unhealthy)
                    .with_error(format!("ping timed out after {:?}", PROBE_TIMEOUT))
            }
        }
    }
}

impl fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthChecker")
            .field("database", &self.database.is_some())
            .field("breakers", &self.breakers.len())
            .finish()
    }
}
