//! Named provider chains built from configuration.
//!
//! Every profile gets its own [`FallbackOrchestrator`], but providers and
//! their circuit breakers are shared: when Gemini is down, the dialogue and
//! summary profiles both see the same open circuit. The alert throttle and
//! the background task set are shared as well.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

use crate::alerting::{AlertSink, AlertThrottle, LogAlertSink};
use crate::config::{RouteConfig, SolaceConfig};
use crate::providers::{LlmProvider, ProviderError, ProviderRegistry};
use crate::resilience::{CircuitBreaker, FallbackOrchestrator, OrchestratorError, Route};
use crate::tasks::BackgroundTasks;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Unknown profile: '{0}'")]
    UnknownProfile(String),

    #[error("Provider '{name}' could not be created: {source}")]
    Provider {
        name: String,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// Alert key for models a provider no longer offers, e.g. `openai_models_missing`.
pub fn models_missing_key(provider: &str) -> String {
    format!("{}_models_missing", provider)
}

/// Result of comparing one provider's catalogue with the models routed to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelCheck {
    pub provider: String,
    #[serde(flatten)]
    pub outcome: ModelOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ModelOutcome {
    Available,
    Missing { models: Vec<String> },
    /// No catalogue endpoint; only reachability is known
    Unlisted { reachable: bool },
    Unverified { error: String },
}

impl ModelCheck {
    pub fn is_missing(&self) -> bool {
        matches!(self.outcome, ModelOutcome::Missing { .. })
    }
}

/// All configured profiles plus the state they share.
pub struct Gateway {
    profiles: BTreeMap<String, Arc<FallbackOrchestrator>>,
    providers: BTreeMap<String, Arc<dyn LlmProvider>>,
    routed_models: BTreeMap<String, BTreeSet<String>>,
    breakers: BTreeMap<String, Arc<CircuitBreaker>>,
    alerts: Arc<AlertThrottle>,
    tasks: Arc<BackgroundTasks>,
}

impl Gateway {
    /// Build from config, delivering alerts to Telegram when a bot token is set.
    pub fn from_config(config: &SolaceConfig, registry: &ProviderRegistry) -> Result<Self, GatewayError> {
        let alerts = Arc::new(AlertThrottle::new(alert_sink(config), config.alerts.window));
        Self::build(config, registry, alerts, Arc::new(BackgroundTasks::new()))
    }

    /// Build with caller-supplied alerting and task tracking.
    pub fn build(
        config: &SolaceConfig,
        registry: &ProviderRegistry,
        alerts: Arc<AlertThrottle>,
        tasks: Arc<BackgroundTasks>,
    ) -> Result<Self, GatewayError> {
        let mut providers: BTreeMap<String, Arc<dyn LlmProvider>> = BTreeMap::new();
        let mut breakers = BTreeMap::new();
        let mut routed_models: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        // only providers some profile actually routes to
        for route in config.profiles.values().flat_map(|p| p.routes()) {
            routed_models
                .entry(route.provider.clone())
                .or_default()
                .insert(route.model.clone());
            if providers.contains_key(&route.provider) {
                continue;
            }
            let Some(provider_config) = config.providers.get(&route.provider) else {
                return Err(GatewayError::Provider {
                    name: route.provider.clone(),
                    source: ProviderError::NotConfigured("missing from providers".to_string()),
                });
            };

            let provider = registry
                .create(&provider_config.kind, &provider_config.settings)
                .map_err(|source| GatewayError::Provider {
                    name: route.provider.clone(),
                    source,
                })?;
            tracing::debug!(provider = %route.provider, kind = %provider_config.kind, "Provider ready");

            providers.insert(route.provider.clone(), provider);
            breakers.insert(
                route.provider.clone(),
                Arc::new(CircuitBreaker::new(
                    route.provider.clone(),
                    provider_config.breaker.clone(),
                )),
            );
        }

        let mut profiles = BTreeMap::new();
        for (name, profile) in &config.profiles {
            let route = |cfg: &RouteConfig| -> Route {
                let mut route = Route::new(providers[&cfg.provider].clone(), cfg.model.clone())
                    .with_breaker(breakers[&cfg.provider].clone());
                if let Some(max_tokens) = cfg.max_tokens {
                    route = route.with_max_tokens(max_tokens);
                }
                if let Some(temperature) = cfg.temperature {
                    route = route.with_temperature(temperature);
                }
                route
            };

            let mut builder = FallbackOrchestrator::builder(route(&profile.primary))
                .name(name.clone())
                .retry(config.retry_for(profile))
                .primary_cooldown(profile.primary_cooldown)
                .alerts(alerts.clone())
                .tasks(tasks.clone());
            for fallback in &profile.fallbacks {
                builder = builder.secondary(route(fallback));
            }

            profiles.insert(name.clone(), Arc::new(builder.build()?));
        }

        tracing::info!(
            profiles = profiles.len(),
            providers = breakers.len(),
            "Gateway initialized"
        );

        Ok(Self {
            profiles,
            providers,
            routed_models,
            breakers,
            alerts,
            tasks,
        })
    }

    pub fn profile(&self, name: &str) -> Result<Arc<FallbackOrchestrator>, GatewayError> {
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownProfile(name.to_string()))
    }

    pub fn profile_names(&self) -> Vec<&str> {
        self.profiles.keys().map(|s| s.as_str()).collect()
    }

    /// One breaker per provider, keyed by provider name.
    pub fn breakers(&self) -> &BTreeMap<String, Arc<CircuitBreaker>> {
        &self.breakers
    }

    pub fn alerts(&self) -> &Arc<AlertThrottle> {
        &self.alerts
    }

    pub fn tasks(&self) -> &Arc<BackgroundTasks> {
        &self.tasks
    }

    /// Compare every provider's catalogue with the models its routes use.
    ///
    /// Missing models raise a throttled `<provider>_models_missing` alert.
    /// Providers without a catalogue are only health-checked; listing
    /// failures are logged and reported, never alerted.
    pub async fn verify_models(&self) -> Vec<ModelCheck> {
        let mut checks = Vec::with_capacity(self.providers.len());
        for (name, provider) in &self.providers {
            let routed = self.routed_models.get(name).cloned().unwrap_or_default();
            let outcome = match provider.list_models().await {
                Ok(Some(offered)) => {
                    let offered: BTreeSet<String> = offered.into_iter().collect();
                    let missing: Vec<String> = routed.difference(&offered).cloned().collect();
                    if missing.is_empty() {
                        tracing::info!(provider = %name, models = routed.len(), "All routed models available");
                        ModelOutcome::Available
                    } else {
                        let list = missing.join(", ");
                        tracing::warn!(provider = %name, missing = %list, "Routed models missing");
                        self.alerts
                            .notify(
                                Some(&models_missing_key(name)),
                                &format!("Models missing for {}: {}. Check account access.", name, list),
                            )
                            .await;
                        ModelOutcome::Missing { models: missing }
                    }
                }
                Ok(None) => ModelOutcome::Unlisted {
                    reachable: provider.health_check().await,
                },
                Err(err) => {
                    tracing::warn!(provider = %name, error = %err, "Could not list models");
                    ModelOutcome::Unverified {
                        error: err.to_string(),
                    }
                }
            };
            checks.push(ModelCheck {
                provider: name.clone(),
                outcome,
            });
        }
        checks
    }

    /// Wait for pending alerts and other background work.
    pub async fn shutdown(&self) {
        self.tasks.drain().await;
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("profiles", &self.profile_names())
            .field("breakers", &self.breakers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(feature = "telegram")]
fn alert_sink(config: &SolaceConfig) -> Arc<dyn AlertSink> {
    use crate::alerting::TelegramAlertSink;
    use crate::providers::{ApiCredential, CredentialSource};

    match &config.alerts.telegram_token {
        Some(token) => Arc::new(TelegramAlertSink::new(
            ApiCredential::new(token.clone(), CredentialSource::Config, "telegram_token"),
            config.alerts.admin_ids.clone(),
        )),
        None => Arc::new(LogAlertSink),
    }
}

#[cfg(not(feature = "telegram"))]
fn alert_sink(_config: &SolaceConfig) -> Arc<dyn AlertSink> {
    Arc::new(LogAlertSink)
}
