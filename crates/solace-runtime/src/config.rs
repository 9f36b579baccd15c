//! Runtime configuration.
//!
//! Loaded from YAML, overlaid with environment variables, then validated.
//! Every field has a default, so an empty file yields the stock setup:
//! Gemini as the dialogue primary with two OpenAI fallbacks.
//!
//! ```yaml
//! providers:
//!   gemini:
//!     kind: gemini
//!     breaker: { failure_threshold: 3, recovery_timeout: 30s }
//! profiles:
//!   dialogue:
//!     primary: { provider: gemini, model: gemini-2.5-flash }
//!     fallbacks:
//!       - { provider: openai, model: gpt-4.1 }
//!     primary_cooldown: 5m
//! ```
//!
//! API keys are not overlaid here: each provider factory looks in its own
//! settings first and then in `GEMINI_API_KEY` / `OPENAI_API_KEY`.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::alerting::DEFAULT_ALERT_WINDOW;
use crate::cache::DEFAULT_SWEEP_INTERVAL;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy, DEFAULT_PRIMARY_COOLDOWN};

pub const TELEGRAM_TOKEN_ENV: &str = "TELEGRAM_TOKEN";
pub const ADMIN_IDS_ENV: &str = "ADMIN_IDS";
pub const PRIMARY_BACKOFF_ENV: &str = "SOLACE_PRIMARY_BACKOFF";

/// Profile names the bot relies on.
pub const DIALOGUE_PROFILE: &str = "dialogue";
pub const PORTRAIT_PROFILE: &str = "portrait";
pub const SUMMARY_PROFILE: &str = "summary";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid value in {var}: {message}")]
    EnvError { var: &'static str, message: String },

    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Serde helpers for human-readable durations ("30s", "500ms", "5m").
///
/// Bare integers are read as seconds.
pub mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(serde::de::Error::custom),
        }
    }

    pub fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        if let Ok(secs) = text.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }
        humantime::parse_duration(text).map_err(|e| format!("'{}': {}", text, e))
    }
}

/// One upstream vendor and its breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Factory name in the provider registry
    pub kind: String,

    /// Vendor settings handed to the factory as-is
    #[serde(default, skip_serializing)]
    pub settings: JsonValue,

    #[serde(default)]
    pub breaker: CircuitBreakerConfig,
}

impl ProviderConfig {
    pub fn new(kind: impl Into<String>, breaker: CircuitBreakerConfig) -> Self {
        Self {
            kind: kind.into(),
            settings: JsonValue::Null,
            breaker,
        }
    }
}

/// A provider plus the model to ask for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Key in `providers`
    pub provider: String,
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl RouteConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            max_tokens: None,
            temperature: None,
        }
    }
}

/// A named provider chain, e.g. `dialogue` or `portrait`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub primary: RouteConfig,

    #[serde(default)]
    pub fallbacks: Vec<RouteConfig>,

    /// Overrides the top-level retry policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,

    #[serde(default = "default_primary_cooldown", with = "duration")]
    pub primary_cooldown: Duration,
}

fn default_primary_cooldown() -> Duration {
    DEFAULT_PRIMARY_COOLDOWN
}

impl ProfileConfig {
    pub fn new(primary: RouteConfig) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            retry: None,
            primary_cooldown: DEFAULT_PRIMARY_COOLDOWN,
        }
    }

    pub fn with_fallback(mut self, route: RouteConfig) -> Self {
        self.fallbacks.push(route);
        self
    }

    /// Primary first, then fallbacks in order.
    pub fn routes(&self) -> impl Iterator<Item = &RouteConfig> {
        std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    #[serde(with = "duration")]
    pub window: Duration,

    /// Bot token for Telegram delivery; alerts only go to the log without it
    #[serde(skip_serializing)]
    pub telegram_token: Option<String>,

    pub admin_ids: Vec<i64>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_ALERT_WINDOW,
            telegram_token: None,
            admin_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(with = "duration")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolaceConfig {
    pub providers: BTreeMap<String, ProviderConfig>,
    pub profiles: BTreeMap<String, ProfileConfig>,
    pub retry: RetryPolicy,
    pub alerts: AlertConfig,
    pub cache: CacheConfig,
}

impl Default for SolaceConfig {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            "gemini".to_string(),
            ProviderConfig::new(
                "gemini",
                CircuitBreakerConfig {
                    failure_threshold: 3,
                    recovery_timeout: Duration::from_secs(30),
                    success_threshold: 2,
                },
            ),
        );
        providers.insert(
            "openai".to_string(),
            ProviderConfig::new(
                "openai",
                CircuitBreakerConfig {
                    failure_threshold: 5,
                    recovery_timeout: Duration::from_secs(60),
                    success_threshold: 2,
                },
            ),
        );

        let mut profiles = BTreeMap::new();
        profiles.insert(
            DIALOGUE_PROFILE.to_string(),
            ProfileConfig::new(RouteConfig::new("gemini", "gemini-2.5-flash"))
                .with_fallback(RouteConfig::new("openai", "gpt-4.1"))
                .with_fallback(RouteConfig::new("openai", "gpt-5-chat-latest")),
        );
        profiles.insert(
            PORTRAIT_PROFILE.to_string(),
            ProfileConfig::new(RouteConfig::new("openai", "gpt-5.2"))
                .with_fallback(RouteConfig::new("openai", "gpt-5.1")),
        );
        profiles.insert(
            SUMMARY_PROFILE.to_string(),
            ProfileConfig::new(RouteConfig::new("openai", "gpt-4.1-mini"))
                .with_fallback(RouteConfig::new("openai", "gpt-5-mini"))
                .with_fallback(RouteConfig::new("gemini", "gemini-2.5-flash")),
        );

        Self {
            providers,
            profiles,
            retry: RetryPolicy::default(),
            alerts: AlertConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl SolaceConfig {
    /// Parse YAML and validate. No environment overlay.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: SolaceConfig = if yaml.trim().is_empty() {
            SolaceConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML file, overlay the process environment, validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let mut config: SolaceConfig = if contents.trim().is_empty() {
            SolaceConfig::default()
        } else {
            serde_yaml::from_str(&contents)?
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = SolaceConfig::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Overlay values from `lookup`; blank values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(token) = get(TELEGRAM_TOKEN_ENV) {
            self.alerts.telegram_token = Some(token.trim().to_string());
        }

        if let Some(ids) = get(ADMIN_IDS_ENV) {
            self.alerts.admin_ids = parse_admin_ids(&ids).map_err(|message| ConfigError::EnvError {
                var: ADMIN_IDS_ENV,
                message,
            })?;
        }

        if let Some(raw) = get(PRIMARY_BACKOFF_ENV) {
            let cooldown = duration::parse(&raw).map_err(|message| ConfigError::EnvError {
                var: PRIMARY_BACKOFF_ENV,
                message,
            })?;
            for profile in self.profiles.values_mut() {
                profile.primary_cooldown = cooldown;
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.profiles.is_empty() {
            return Err(ConfigError::ValidationError("no profiles configured".into()));
        }

        for (name, provider) in &self.providers {
            if provider.kind.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "providers.{}.kind is empty",
                    name
                )));
            }
            let breaker = &provider.breaker;
            if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "providers.{}.breaker thresholds must be at least 1",
                    name
                )));
            }
            if breaker.recovery_timeout.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "providers.{}.breaker.recovery_timeout must be positive",
                    name
                )));
            }
        }

        validate_retry("retry", &self.retry)?;

        for (name, profile) in &self.profiles {
            for route in profile.routes() {
                if !self.providers.contains_key(&route.provider) {
                    return Err(ConfigError::ValidationError(format!(
                        "profiles.{} uses unknown provider '{}'",
                        name, route.provider
                    )));
                }
                if route.model.trim().is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "profiles.{} has a route without a model",
                        name
                    )));
                }
            }
            if let Some(retry) = &profile.retry {
                validate_retry(&format!("profiles.{}.retry", name), retry)?;
            }
        }

        if self.alerts.window.is_zero() {
            return Err(ConfigError::ValidationError("alerts.window must be positive".into()));
        }

        Ok(())
    }

    /// Retry policy for `profile`, falling back to the top-level one.
    pub fn retry_for(&self, profile: &ProfileConfig) -> RetryPolicy {
        profile.retry.clone().unwrap_or_else(|| self.retry.clone())
    }
}

fn validate_retry(path: &str, retry: &RetryPolicy) -> Result<(), ConfigError> {
    if retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{}.max_attempts must be at least 1",
            path
        )));
    }
    if retry.attempt_timeout.is_zero() {
        return Err(ConfigError::ValidationError(format!(
            "{}.attempt_timeout must be positive",
            path
        )));
    }
    Ok(())
}

fn parse_admin_ids(raw: &str) -> Result<Vec<i64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().map_err(|e| format!("'{}': {}", s, e)))
        .collect()
}
