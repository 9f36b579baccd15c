//! Provider registry keyed by vendor name.
//!
//! The gateway reads `providers.<name>.kind` from configuration and asks the
//! registry for an instance. Adding a vendor means registering a factory,
//! nothing else changes.
//!
//! ```ignore
//! let registry = ProviderRegistry::with_defaults();
//! let gemini = registry.create("gemini", &json!({"api_key": "..."}))?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{LlmProvider, ProviderError};

/// Builds providers of one kind from JSON settings.
pub trait ProviderFactory: Send + Sync {
    /// Kind name used in configuration, e.g. "gemini" or "openai".
    fn provider_type(&self) -> &'static str;

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Check settings without building a client.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;

    fn default_config(&self) -> JsonValue {
        serde_json::json!({})
    }

    fn description(&self) -> &'static str {
        "LLM provider"
    }
}

/// Known provider kinds.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one of the same kind.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    /// Build a provider of `kind`, merging `config` over the factory defaults.
    pub fn create(
        &self,
        kind: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let factory = self.factory(kind)?;
        factory.create(&merge_defaults(factory.default_config(), config))
    }

    pub fn validate(&self, kind: &str, config: &JsonValue) -> Result<(), ProviderError> {
        let factory = self.factory(kind)?;
        factory.validate_config(&merge_defaults(factory.default_config(), config))
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// `(kind, description)` for every registered factory.
    pub fn descriptions(&self) -> Vec<(&str, &'static str)> {
        self.factories
            .iter()
            .map(|(kind, factory)| (kind.as_str(), factory.description()))
            .collect()
    }

    fn factory(&self, kind: &str) -> Result<&Arc<dyn ProviderFactory>, ProviderError> {
        self.factories.get(kind).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Unknown provider type: '{}'. Available: {:?}",
                kind,
                self.available_types()
            ))
        })
    }

    /// Registry with every vendor compiled into this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "gemini")]
        registry.register(Arc::new(super::GeminiProviderFactory));
        #[cfg(feature = "openai")]
        registry.register(Arc::new(super::OpenAiProviderFactory));
        registry
    }
}

/// Shallow merge: keys in `overrides` win, defaults fill the rest.
fn merge_defaults(defaults: JsonValue, overrides: &JsonValue) -> JsonValue {
    match (defaults, overrides) {
        (JsonValue::Object(mut base), JsonValue::Object(extra)) => {
            for (key, value) in extra {
                base.insert(key.clone(), value.clone());
            }
            JsonValue::Object(base)
        }
        (base, JsonValue::Null) => base,
        (_, other) => other.clone(),
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}
