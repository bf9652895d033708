//! Vision provider integration.
//!
//! Each provider gets one [`ModelAdapter`] implementation. The
//! [`AdapterRegistry`] maps every [`ModelId`] to the adapter serving it, so
//! provider choice happens once, at lookup, instead of being re-branched on
//! every call.

pub(crate) mod adapter;
pub(crate) mod anthropic;
pub(crate) mod gemini;
pub(crate) mod openai;

pub use adapter::{resolve_env_var, ImageInput, ModelAdapter, VisionRequest, STOCK_METADATA_PROMPT};
pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

use crate::config::ProvidersConfig;
use crate::types::{ModelId, Provider};
use std::collections::HashMap;
use std::sync::Arc;

/// Lookup table from model to adapter.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ModelId, Arc<dyn ModelAdapter>>,
}

impl AdapterRegistry {
    /// An empty registry. Use [`AdapterRegistry::register`] to fill it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every known model from provider config.
    ///
    /// Models sharing a provider share one adapter instance (and its HTTP
    /// connection pool).
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let gemini: Arc<dyn ModelAdapter> = Arc::new(GeminiAdapter::new(&config.gemini));
        let anthropic: Arc<dyn ModelAdapter> = Arc::new(AnthropicAdapter::new(&config.anthropic));
        let openai: Arc<dyn ModelAdapter> = Arc::new(OpenAiAdapter::new(&config.openai));

        let mut registry = Self::new();
        for model in ModelId::ALL {
            let adapter = match model.provider() {
                Provider::Google => gemini.clone(),
                Provider::Anthropic => anthropic.clone(),
                Provider::OpenAi => openai.clone(),
            };
            registry.register(model, adapter);
        }
        registry
    }

    /// Register (or replace) the adapter for `model`.
    pub fn register(&mut self, model: ModelId, adapter: Arc<dyn ModelAdapter>) {
        self.adapters.insert(model, adapter);
    }

    pub fn get(&self, model: ModelId) -> Option<Arc<dyn ModelAdapter>> {
        self.adapters.get(&model).cloned()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entries: Vec<(&str, &str)> = self
            .adapters
            .iter()
            .map(|(model, adapter)| (model.as_str(), adapter.name()))
            .collect();
        entries.sort();
        f.debug_map().entries(entries).finish()
    }
}
