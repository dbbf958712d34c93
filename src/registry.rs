//! Provider registry: provider id → family, model settings and adapter.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ConfigError, ProviderOverride};
use crate::gateway::{
    AnthropicAdapter, GatewayConfig, ModelConfig, OpenAiCompatAdapter, ProviderAdapter,
    ProviderGateway,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    OpenaiCompat,
    Anthropic,
}

impl AdapterKind {
    pub fn default_max_tokens(&self) -> u32 {
        match self {
            AdapterKind::OpenaiCompat => 512,
            AdapterKind::Anthropic => 1024,
        }
    }
}

/// Everything needed to build one provider's adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDef {
    pub id: String,
    pub adapter: AdapterKind,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub base_url: String,
    pub family: String,
    pub max_tokens: u32,
}

impl ProviderDef {
    fn builtin(
        id: &str,
        adapter: AdapterKind,
        model: &str,
        api_key_env: &str,
        base_url: &str,
        family: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            adapter,
            model: model.to_string(),
            api_key_env: api_key_env.to_string(),
            base_url: base_url.to_string(),
            family: family.to_string(),
            max_tokens: adapter.default_max_tokens(),
        }
    }

    pub fn apply(&mut self, over: &ProviderOverride) {
        if let Some(adapter) = over.adapter {
            self.adapter = adapter;
            if over.max_tokens.is_none() {
                self.max_tokens = adapter.default_max_tokens();
            }
        }
        if let Some(model) = &over.model {
            self.model = model.clone();
        }
        if let Some(env) = &over.api_key_env {
            self.api_key_env = env.clone();
        }
        if let Some(url) = &over.base_url {
            self.base_url = url.clone();
        }
        if let Some(family) = &over.family {
            self.family = family.clone();
        }
        if let Some(max) = over.max_tokens {
            self.max_tokens = max;
        }
    }

    pub fn from_override(id: &str, over: &ProviderOverride) -> Result<Self, ConfigError> {
        let missing = |field| ConfigError::IncompleteProvider {
            provider: id.to_string(),
            field,
        };
        let adapter = over.adapter.ok_or_else(|| missing("adapter"))?;
        Ok(Self {
            id: id.to_string(),
            adapter,
            model: over.model.clone().ok_or_else(|| missing("model"))?,
            api_key_env: over.api_key_env.clone().ok_or_else(|| missing("api_key_env"))?,
            base_url: over.base_url.clone().ok_or_else(|| missing("base_url"))?,
            family: over.family.clone().ok_or_else(|| missing("family"))?,
            max_tokens: over.max_tokens.unwrap_or_else(|| adapter.default_max_tokens()),
        })
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new(&self.model, self.max_tokens)
    }

    /// HTTP adapter wrapped in the retrying gateway.
    pub fn build_adapter(
        &self,
        api_key: &str,
        gateway: &GatewayConfig,
    ) -> Result<Arc<dyn ProviderAdapter>, ConfigError> {
        let wrap = |source| ConfigError::Adapter {
            provider: self.id.clone(),
            source,
        };
        let adapter: Arc<dyn ProviderAdapter> = match self.adapter {
            AdapterKind::OpenaiCompat => {
                let http = OpenAiCompatAdapter::new(&self.id, api_key, &self.base_url).map_err(wrap)?;
                Arc::new(ProviderGateway::with_config(http, gateway.clone()))
            }
            AdapterKind::Anthropic => {
                let http = AnthropicAdapter::new(&self.id, api_key, &self.base_url).map_err(wrap)?;
                Arc::new(ProviderGateway::with_config(http, gateway.clone()))
            }
        };
        Ok(adapter)
    }
}

/// The deployment the survey was originally run against.
pub fn builtin_providers() -> Vec<ProviderDef> {
    use AdapterKind::*;
    vec![
        ProviderDef::builtin("OpenAI", OpenaiCompat, "gpt-4o", "OPENAI_API_KEY", "https://api.openai.com/v1", "openai"),
        ProviderDef::builtin("Grok", OpenaiCompat, "grok-2-latest", "XAI_API_KEY", "https://api.x.ai/v1", "openai"),
        ProviderDef::builtin(
            "Claude",
            Anthropic,
            "claude-3-5-sonnet-20241022",
            "ANTHROPIC_API_KEY",
            "https://api.anthropic.com/v1",
            "anthropic",
        ),
        ProviderDef::builtin("Llama", OpenaiCompat, "llama3.1-70b", "LLAMA_API_KEY", "https://api.llama-api.com", "llama"),
        ProviderDef::builtin("DeepSeek", OpenaiCompat, "deepseek-v3", "DEEPSEEK_API_KEY", "https://api.llama-api.com", "llama"),
    ]
}

/// Resolves a provider id to its family without needing a live adapter.
pub trait FamilyLookup {
    fn family_of(&self, id: &str) -> Result<&str, ConfigError>;
}

impl FamilyLookup for [ProviderDef] {
    fn family_of(&self, id: &str) -> Result<&str, ConfigError> {
        self.iter()
            .find(|d| d.id == id)
            .map(|d| d.family.as_str())
            .ok_or_else(|| ConfigError::UnknownProvider(id.to_string()))
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Clone)]
pub struct ProviderEntry {
    pub id: String,
    pub family: String,
    pub model: ModelConfig,
    pub adapter: Arc<dyn ProviderAdapter>,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("id", &self.id)
            .field("family", &self.family)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    entries: BTreeMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a provider.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        family: impl Into<String>,
        model: ModelConfig,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> &mut Self {
        let id = id.into();
        self.entries.insert(
            id.clone(),
            ProviderEntry {
                id,
                family: family.into(),
                model,
                adapter,
            },
        );
        self
    }

    /// Build adapters for the providers in `used` only, reading API keys
    /// through `env`. Providers not in `used` never need a key.
    pub fn from_defs<F>(
        defs: &[ProviderDef],
        used: &[String],
        gateway: &GatewayConfig,
        env: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut registry = Self::new();
        for id in used {
            if registry.entries.contains_key(id) {
                continue;
            }
            let def = defs
                .iter()
                .find(|d| &d.id == id)
                .ok_or_else(|| ConfigError::UnknownProvider(id.clone()))?;
            let api_key = env(def.api_key_env.as_str())
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingApiKey {
                    provider: def.id.clone(),
                    env: def.api_key_env.clone(),
                })?;
            let adapter = def.build_adapter(&api_key, gateway)?;
            debug!(provider = %def.id, family = %def.family, model = %def.model, "registered provider");
            registry.register(&def.id, &def.family, def.model_config(), adapter);
        }
        Ok(registry)
    }

    /// Like [`Self::from_defs`], reading keys from the process environment.
    pub fn from_env(
        defs: &[ProviderDef],
        used: &[String],
        gateway: &GatewayConfig,
    ) -> Result<Self, ConfigError> {
        Self::from_defs(defs, used, gateway, |name| std::env::var(name).ok())
    }

    pub fn get(&self, id: &str) -> Result<&ProviderEntry, ConfigError> {
        self.entries
            .get(id)
            .ok_or_else(|| ConfigError::UnknownProvider(id.to_string()))
    }

    pub fn family_of(&self, id: &str) -> Result<&str, ConfigError> {
        self.get(id).map(|e| e.family.as_str())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FamilyLookup for ProviderRegistry {
    fn family_of(&self, id: &str) -> Result<&str, ConfigError> {
        ProviderRegistry::family_of(self, id)
    }
}
