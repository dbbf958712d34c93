//! Survey configuration file.
//!
//! A single JSON document describes the questions, which slice of them to
//! run, and overrides for providers, personas, family policies, reflections
//! and retry behaviour. API keys never live here; each provider names the
//! environment variable that holds its key.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::dispatcher::{FamilyPolicy, PolicyTable};
use crate::gateway::{GatewayConfig, ProviderError};
use crate::prompts::PersonaCatalog;
use crate::registry::{builtin_providers, AdapterKind, ProviderDef};
use crate::scale::{self, InvalidScaleError};
use crate::scoring::ReverseScorer;
use crate::task::QuestionDef;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("unknown persona: {0}")]
    UnknownPersona(String),

    #[error("{context}: {source}")]
    InvalidScale {
        context: String,
        #[source]
        source: InvalidScaleError,
    },

    #[error("provider {provider}: environment variable {env} is not set")]
    MissingApiKey { provider: String, env: String },

    #[error("provider {provider}: missing field `{field}`")]
    IncompleteProvider {
        provider: String,
        field: &'static str,
    },

    #[error("provider {provider}: {source}")]
    Adapter {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("invalid policy for family {family}: {reason}")]
    InvalidPolicy { family: String, reason: String },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// FILE SCHEMA
// =============================================================================

/// Question entry as written in the file; the range is validated on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionEntry {
    pub scale_name: String,
    pub id: String,
    pub text: String,
    pub scale_range: Value,
    #[serde(default)]
    pub reverse_score: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub scales_to_run: Vec<String>,
    pub models_to_run: Vec<String>,
    pub prompt_styles_to_run: Vec<String>,
    pub num_repetitions: u32,
    pub temperature: f32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            scales_to_run: Vec::new(),
            models_to_run: Vec::new(),
            prompt_styles_to_run: vec!["minimal".to_string()],
            num_repetitions: 1,
            temperature: 0.0,
        }
    }
}

/// Partial provider definition. Fields left out keep the built-in value; a
/// provider that is not built in must set all of them except `max_tokens`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderOverride {
    pub adapter: Option<AdapterKind>,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub family: Option<String>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyOverride {
    pub max_in_flight: Option<usize>,
    pub pacing_ms: Option<u64>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 4_000,
            max_delay_ms: 10_000,
        }
    }
}

impl From<&RetryConfig> for GatewayConfig {
    fn from(retry: &RetryConfig) -> Self {
        GatewayConfig {
            max_retries: retry.max_retries,
            retry_base_delay: Duration::from_millis(retry.base_delay_ms),
            retry_max_delay: Duration::from_millis(retry.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    pub questions: Vec<QuestionEntry>,
    pub run: RunConfig,
    pub providers: BTreeMap<String, ProviderOverride>,
    /// Persona id → instruction. Adds to or replaces the built-ins.
    pub personas: BTreeMap<String, String>,
    pub families: BTreeMap<String, PolicyOverride>,
    /// Scale name → item range used for reverse scoring.
    pub reflections: BTreeMap<String, Value>,
    pub retry: RetryConfig,
}

// =============================================================================
// RESOLUTION
// =============================================================================

impl SurveyConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Questions with validated ranges, in file order.
    pub fn question_defs(&self) -> Result<Vec<QuestionDef>, ConfigError> {
        self.questions
            .iter()
            .map(|q| {
                let scale_range =
                    scale::validate(&q.scale_range).map_err(|source| ConfigError::InvalidScale {
                        context: format!("question {}", q.id),
                        source,
                    })?;
                Ok(QuestionDef {
                    scale_name: q.scale_name.clone(),
                    id: q.id.clone(),
                    text: q.text.clone(),
                    scale_range,
                    reverse_score: q.reverse_score,
                })
            })
            .collect()
    }

    pub fn persona_catalog(&self) -> PersonaCatalog {
        self.personas
            .iter()
            .fold(PersonaCatalog::builtin(), |catalog, (id, instruction)| {
                catalog.with(id, instruction)
            })
    }

    /// Built-in providers with overrides applied, plus any new ones.
    pub fn provider_defs(&self) -> Result<Vec<ProviderDef>, ConfigError> {
        let mut defs: BTreeMap<String, ProviderDef> = builtin_providers()
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();

        for (id, over) in &self.providers {
            match defs.get_mut(id) {
                Some(def) => def.apply(over),
                None => {
                    let def = ProviderDef::from_override(id, over)?;
                    defs.insert(id.clone(), def);
                }
            }
        }
        Ok(defs.into_values().collect())
    }

    pub fn policies(&self) -> Result<PolicyTable, ConfigError> {
        let mut table = PolicyTable::default();
        for (family, over) in &self.families {
            let base = table.get(family);
            let policy = FamilyPolicy::new(
                over.max_in_flight.unwrap_or(base.max_in_flight),
                over.pacing_ms.map(Duration::from_millis).unwrap_or(base.pacing),
                over.batch_size.unwrap_or(base.batch_size),
            )
            .map_err(|reason| ConfigError::InvalidPolicy {
                family: family.clone(),
                reason: reason.to_string(),
            })?;
            table.set(family, policy);
        }
        Ok(table)
    }

    pub fn reverse_scorer(&self) -> Result<ReverseScorer, ConfigError> {
        let mut scorer = ReverseScorer::default();
        for (name, raw) in &self.reflections {
            let range = scale::validate(raw).map_err(|source| ConfigError::InvalidScale {
                context: format!("reflection {name}"),
                source,
            })?;
            scorer.insert(name, range);
        }
        Ok(scorer)
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig::from(&self.retry)
    }
}
