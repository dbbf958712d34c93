//! Model invoker: one question, one persona, one provider call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

use crate::config::ConfigError;
use crate::gateway::CostTracker;
use crate::parser::{self, snippet, ParsedAnswer};
use crate::prompts::{PersonaCatalog, SurveyPrompt};
use crate::registry::ProviderRegistry;
use crate::scale::ScaleRange;

/// Failures that indicate a defect in configuration rather than a provider
/// problem. Provider failures never show up here.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Answer plus the raw text it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub answer: ParsedAnswer,
    /// Provider text, or the error message when the call failed.
    pub raw_response: String,
    /// Wall-clock time around the provider call.
    pub duration: Duration,
    /// The provider hit the token cap, so the text may end mid-answer.
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct ModelInvoker {
    registry: Arc<ProviderRegistry>,
    personas: Arc<PersonaCatalog>,
    costs: Arc<CostTracker>,
}

impl ModelInvoker {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        personas: Arc<PersonaCatalog>,
        costs: Arc<CostTracker>,
    ) -> Self {
        Self {
            registry,
            personas,
            costs,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn personas(&self) -> &PersonaCatalog {
        &self.personas
    }

    pub fn costs(&self) -> &CostTracker {
        &self.costs
    }

    /// Ask `provider_id` one question.
    ///
    /// Adapter failures come back as an `API ERROR` midpoint answer. Only an
    /// unknown provider or persona is an `Err`.
    pub async fn invoke(
        &self,
        provider_id: &str,
        question_text: &str,
        persona_style: &str,
        scale: ScaleRange,
        temperature: f32,
    ) -> Result<Invocation, InvokeError> {
        let provider = self.registry.get(provider_id)?;
        let persona = self
            .personas
            .get(persona_style)
            .ok_or_else(|| ConfigError::UnknownPersona(persona_style.to_string()))?;

        let prompt = SurveyPrompt::compose(persona, question_text, scale);

        let start = Instant::now();
        let result = provider
            .adapter
            .call(&provider.model, &prompt.text, temperature)
            .await;
        let duration = start.elapsed();

        let invocation = match result {
            Ok(raw) => {
                if let Some(tokens) = raw.usage_tokens {
                    self.costs.add(provider_id, tokens);
                }
                if raw.truncated {
                    warn!(
                        provider = provider_id,
                        text = %snippet(&raw.text),
                        "answer cut off at max_tokens"
                    );
                }
                Invocation {
                    answer: parser::parse(&raw.text, scale),
                    raw_response: raw.text,
                    duration,
                    truncated: raw.truncated,
                }
            }
            Err(err) => {
                let message = err.to_string();
                warn!(
                    provider = provider_id,
                    code = err.code(),
                    error = %snippet(&message),
                    "provider call failed"
                );
                Invocation {
                    answer: ParsedAnswer::api_error(scale, &message),
                    raw_response: message,
                    duration,
                    truncated: false,
                }
            }
        };
        Ok(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ModelConfig, ProviderAdapter, ProviderError, RawAnswer};
    use crate::parser::AnswerStatus;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records the prompt it was given and replays a canned outcome.
    struct Canned {
        reply: Result<RawAnswer, String>,
        seen: Mutex<Vec<(String, f32)>>,
    }

    #[async_trait]
    impl ProviderAdapter for Canned {
        async fn call(
            &self,
            _model: &ModelConfig,
            prompt: &str,
            temperature: f32,
        ) -> Result<RawAnswer, ProviderError> {
            self.seen.lock().unwrap().push((prompt.to_string(), temperature));
            self.reply
                .clone()
                .map_err(|m| ProviderError::provider("stub", m, false))
        }
    }

    fn invoker(reply: Result<RawAnswer, String>) -> (ModelInvoker, Arc<Canned>) {
        let adapter = Arc::new(Canned {
            reply,
            seen: Mutex::new(Vec::new()),
        });
        let mut registry = ProviderRegistry::new();
        registry.register("Stub", "stub", ModelConfig::new("m", 64), adapter.clone());
        let invoker = ModelInvoker::new(
            Arc::new(registry),
            Arc::new(PersonaCatalog::builtin()),
            Arc::new(CostTracker::new()),
        );
        (invoker, adapter)
    }

    fn likert7() -> ScaleRange {
        ScaleRange::new(1, 7).unwrap()
    }

    #[tokio::test]
    async fn successful_call_is_parsed_and_metered() {
        let (invoker, adapter) = invoker(Ok(RawAnswer {
            text: r#"{"rating": 6, "justification": "ok"}"#.to_string(),
            usage_tokens: Some(42),
            truncated: false,
        }));
        let inv = invoker
            .invoke("Stub", "Obedience is a virtue.", "neutral", likert7(), 0.3)
            .await
            .unwrap();

        assert_eq!(inv.answer.numeric_score, 6.0);
        assert_eq!(inv.answer.justification, "ok");
        assert_eq!(inv.answer.status, AnswerStatus::StructuredObject);
        assert_eq!(invoker.costs().get("Stub"), 42);
        assert!(!inv.truncated);

        let seen = adapter.seen.lock().unwrap();
        let (prompt, temperature) = &seen[0];
        assert!(prompt.contains("Question: Obedience is a virtue."));
        assert!(prompt.contains("(Scale from 1 to 7)"));
        assert!((temperature - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn missing_usage_skips_tracker() {
        let (invoker, _) = invoker(Ok(RawAnswer {
            text: "rating: 2".to_string(),
            usage_tokens: None,
            truncated: false,
        }));
        invoker
            .invoke("Stub", "q", "minimal", likert7(), 0.0)
            .await
            .unwrap();
        assert!(invoker.costs().snapshot().is_empty());
    }

    #[tokio::test]
    async fn truncated_answer_is_flagged_and_still_parsed() {
        let (invoker, _) = invoker(Ok(RawAnswer {
            text: "rating: 3 because the question".to_string(),
            usage_tokens: Some(64),
            truncated: true,
        }));
        let inv = invoker
            .invoke("Stub", "q", "minimal", likert7(), 0.0)
            .await
            .unwrap();
        assert!(inv.truncated);
        assert_eq!(inv.answer.numeric_score, 3.0);
        assert_eq!(inv.answer.status, AnswerStatus::LabeledField);
    }

    #[tokio::test]
    async fn adapter_failure_becomes_api_error_midpoint() {
        let (invoker, _) = invoker(Err("503 upstream".to_string()));
        let inv = invoker
            .invoke("Stub", "q", "minimal", likert7(), 0.0)
            .await
            .unwrap();
        assert_eq!(inv.answer.numeric_score, 4.0);
        assert_eq!(inv.answer.status, AnswerStatus::ApiError);
        assert!(inv.answer.justification.starts_with("API ERROR: stub error: 503 upstream"));
        assert_eq!(inv.raw_response, "stub error: 503 upstream");
        assert_eq!(invoker.costs().total(), 0);
        assert!(!inv.truncated);
    }

    #[tokio::test]
    async fn unknown_ids_are_errors() {
        let (invoker, adapter) = invoker(Ok(RawAnswer {
            text: "rating: 2".to_string(),
            usage_tokens: None,
            truncated: false,
        }));
        let err = invoker
            .invoke("Nobody", "q", "minimal", likert7(), 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Config(ConfigError::UnknownProvider(_))));

        let err = invoker
            .invoke("Stub", "q", "pirate", likert7(), 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Config(ConfigError::UnknownPersona(_))));
        assert!(adapter.seen.lock().unwrap().is_empty());
    }
}
