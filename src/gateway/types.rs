//! Core types for the provider gateway.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// ATTRIBUTION
// =============================================================================

/// Which code path made a request, carried into gateway logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Attribution {
    /// e.g. "survey::invoke".
    pub caller: &'static str,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self { caller }
    }
}

// =============================================================================
// MODEL CONFIG
// =============================================================================

/// Per-provider model settings handed to an adapter on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Vendor model id, e.g. "gpt-4o".
    pub model: String,
    /// Cap on generated tokens.
    pub max_tokens: u32,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
        }
    }
}

// =============================================================================
// CHAT TYPES
// =============================================================================

/// Request for chat completion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Vendor model id.
    pub model: String,
    /// The single user turn sent to the model.
    pub prompt: String,
    /// Sampling temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Attribution for logging.
    pub attribution: Attribution,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, attribution: Attribution) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            temperature: 0.0,
            max_tokens: None,
            attribution,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub(crate) fn input_chars(&self) -> usize {
        self.prompt.len()
    }
}

/// Reason the model stopped generating. `Length` marks an answer cut off
/// by the token cap, which the invoker flags before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other(String),
}

impl From<Option<String>> for FinishReason {
    fn from(s: Option<String>) -> Self {
        match s.as_deref() {
            // Anthropic reports end_turn / stop_sequence / max_tokens.
            Some("stop") | Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
            Some("length") | Some("max_tokens") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Other(other.to_string()),
            None => FinishReason::Other("none".to_string()),
        }
    }
}

/// Token counts reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Provider-reported total, when it differs from input + output.
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: None,
        }
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total_tokens = Some(total);
        self
    }

    /// Reported total if present, otherwise input + output.
    pub fn total(&self) -> u64 {
        self.total_tokens
            .unwrap_or_else(|| self.input_tokens.saturating_add(self.output_tokens))
    }
}

/// Response from chat completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Generated content.
    pub content: String,
    /// Token usage, when the provider reported it.
    pub usage: Option<TokenUsage>,
    /// Time taken for the request.
    pub latency: Duration,
    /// Why the model stopped.
    pub finish_reason: FinishReason,
}

/// What the invoker gets back from an adapter: text plus token count.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawAnswer {
    pub text: String,
    /// `None` when the provider did not report usage.
    pub usage_tokens: Option<u64>,
    /// The provider stopped at the token cap.
    pub truncated: bool,
}

impl From<ChatResponse> for RawAnswer {
    fn from(resp: ChatResponse) -> Self {
        Self {
            truncated: resp.finish_reason == FinishReason::Length,
            text: resp.content,
            usage_tokens: resp.usage.map(|u| u.total()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_total_prefers_reported_total() {
        assert_eq!(TokenUsage::new(10, 20).total(), 30);
        assert_eq!(TokenUsage::new(10, 20).with_total(33).total(), 33);
    }

    #[test]
    fn finish_reason_maps_both_vendor_vocabularies() {
        assert_eq!(FinishReason::from(Some("stop".into())), FinishReason::Stop);
        assert_eq!(FinishReason::from(Some("end_turn".into())), FinishReason::Stop);
        assert_eq!(FinishReason::from(Some("max_tokens".into())), FinishReason::Length);
        assert_eq!(
            FinishReason::from(None),
            FinishReason::Other("none".to_string())
        );
        assert_eq!(
            FinishReason::from(Some("tool_use".into())),
            FinishReason::Other("tool_use".to_string())
        );
    }

    #[test]
    fn raw_answer_from_response_without_usage() {
        let resp = ChatResponse {
            content: "rating: 3".to_string(),
            usage: None,
            latency: Duration::from_millis(5),
            finish_reason: FinishReason::Stop,
        };
        let raw = RawAnswer::from(resp);
        assert_eq!(raw.text, "rating: 3");
        assert_eq!(raw.usage_tokens, None);
        assert!(!raw.truncated);
    }

    #[test]
    fn length_stop_marks_answer_truncated() {
        let resp = ChatResponse {
            content: "rating: ".to_string(),
            usage: Some(TokenUsage::new(40, 8)),
            latency: Duration::from_millis(5),
            finish_reason: FinishReason::Length,
        };
        let raw = RawAnswer::from(resp);
        assert!(raw.truncated);
        assert_eq!(raw.usage_tokens, Some(48));
    }

    #[test]
    fn chat_request_builder() {
        let req = ChatRequest::new("gpt-4o", "hi", Attribution::new("test"))
            .temperature(0.7)
            .max_tokens(64);
        assert_eq!(req.model, "gpt-4o");
        assert_eq!(req.max_tokens, Some(64));
        assert!((req.temperature - 0.7).abs() < 1e-6);
        assert_eq!(req.input_chars(), 2);
    }
}
