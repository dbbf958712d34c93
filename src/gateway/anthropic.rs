//! Adapter for the Anthropic Messages API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::http;
use super::types::*;
use super::ChatProvider;

pub const API_VERSION: &str = "2023-06-01";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// The Messages API requires `max_tokens`.
const FALLBACK_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    name: String,
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(
        name: impl Into<String>,
        api_key: &str,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Self::with_timeout(name, api_key, base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        name: impl Into<String>,
        api_key: &str,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));

        let key_value = HeaderValue::from_str(api_key)
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert("x-api-key", key_value);

        let client = http::build_client(headers, timeout)?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            name: name.into(),
            client,
            base_url,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url)
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [ApiMessage<'a>; 1],
    temperature: f32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a ChatRequest> for MessagesRequest<'a> {
    fn from(req: &'a ChatRequest) -> Self {
        Self {
            model: &req.model,
            max_tokens: req.max_tokens.unwrap_or(FALLBACK_MAX_TOKENS),
            messages: [ApiMessage {
                role: "user",
                content: &req.prompt,
            }],
            temperature: req.temperature,
        }
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

// =============================================================================
// CHAT PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ChatProvider for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        http::check_input(req)?;

        let start = Instant::now();
        let api_req = MessagesRequest::from(req);

        let mut response = self
            .client
            .post(self.messages_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let request_id = http::request_id(response.headers());
        let retry_after = http::retry_after(response.headers());

        let body = http::read_body(&mut response, &self.name).await?;

        let mut ctx = ErrorContext::new().with_status(status.as_u16());
        if let Some(id) = &request_id {
            ctx = ctx.with_request_id(id);
        }

        if !status.is_success() {
            let mut message = None;
            if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
                if let Some(kind) = envelope.error.kind {
                    ctx = ctx.with_code(kind);
                }
                message = envelope.error.message;
            }
            return Err(http::status_error(
                &self.name,
                status.as_u16(),
                message,
                retry_after,
                ctx,
            ));
        }

        let parsed: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::provider_with_context(&self.name, format!("Invalid JSON: {e}"), false, ctx)
        })?;

        let content: String = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();

        let usage = parsed.usage.and_then(|u| match (u.input_tokens, u.output_tokens) {
            (None, None) => None,
            (i, o) => Some(TokenUsage::new(i.unwrap_or(0), o.unwrap_or(0))),
        });

        Ok(ChatResponse {
            content,
            usage,
            latency: start.elapsed(),
            finish_reason: FinishReason::from(parsed.stop_reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_is_the_only_user_turn() {
        let req = ChatRequest::new("claude-x", "Rate this.", Attribution::new("test"));
        let body = serde_json::to_value(MessagesRequest::from(&req)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "claude-x",
                "max_tokens": FALLBACK_MAX_TOKENS,
                "messages": [{"role": "user", "content": "Rate this."}],
                "temperature": 0.0
            })
        );
    }

    #[test]
    fn text_blocks_are_concatenated() {
        let body = r#"{
            "content": [
                {"type": "text", "text": "rating: 4\n"},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "because"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 3}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(body).unwrap();
        let text: String = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();
        assert_eq!(text, "rating: 4\nbecause");
    }
}
