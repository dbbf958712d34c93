//! Adapter for OpenAI-compatible chat completion endpoints.
//!
//! Covers OpenAI itself, xAI and the Llama API host, which all accept the same
//! `POST {base}/chat/completions` request shape with bearer auth.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::http;
use super::types::*;
use super::ChatProvider;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Chat adapter for any OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct OpenAiCompatAdapter {
    name: String,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiCompatAdapter {
    /// `name` is the provider id used in errors and logs.
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

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = http::build_client(headers, timeout)?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            name: name.into(),
            client,
            base_url,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: [ApiMessage<'a>; 1],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> ApiMessage<'a> {
    fn user(content: &'a str) -> Self {
        Self {
            role: "user",
            content,
        }
    }
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

impl Usage {
    /// `total_tokens` when present, else prompt + completion, else nothing.
    fn into_token_usage(self) -> Option<TokenUsage> {
        let input = self.prompt_tokens.unwrap_or(0);
        let output = self.completion_tokens.unwrap_or(0);
        match self.total_tokens {
            Some(total) => Some(TokenUsage::new(input, output).with_total(total)),
            None if self.prompt_tokens.is_some() || self.completion_tokens.is_some() => {
                Some(TokenUsage::new(input, output))
            }
            None => None,
        }
    }
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<serde_json::Value>,
}

impl ApiError {
    fn code_string(&self) -> Option<String> {
        match &self.code {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

// =============================================================================
// CHAT PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ChatProvider for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        http::check_input(req)?;

        let start = Instant::now();

        let api_req = ChatApiRequest {
            model: &req.model,
            messages: [ApiMessage::user(&req.prompt)],
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };

        let mut response = self
            .client
            .post(self.chat_url())
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
            if let Ok(parsed) = serde_json::from_str::<ChatApiResponse>(&body) {
                if let Some(error) = parsed.error {
                    if let Some(code) = error.code_string() {
                        ctx = ctx.with_code(code);
                    }
                    message = error.message;
                }
            }
            return Err(http::status_error(
                &self.name,
                status.as_u16(),
                message,
                retry_after,
                ctx,
            ));
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::provider_with_context(&self.name, format!("Invalid JSON: {e}"), false, ctx.clone())
        })?;

        // Some hosts report failures inside a 200 body.
        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_default();
            if http::is_refusal(&message) {
                return Err(ProviderError::refused(message, Some(ctx)));
            }
            return Err(ProviderError::provider_with_context(&self.name, message, false, ctx));
        }

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ProviderError::provider(&self.name, "No choices in response", false))?;

        let content = choice
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();

        Ok(ChatResponse {
            content,
            usage: parsed.usage.and_then(Usage::into_token_usage),
            latency: start.elapsed(),
            finish_reason: FinishReason::from(choice.finish_reason),
        })
    }
}
