//! Provider gateway: vendor chat adapters behind one retrying interface.

pub mod anthropic;
pub mod error;
mod http;
pub mod openai_compat;
pub mod types;
pub mod usage;

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, warn};

pub use anthropic::AnthropicAdapter;
pub use error::{ErrorContext, ProviderError};
pub use openai_compat::OpenAiCompatAdapter;
pub use types::*;
pub use usage::CostTracker;

/// A single vendor chat API. One call, one HTTP round trip, no retries.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider id used in errors and logs.
    fn name(&self) -> &str;

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// What the invoker talks to: prompt in, raw answer text out.
///
/// Implementations own their retry policy. Test doubles implement this
/// directly.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn call(
        &self,
        model: &ModelConfig,
        prompt: &str,
        temperature: f32,
    ) -> Result<RawAnswer, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Upper bound on any single backoff sleep.
    pub retry_max_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_secs(4),
            retry_max_delay: Duration::from_secs(10),
        }
    }
}

/// Wraps a [`ChatProvider`] with exponential-backoff retries on transient
/// failures.
pub struct ProviderGateway<P: ChatProvider> {
    provider: P,
    config: GatewayConfig,
}

impl<P: ChatProvider> ProviderGateway<P> {
    pub fn new(provider: P) -> Self {
        Self::with_config(provider, GatewayConfig::default())
    }

    pub fn with_config(provider: P, config: GatewayConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=self.config.max_retries {
            match self.provider.chat(req).await {
                Ok(resp) => {
                    debug!(
                        provider = self.provider.name(),
                        model = %req.model,
                        caller = req.attribution.caller,
                        latency_ms = resp.latency.as_millis() as u64,
                        tokens = resp.usage.map(|u| u.total()),
                        "chat completed"
                    );
                    return Ok(resp);
                }
                Err(err) => {
                    if !err.is_retryable() || attempt == self.config.max_retries {
                        return Err(err);
                    }

                    let delay = backoff_delay(
                        self.config.retry_base_delay,
                        self.config.retry_max_delay,
                        attempt,
                    );
                    warn!(
                        provider = self.provider.name(),
                        code = err.code(),
                        error = %err,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying provider call"
                    );
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::provider(self.provider.name(), "unknown error", false)
        }))
    }
}

#[async_trait]
impl<P: ChatProvider> ProviderAdapter for ProviderGateway<P> {
    async fn call(
        &self,
        model: &ModelConfig,
        prompt: &str,
        temperature: f32,
    ) -> Result<RawAnswer, ProviderError> {
        let req = ChatRequest::new(
            model.model.clone(),
            prompt,
            Attribution::new("survey::invoke"),
        )
        .temperature(temperature)
        .max_tokens(model.max_tokens);

        self.chat(&req).await.map(RawAnswer::from)
    }
}

/// `base * 2^attempt`, capped at `max`.
fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let multiplier = 2u32.pow(attempt.min(5));
    base.saturating_mul(multiplier).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(4);
        let max = Duration::from_secs(10);
        assert_eq!(backoff_delay(base, max, 0), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, max, 1), Duration::from_secs(8));
        assert_eq!(backoff_delay(base, max, 2), Duration::from_secs(10));
        assert_eq!(backoff_delay(base, max, 30), Duration::from_secs(10));
    }

    /// Fails with the given error until `fail_times` calls have happened.
    struct Flaky {
        calls: Arc<AtomicU32>,
        fail_times: u32,
        retryable: bool,
    }

    #[async_trait]
    impl ChatProvider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(ProviderError::provider("flaky", "boom", self.retryable));
            }
            Ok(ChatResponse {
                content: "rating: 5".to_string(),
                usage: Some(TokenUsage::new(3, 4)),
                latency: Duration::from_millis(1),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    fn gateway(fail_times: u32, retryable: bool) -> (ProviderGateway<Flaky>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let provider = Flaky {
            calls: Arc::clone(&calls),
            fail_times,
            retryable,
        };
        (ProviderGateway::new(provider), calls)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let (gw, calls) = gateway(2, true);
        let model = ModelConfig::new("m", 16);
        let raw = gw.call(&model, "prompt", 0.0).await.unwrap();
        assert_eq!(raw.text, "rating: 5");
        assert_eq!(raw.usage_tokens, Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let (gw, calls) = gateway(10, true);
        let model = ModelConfig::new("m", 16);
        let err = gw.call(&model, "prompt", 0.0).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let (gw, calls) = gateway(10, false);
        let model = ModelConfig::new("m", 16);
        assert!(gw.call(&model, "prompt", 0.0).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
