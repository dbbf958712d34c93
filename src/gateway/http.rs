//! HTTP plumbing shared by the vendor adapters.

use std::time::Duration;

use reqwest::header::HeaderMap;

use super::error::{ErrorContext, ProviderError};
use super::types::ChatRequest;

/// Maximum allowed response body length (1MB).
pub(crate) const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed input characters (~125k tokens).
pub(crate) const MAX_INPUT_CHARS: usize = 500_000;

/// Used when a 429 carries no parseable Retry-After header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

pub(crate) fn build_client(
    headers: HeaderMap,
    timeout: Duration,
) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .gzip(true)
        .build()
        .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))
}

pub(crate) fn check_input(req: &ChatRequest) -> Result<(), ProviderError> {
    let total_chars = req.input_chars();
    if total_chars > MAX_INPUT_CHARS {
        return Err(ProviderError::invalid_request(format!(
            "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
        )));
    }
    Ok(())
}

/// Extract request ID from response headers.
pub(crate) fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .or_else(|| headers.get("request-id"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// Stream the body, refusing anything over [`MAX_RESPONSE_LEN`].
pub(crate) async fn read_body(
    response: &mut reqwest::Response,
    provider: &str,
) -> Result<String, ProviderError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let new_len = bytes.len() + chunk.len();
        if new_len > MAX_RESPONSE_LEN {
            return Err(ProviderError::provider(
                provider,
                format!("Response too large: {new_len} bytes"),
                false,
            ));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Map a non-success status to an error. 429 is rate limiting, 5xx is
/// retryable, anything else is permanent.
pub(crate) fn status_error(
    provider: &str,
    status: u16,
    message: Option<String>,
    retry_after: Duration,
    ctx: ErrorContext,
) -> ProviderError {
    if status == 429 {
        return ProviderError::rate_limited(provider, retry_after, ctx);
    }
    let message = message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("HTTP {status}"));
    if status < 500 && is_refusal(&message) {
        return ProviderError::refused(message, Some(ctx));
    }
    ProviderError::provider_with_context(provider, message, status >= 500, ctx)
}

/// Check if an API error message indicates a policy refusal.
pub(crate) fn is_refusal(msg: &str) -> bool {
    let l = msg.trim_start().to_lowercase();
    let first_line = l.lines().next().unwrap_or("");

    const PREFIXES: &[&str] = &[
        "refus",
        "i cannot",
        "i can't",
        "i won't",
        "i will not",
        "i am unable to",
        "i'm unable to",
        "unable to comply",
        "unable to assist",
        "unable to help",
        "unable to provide",
    ];

    PREFIXES.iter().any(|p| first_line.starts_with(p)) || l.contains("request was refused")
}
