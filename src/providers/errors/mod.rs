use crate::breaker::Dependency;
use crate::errors::SwitchboardError;
use serde_json::Value;
use tracing::warn;

/// Longest slice of an error body carried into error messages.
const MAX_ERROR_BODY_CHARS: usize = 300;

/// Shared HTTP error classification for the generation and delivery providers.
///
/// Timeouts, connection errors, 408, 429 and 5xx are transient; every other
/// non-success status is permanent.
pub struct ProviderErrorHandler;

impl ProviderErrorHandler {
    pub fn is_retryable_status(status: u16) -> bool {
        matches!(status, 408 | 425 | 429) || (500..600).contains(&status)
    }

    /// Build a typed error from a non-success status and its body.
    pub fn classify_status(dependency: Dependency, status: u16, body: &str) -> SwitchboardError {
        let message = format!("HTTP {}: {}", status, Self::api_error_message(body));
        if Self::is_retryable_status(status) {
            SwitchboardError::transient(dependency, message)
        } else {
            if status == 401 || status == 403 {
                warn!("{} provider rejected credentials (HTTP {})", dependency, status);
            }
            SwitchboardError::permanent(dependency, message)
        }
    }

    /// Transport-level failures (DNS, connect, timeout, reset) are always transient.
    pub fn classify_transport(dependency: Dependency, err: &reqwest::Error) -> SwitchboardError {
        let what = if err.is_timeout() {
            "request timed out"
        } else if err.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        SwitchboardError::transient(dependency, format!("{what}: {err}"))
    }

    /// Pull `error.message` (and `error.status` when present) out of a JSON
    /// error body, falling back to the truncated raw text.
    pub fn api_error_message(body: &str) -> String {
        if let Ok(json) = serde_json::from_str::<Value>(body)
            && let Some(err) = json.get("error")
        {
            if let Some(message) = err.get("message").and_then(Value::as_str) {
                return match err.get("status").and_then(Value::as_str) {
                    Some(status) => format!("{status}: {message}"),
                    None => message.to_string(),
                };
            }
            if let Some(message) = err.as_str() {
                return message.to_string();
            }
        }
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return "empty response body".to_string();
        }
        trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
    }

    /// Pass a successful response through, or consume an error response into
    /// a classified error.
    pub async fn check_http_status(
        resp: reqwest::Response,
        dependency: Dependency,
    ) -> Result<reqwest::Response, SwitchboardError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        Err(Self::classify_status(dependency, status, &body))
    }

    /// Like [`check_http_status`](Self::check_http_status) but also decodes the
    /// body as JSON. An empty 2xx body decodes to `Value::Null`.
    pub async fn check_response(
        resp: reqwest::Response,
        dependency: Dependency,
    ) -> Result<Value, SwitchboardError> {
        let resp = Self::check_http_status(resp, dependency).await?;
        let text = resp
            .text()
            .await
            .map_err(|e| Self::classify_transport(dependency, &e))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| {
            SwitchboardError::transient(dependency, format!("unparseable response body: {e}"))
        })
    }
}
