//! Provider error types.

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Provider server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("All providers failed: {}", attempts.join("; "))]
    AllFailed {
        attempts: Vec<String>,
        retryable: bool,
    },
}

impl ProviderError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn not_configured(msg: impl Into<String>) -> Self {
        Self::NotConfigured(msg.into())
    }

    /// Classify a non-success HTTP response.
    pub fn from_http_status(status: u16, body: &str) -> Self {
        let message = error_message(body);
        if status == 402 || body.contains("insufficient_quota") {
            return Self::QuotaExhausted(message);
        }
        match status {
            429 => Self::RateLimited(message),
            401 | 403 => Self::Auth(message),
            400 | 404 | 422 => Self::InvalidRequest(message),
            // Remaining 5xx and unexpected codes are treated as transient.
            s => Self::Server { status: s, message },
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited(_)
            | ProviderError::Server { .. }
            | ProviderError::Timeout(_)
            | ProviderError::Network(_)
            | ProviderError::InvalidResponse(_) => true,
            ProviderError::AllFailed { retryable, .. } => *retryable,
            ProviderError::InvalidRequest(_)
            | ProviderError::Auth(_)
            | ProviderError::QuotaExhausted(_)
            | ProviderError::Json(_)
            | ProviderError::NotConfigured(_) => false,
        }
    }
}

/// Pull `error.message` out of an OpenAI-style error body, falling back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(500).collect())
}
