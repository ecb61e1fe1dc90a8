//! Provider-neutral conversation types, errors, and the provider trait.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Upstream error bodies are truncated to this many characters in logs.
pub const ERROR_BODY_LOG_CHARS: usize = 200;

// =============================================================================
// TURNS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One role-tagged message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

// =============================================================================
// PROVIDERS
// =============================================================================

/// The two upstream APIs. Groq is the primary, Hugging Face the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Groq,
    HuggingFace,
}

impl ProviderKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::HuggingFace => "huggingface",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Token counters reported by the upstream, when it reports any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A successful generation.
#[derive(Debug, Clone)]
pub struct Generation {
    pub content: String,
    pub provider: ProviderKind,
    pub model: String,
    pub usage: Option<Usage>,
}

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by provider clients. None are retried by the client itself.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Credential rejected (HTTP 401). Needs an operator.
    #[error("{provider}: authentication failed")]
    Authentication { provider: ProviderKind, body: String },

    /// Upstream throttled us (HTTP 429).
    #[error("{provider}: rate limited by upstream")]
    RateLimited { provider: ProviderKind, body: String },

    /// Fallback model is cold-starting (HTTP 503 from Hugging Face).
    #[error("{provider}: model is loading")]
    ModelLoading { provider: ProviderKind, estimated_secs: Option<f64> },

    /// Any other 5xx.
    #[error("{provider}: server error (status {status})")]
    Server { provider: ProviderKind, status: u16, body: String },

    /// Any other non-2xx.
    #[error("{provider}: API error (status {status})")]
    Api { provider: ProviderKind, status: u16, body: String },

    /// The bounded request timeout elapsed.
    #[error("{provider}: request timed out")]
    Timeout { provider: ProviderKind },

    /// Network-level or otherwise unclassified failure.
    #[error("{provider}: request failed: {cause}")]
    Unknown { provider: ProviderKind, cause: String },

    /// The upstream answered 2xx but the body was unusable.
    #[error("{provider}: invalid response: {reason}")]
    InvalidResponse { provider: ProviderKind, reason: String },

    #[error("missing API key: env var {var} not set")]
    MissingApiKey { var: String },

    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl ProviderError {
    /// HTTP status of the upstream response, when one was received.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { .. } => Some(401),
            Self::RateLimited { .. } => Some(429),
            Self::ModelLoading { .. } => Some(503),
            Self::Server { status, .. } | Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Upstream body truncated for logging.
    #[must_use]
    pub fn body_excerpt(&self) -> &str {
        let body = match self {
            Self::Authentication { body, .. }
            | Self::RateLimited { body, .. }
            | Self::Server { body, .. }
            | Self::Api { body, .. } => body.as_str(),
            Self::Unknown { cause, .. } => cause.as_str(),
            _ => "",
        };
        truncate_chars(body, ERROR_BODY_LOG_CHARS)
    }

    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

impl crate::error::ErrorCode for ProviderError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "E_PROVIDER_AUTH",
            Self::RateLimited { .. } => "E_PROVIDER_RATE_LIMITED",
            Self::ModelLoading { .. } => "E_PROVIDER_MODEL_LOADING",
            Self::Server { .. } => "E_PROVIDER_SERVER",
            Self::Api { .. } => "E_PROVIDER_API",
            Self::Timeout { .. } => "E_PROVIDER_TIMEOUT",
            Self::Unknown { .. } => "E_PROVIDER_UNKNOWN",
            Self::InvalidResponse { .. } => "E_PROVIDER_INVALID_RESPONSE",
            Self::MissingApiKey { .. } => "E_MISSING_API_KEY",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ModelLoading { .. }
                | Self::Server { .. }
                | Self::Timeout { .. }
                | Self::Unknown { .. }
        )
    }
}

/// Map a non-2xx upstream status to the error taxonomy.
#[must_use]
pub fn classify_status(provider: ProviderKind, status: u16, body: String) -> ProviderError {
    match status {
        401 => ProviderError::Authentication { provider, body },
        429 => ProviderError::RateLimited { provider, body },
        503 if provider == ProviderKind::HuggingFace => {
            ProviderError::ModelLoading { provider, estimated_secs: estimated_time(&body) }
        }
        s if s >= 500 => ProviderError::Server { provider, status, body },
        _ => ProviderError::Api { provider, status, body },
    }
}

/// Map a transport error from reqwest.
#[must_use]
pub fn classify_transport(provider: ProviderKind, err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout { provider }
    } else {
        ProviderError::Unknown { provider, cause: err.to_string() }
    }
}

fn estimated_time(body: &str) -> Option<f64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("estimated_time")?
        .as_f64()
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// =============================================================================
// PROVIDER TRAIT
// =============================================================================

/// One upstream chat capability. Enables mocking in tests.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Model identifier sent upstream.
    fn model(&self) -> &str;

    /// Generate a reply for the given turns. Implementations trim the turns
    /// to their own context budget before sending.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ProviderError`] on any upstream failure.
    async fn generate(&self, turns: &[Turn]) -> Result<Generation, ProviderError>;

    /// Send a canned single-turn request; `true` if a reply came back.
    async fn test_connection(&self) -> bool {
        self.generate(&[Turn::user("Hello")]).await.is_ok()
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
