//! Provider configuration parsed from environment variables.
//!
//! Each provider reads its own prefixed keys (`GROQ_*`, `HF_*`). Parsing is a
//! pure function over a lookup closure so tests never touch process env.

use tracing::warn;

use super::types::{ProviderError, ProviderKind};

pub const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_GROQ_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_HF_BASE_URL: &str = "https://api-inference.huggingface.co/models";
pub const DEFAULT_HF_MODEL: &str = "meta-llama/Meta-Llama-3-8B-Instruct";

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TOP_P: f32 = 0.9;

/// Share of the provider's context window that conversation turns may use.
pub const CONTEXT_BUDGET_FRACTION: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeouts: ProviderTimeouts,
    /// Context window: tokens for Groq, characters for Hugging Face.
    pub max_context: usize,
    /// Generation cap sent upstream.
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl ProviderConfig {
    /// Build a provider config from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::MissingApiKey`] when the provider's key is not set.
    pub fn from_env(kind: ProviderKind) -> Result<Self, ProviderError> {
        Self::from_lookup(kind, |key| std::env::var(key).ok())
    }

    /// Build a provider config from an arbitrary key lookup.
    ///
    /// Keys, with `P` = `GROQ` or `HF`:
    /// - `P_API_KEY` (required)
    /// - `P_MODEL`, `P_BASE_URL`
    /// - `P_TIMEOUT_SECS`: 30 for Groq, 60 for Hugging Face
    /// - `P_CONNECT_TIMEOUT_SECS`: 10
    /// - `P_MAX_CONTEXT`: 8192 tokens for Groq, 8000 characters for Hugging Face
    /// - `P_MAX_TOKENS`: 1024 for Groq, 512 for Hugging Face
    /// - `P_TEMPERATURE`: 0.7, `P_TOP_P`: 0.9
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::MissingApiKey`] when the provider's key is not set.
    /// Malformed numeric values fall back to their defaults with a warning.
    pub fn from_lookup<F>(kind: ProviderKind, lookup: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Defaults::for_kind(kind);
        let prefix = defaults.prefix;
        let get = |suffix: &str| {
            lookup(&format!("{prefix}_{suffix}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let key_var = format!("{prefix}_API_KEY");
        let api_key = get("API_KEY").ok_or(ProviderError::MissingApiKey { var: key_var })?;

        let model = get("MODEL").unwrap_or_else(|| defaults.model.to_string());
        let base_url = get("BASE_URL")
            .unwrap_or_else(|| defaults.base_url.to_string())
            .trim_end_matches('/')
            .to_string();

        let timeouts = ProviderTimeouts {
            request_secs: parse_or(prefix, "TIMEOUT_SECS", get("TIMEOUT_SECS"), defaults.request_timeout_secs),
            connect_secs: parse_or(
                prefix,
                "CONNECT_TIMEOUT_SECS",
                get("CONNECT_TIMEOUT_SECS"),
                DEFAULT_CONNECT_TIMEOUT_SECS,
            ),
        };

        Ok(Self {
            kind,
            api_key,
            model,
            base_url,
            timeouts,
            max_context: parse_or(prefix, "MAX_CONTEXT", get("MAX_CONTEXT"), defaults.max_context),
            max_tokens: parse_or(prefix, "MAX_TOKENS", get("MAX_TOKENS"), defaults.max_tokens),
            temperature: parse_or(prefix, "TEMPERATURE", get("TEMPERATURE"), DEFAULT_TEMPERATURE),
            top_p: parse_or(prefix, "TOP_P", get("TOP_P"), DEFAULT_TOP_P),
        })
    }

    /// Cost budget for conversation turns sent upstream.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn context_budget(&self) -> usize {
        (self.max_context as f64 * CONTEXT_BUDGET_FRACTION) as usize
    }
}

struct Defaults {
    prefix: &'static str,
    model: &'static str,
    base_url: &'static str,
    request_timeout_secs: u64,
    max_context: usize,
    max_tokens: u32,
}

impl Defaults {
    fn for_kind(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Groq => Self {
                prefix: "GROQ",
                model: DEFAULT_GROQ_MODEL,
                base_url: DEFAULT_GROQ_BASE_URL,
                request_timeout_secs: 30,
                max_context: 8192,
                max_tokens: 1024,
            },
            ProviderKind::HuggingFace => Self {
                prefix: "HF",
                model: DEFAULT_HF_MODEL,
                base_url: DEFAULT_HF_BASE_URL,
                request_timeout_secs: 60,
                max_context: 8000,
                max_tokens: 512,
            },
        }
    }
}

fn parse_or<T>(prefix: &str, suffix: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    let Some(v) = raw else {
        return default;
    };
    v.parse::<T>().unwrap_or_else(|_| {
        warn!(
            var = %format!("{prefix}_{suffix}"),
            value = %v,
            %default,
            "invalid provider setting; using default"
        );
        default
    })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
