//! Groq chat-completions client (primary provider).
//!
//! OpenAI-compatible `/chat/completions` endpoint. Turns are sent as a
//! role/content array; the reply text and usage counters are parsed from
//! `choices[0].message.content` and `usage`. Pure parsing in
//! `parse_chat_response` for testability.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::config::ProviderConfig;
use super::trim::{CostMetric, trim_to_budget};
use super::types::{
    ChatProvider, Generation, ProviderError, ProviderKind, Turn, Usage, classify_status, classify_transport,
};
use crate::tokens::estimate_turns_tokens;

const KIND: ProviderKind = ProviderKind::Groq;

// =============================================================================
// CLIENT
// =============================================================================

pub struct GroqClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl GroqClient {
    /// Build a client with the configured request and connect timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| ProviderError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, config })
    }

    async fn send(&self, turns: &[Turn]) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: turns,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        let url = format!("{}/chat/completions", self.config.base_url);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(KIND, &e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| classify_transport(KIND, &e))?;
        if !status.is_success() {
            return Err(classify_status(KIND, status.as_u16(), text));
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl ChatProvider for GroqClient {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, turns: &[Turn]) -> Result<Generation, ProviderError> {
        let trimmed = trim_to_budget(turns, self.config.context_budget(), CostMetric::Tokens);
        debug!(
            kept = trimmed.len(),
            dropped = turns.len() - trimmed.len(),
            estimated_tokens = estimate_turns_tokens(&trimmed),
            "groq: sending chat completion"
        );
        let text = self.send(&trimmed).await?;
        parse_chat_response(&text, &self.config.model)
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    max_tokens: u32,
    temperature: f32,
}

// =============================================================================
// PARSING
// =============================================================================

pub(crate) fn parse_chat_response(json_text: &str, requested_model: &str) -> Result<Generation, ProviderError> {
    let root: Value = serde_json::from_str(json_text)
        .map_err(|e| ProviderError::InvalidResponse { provider: KIND, reason: e.to_string() })?;

    let model = root
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(requested_model)
        .to_string();

    let Some(choice) = root
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
    else {
        return Err(ProviderError::InvalidResponse { provider: KIND, reason: "missing choices[0]".to_string() });
    };

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if content.is_empty() {
        return Err(ProviderError::InvalidResponse { provider: KIND, reason: "empty message content".to_string() });
    }

    let usage = root.get("usage").map(|u| {
        let prompt_tokens = u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
        let completion_tokens = u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);
        let total_tokens = u
            .get("total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(prompt_tokens + completion_tokens);
        Usage { prompt_tokens, completion_tokens, total_tokens }
    });

    Ok(Generation { content: content.to_string(), provider: KIND, model, usage })
}

#[cfg(test)]
#[path = "groq_test.rs"]
mod tests;
