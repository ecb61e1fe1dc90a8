//! Hugging Face text-generation client (fallback provider).
//!
//! DESIGN
//! ======
//! The inference endpoint takes one flat prompt string, so turns are
//! serialized with Llama 3 role-boundary markers:
//!
//! ```text
//! <|begin_of_text|>
//! <|start_header_id|>{role}<|end_header_id|>\n\n{content}<|eot_id|>   (per turn)
//! <|start_header_id|>assistant<|end_header_id|>\n\n                   (generation cue)
//! ```
//!
//! The reply is the single `generated_text` field, with any leftover markers
//! stripped. A 503 from this endpoint means the model is cold-starting.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::config::ProviderConfig;
use super::trim::{CostMetric, trim_to_budget};
use super::types::{
    ChatProvider, Generation, ProviderError, ProviderKind, Role, Turn, classify_status, classify_transport,
};
use crate::tokens::SPECIAL_TOKENS;

const KIND: ProviderKind = ProviderKind::HuggingFace;

const BEGIN_OF_TEXT: &str = "<|begin_of_text|>";
const START_HEADER: &str = "<|start_header_id|>";
const END_HEADER: &str = "<|end_header_id|>";
const END_OF_TURN: &str = "<|eot_id|>";

// =============================================================================
// CLIENT
// =============================================================================

pub struct HuggingFaceClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl HuggingFaceClient {
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

    async fn send(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = GenerateRequest {
            inputs: prompt,
            parameters: GenerateParameters {
                max_new_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                do_sample: true,
                return_full_text: false,
            },
        };
        let url = format!("{}/{}", self.config.base_url, self.config.model);
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
impl ChatProvider for HuggingFaceClient {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, turns: &[Turn]) -> Result<Generation, ProviderError> {
        let trimmed = trim_to_budget(turns, self.config.context_budget(), CostMetric::Chars);
        let prompt = format_prompt(&trimmed);
        debug!(
            kept = trimmed.len(),
            dropped = turns.len() - trimmed.len(),
            prompt_chars = prompt.chars().count(),
            "huggingface: sending generation"
        );
        let text = self.send(&prompt).await?;
        let content = parse_generated_text(&text)?;
        Ok(Generation { content, provider: KIND, model: self.config.model.clone(), usage: None })
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct GenerateRequest<'a> {
    inputs: &'a str,
    parameters: GenerateParameters,
}

#[derive(Serialize)]
struct GenerateParameters {
    max_new_tokens: u32,
    temperature: f32,
    top_p: f32,
    do_sample: bool,
    return_full_text: bool,
}

// =============================================================================
// PROMPT FORMAT
// =============================================================================

/// Flatten turns into a single marker-delimited prompt ending with an open
/// assistant header.
#[must_use]
pub fn format_prompt(turns: &[Turn]) -> String {
    let mut prompt = String::from(BEGIN_OF_TEXT);
    for turn in turns {
        push_header(&mut prompt, turn.role);
        prompt.push_str(&turn.content);
        prompt.push_str(END_OF_TURN);
    }
    push_header(&mut prompt, Role::Assistant);
    prompt
}

fn push_header(prompt: &mut String, role: Role) {
    prompt.push_str(START_HEADER);
    prompt.push_str(role.as_str());
    prompt.push_str(END_HEADER);
    prompt.push_str("\n\n");
}

/// Remove role headers and boundary markers the model echoed back.
#[must_use]
pub fn clean_generated_text(raw: &str) -> String {
    let mut text = raw.to_string();
    for role in [Role::System, Role::User, Role::Assistant] {
        let header = format!("{START_HEADER}{}{END_HEADER}", role.as_str());
        text = text.replace(&header, "");
    }
    for marker in SPECIAL_TOKENS {
        text = text.replace(marker, "");
    }
    text.trim().to_string()
}

// =============================================================================
// PARSING
// =============================================================================

/// Accepts both `[{"generated_text": ...}]` and `{"generated_text": ...}`.
pub(crate) fn parse_generated_text(json_text: &str) -> Result<String, ProviderError> {
    let root: Value = serde_json::from_str(json_text)
        .map_err(|e| ProviderError::InvalidResponse { provider: KIND, reason: e.to_string() })?;

    let item = match &root {
        Value::Array(items) => items.first(),
        Value::Object(_) => Some(&root),
        _ => None,
    };
    let Some(raw) = item
        .and_then(|v| v.get("generated_text"))
        .and_then(Value::as_str)
    else {
        return Err(ProviderError::InvalidResponse { provider: KIND, reason: "missing generated_text".to_string() });
    };

    let content = clean_generated_text(raw);
    if content.is_empty() {
        return Err(ProviderError::InvalidResponse { provider: KIND, reason: "empty generated_text".to_string() });
    }
    Ok(content)
}

#[cfg(test)]
#[path = "huggingface_test.rs"]
mod tests;
