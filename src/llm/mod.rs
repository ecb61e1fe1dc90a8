//! LLM — adapters for the two upstream inference APIs.
//!
//! DESIGN
//! ======
//! Both upstreams implement one capability, [`ChatProvider::generate`].
//! Groq (chat-completions, token-budgeted) is the primary; Hugging Face
//! (flattened text-generation prompt, character-budgeted) is the fallback.
//! Trimming is shared in [`trim`]. Clients classify failures but never
//! retry; retry and failover policy lives in `services::responder`.

pub mod config;
pub mod groq;
pub mod huggingface;
pub mod trim;
pub mod types;

use std::sync::Arc;

use config::ProviderConfig;
pub use types::ChatProvider;
use types::{ProviderError, ProviderKind};

/// Build a provider client from a parsed config.
///
/// # Errors
///
/// Returns an error if the provider HTTP client fails to build.
pub fn from_config(config: ProviderConfig) -> Result<Arc<dyn ChatProvider>, ProviderError> {
    let client: Arc<dyn ChatProvider> = match config.kind {
        ProviderKind::Groq => Arc::new(groq::GroqClient::new(config)?),
        ProviderKind::HuggingFace => Arc::new(huggingface::HuggingFaceClient::new(config)?),
    };
    Ok(client)
}

/// Build a provider client from environment variables.
///
/// # Errors
///
/// Returns an error if the provider's API key is missing or the HTTP
/// client fails to build.
pub fn from_env(kind: ProviderKind) -> Result<Arc<dyn ChatProvider>, ProviderError> {
    from_config(ProviderConfig::from_env(kind)?)
}
