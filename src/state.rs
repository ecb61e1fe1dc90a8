//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! The responder owns the pipeline; the rate limiter, conversation store,
//! and prompt store are the same handles the responder uses, exposed so
//! dashboard and admin routes read and reset the live state.

use std::sync::Arc;

use crate::conversation::ConversationStore;
use crate::rate_limit::RateLimiter;
use crate::services::prompt::PromptStore;
use crate::services::responder::Responder;

/// Shared application state. Clone is required by Axum; every field is a
/// cheap handle.
#[derive(Clone)]
pub struct AppState {
    pub responder: Arc<Responder>,
    pub rate_limiter: RateLimiter,
    pub conversations: ConversationStore,
    pub prompts: Arc<dyn PromptStore>,
    /// Bearer token for admin routes. `None` disables them.
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    #[must_use]
    pub fn new(responder: Responder, admin_token: Option<String>) -> Self {
        Self {
            rate_limiter: responder.rate_limiter().clone(),
            conversations: responder.conversations().clone(),
            prompts: Arc::clone(responder.prompts()),
            responder: Arc::new(responder),
            admin_token: admin_token.map(Arc::from),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
