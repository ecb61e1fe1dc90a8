//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router carries the gateway entry (`/api/chat`), the dashboard
//! reads, and the admin surface. The Discord gateway process posts each
//! inbound message to `/api/chat` and relays the reply or the error message
//! verbatim.

pub mod admin;
pub mod chat;
pub mod prompts;

use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{ErrorBody, ErrorCode};
use crate::state::AppState;

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(chat::chat))
        .route("/api/stats", get(admin::stats))
        .route("/api/stats/conversations", get(admin::conversation_stats))
        .route("/api/admin/rate-limits/users/{user_id}/reset", post(admin::reset_user_rate_limit))
        .route("/api/admin/rate-limits/global/reset", post(admin::reset_global_quota))
        .route("/api/admin/rate-limits/reset", post(admin::reset_all_rate_limits))
        .route("/api/admin/conversations", delete(admin::clear_conversations))
        .route("/api/admin/conversations/{user_id}", delete(admin::clear_conversation))
        .route("/api/admin/provider", put(admin::set_provider_selection))
        .route("/api/admin/providers/health", get(admin::provider_health))
        .route(
            "/api/users/{user_id}/prompt",
            get(prompts::get_prompt)
                .put(prompts::set_prompt)
                .delete(prompts::delete_prompt),
        )
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// `{code, message, retryable}` body with the given status.
pub(crate) fn error_response(status: StatusCode, err: &(impl ErrorCode + ?Sized)) -> Response {
    (status, Json(ErrorBody::from_error(err))).into_response()
}
