//! Dashboard reads and admin mutations.

use axum::extract::{FromRef, Path, State};
use axum::http::{StatusCode, header};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::conversation::ConversationStats;
use crate::rate_limit::{RateLimitSnapshot, ResetAllSummary};
use crate::services::responder::{ProviderHealth, ProviderSelection, ResponderStats};
use crate::state::AppState;

// =============================================================================
// ADMIN EXTRACTOR
// =============================================================================

/// Guard for admin routes: `Authorization: Bearer <ADMIN_TOKEN>`.
/// Rejects with 503 when no token is configured and 401 on a mismatch.
pub struct AdminAuth;

impl<S> axum::extract::FromRequestParts<S> for AdminAuth
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let Some(expected) = app_state.admin_token.as_deref() else {
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        };
        let presented = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .unwrap_or_default();
        if presented.is_empty() || presented != expected {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(Self)
    }
}

// =============================================================================
// DASHBOARD
// =============================================================================

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub rate_limits: RateLimitSnapshot,
    pub responder: ResponderStats,
}

/// `GET /api/stats` — quota, per-user windows, provider routing and usage.
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse { rate_limits: state.rate_limiter.snapshot(), responder: state.responder.stats() })
}

/// `GET /api/stats/conversations`
pub async fn conversation_stats(State(state): State<AppState>) -> Json<ConversationStats> {
    Json(state.conversations.stats())
}

// =============================================================================
// RATE LIMITS
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResetResponse {
    pub user_id: String,
    pub previous_count: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalResetResponse {
    pub previous_count: u64,
}

/// `POST /api/admin/rate-limits/users/{user_id}/reset`
pub async fn reset_user_rate_limit(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(user_id): Path<String>,
) -> Json<UserResetResponse> {
    let previous_count = state.rate_limiter.reset_user(&user_id);
    info!(%user_id, previous_count, "admin: user rate limit reset");
    Json(UserResetResponse { user_id, previous_count })
}

/// `POST /api/admin/rate-limits/global/reset`
pub async fn reset_global_quota(State(state): State<AppState>, _admin: AdminAuth) -> Json<GlobalResetResponse> {
    let previous_count = state.responder.reset_global();
    info!(previous_count, "admin: global quota reset");
    Json(GlobalResetResponse { previous_count })
}

/// `POST /api/admin/rate-limits/reset` — every user window and the quota.
pub async fn reset_all_rate_limits(State(state): State<AppState>, _admin: AdminAuth) -> Json<ResetAllSummary> {
    let summary = state.rate_limiter.reset_all();
    state.responder.clear_primary_cooldown();
    info!(
        users_cleared = summary.users_cleared,
        global_previous = summary.global_previous,
        "admin: all rate limits reset"
    );
    Json(summary)
}

// =============================================================================
// CONVERSATIONS
// =============================================================================

#[derive(Serialize)]
pub struct ClearAllResponse {
    pub cleared: usize,
}

#[derive(Serialize)]
pub struct ClearOneResponse {
    pub cleared: bool,
}

/// `DELETE /api/admin/conversations`
pub async fn clear_conversations(State(state): State<AppState>, _admin: AdminAuth) -> Json<ClearAllResponse> {
    let cleared = state.conversations.clear_all();
    info!(cleared, "admin: all conversations cleared");
    Json(ClearAllResponse { cleared })
}

/// `DELETE /api/admin/conversations/{user_id}`
pub async fn clear_conversation(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(user_id): Path<String>,
) -> Json<ClearOneResponse> {
    let cleared = state.conversations.clear_context(&user_id);
    info!(%user_id, cleared, "admin: conversation cleared");
    Json(ClearOneResponse { cleared })
}

// =============================================================================
// PROVIDERS
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct SelectionBody {
    pub selection: ProviderSelection,
}

/// `PUT /api/admin/provider` — `{"selection": "auto" | "primary" | "fallback"}`.
pub async fn set_provider_selection(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Json(body): Json<SelectionBody>,
) -> Json<SelectionBody> {
    state.responder.set_selection(body.selection);
    Json(SelectionBody { selection: state.responder.selection() })
}

/// `GET /api/admin/providers/health` — live probe of each configured provider.
pub async fn provider_health(State(state): State<AppState>, _admin: AdminAuth) -> Json<Vec<ProviderHealth>> {
    Json(state.responder.provider_health().await)
}

#[cfg(test)]
#[path = "admin_test.rs"]
mod tests;
