//! Per-user system prompt management (admin).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::admin::AdminAuth;
use super::error_response;
use crate::services::prompt::PromptStoreError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    pub user_id: String,
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct PromptBody {
    pub prompt: String,
}

fn store_error(user_id: &str, err: &PromptStoreError) -> Response {
    match err {
        PromptStoreError::EmptyPrompt => error_response(StatusCode::BAD_REQUEST, err),
        PromptStoreError::Database(_) => {
            error!(%user_id, error = %err, "prompt store failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err)
        }
    }
}

/// `GET /api/users/{user_id}/prompt`
pub async fn get_prompt(State(state): State<AppState>, _admin: AdminAuth, Path(user_id): Path<String>) -> Response {
    match state.prompts.get_user_prompt(&user_id).await {
        Ok(Some(prompt)) => Json(PromptResponse { user_id, prompt }).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => store_error(&user_id, &e),
    }
}

/// `PUT /api/users/{user_id}/prompt` — create or replace.
pub async fn set_prompt(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(user_id): Path<String>,
    Json(body): Json<PromptBody>,
) -> Response {
    match state.prompts.set_user_prompt(&user_id, &body.prompt).await {
        Ok(()) => {
            info!(%user_id, prompt_len = body.prompt.len(), "prompt stored");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => store_error(&user_id, &e),
    }
}

/// `DELETE /api/users/{user_id}/prompt`
pub async fn delete_prompt(State(state): State<AppState>, _admin: AdminAuth, Path(user_id): Path<String>) -> Response {
    match state.prompts.delete_user_prompt(&user_id).await {
        Ok(true) => {
            info!(%user_id, "prompt deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => store_error(&user_id, &e),
    }
}

#[cfg(test)]
#[path = "prompts_test.rs"]
mod tests;
