//! Gateway entry — one Discord message in, one reply out.

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use super::error_response;
use crate::error::ErrorCode;
use crate::llm::types::ProviderKind;
use crate::services::responder::RespondError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub provider: ProviderKind,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatRequestError {
    #[error("userId must not be empty")]
    MissingUserId,
    #[error("message must not be empty")]
    EmptyMessage,
}

impl ErrorCode for ChatRequestError {
    fn error_code(&self) -> &'static str {
        "E_INVALID_REQUEST"
    }
}

/// `POST /api/chat` — run one message through the responder.
pub async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    let user_id = req.user_id.trim();
    let message = req.message.trim();
    if user_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, &ChatRequestError::MissingUserId);
    }
    if message.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, &ChatRequestError::EmptyMessage);
    }

    match state.responder.respond(user_id, message).await {
        Ok(reply) => Json(ChatResponse { content: reply.content, provider: reply.provider }).into_response(),
        Err(e @ RespondError::RateLimited { retry_after_secs }) => {
            let mut res = error_response(StatusCode::TOO_MANY_REQUESTS, &e);
            res.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
            res
        }
        Err(e @ RespondError::NoProviderAvailable) => error_response(StatusCode::SERVICE_UNAVAILABLE, &e),
    }
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
