//! Prompt service — per-user system prompts.
//!
//! DESIGN
//! ======
//! A user may store a custom system prompt that replaces the default one.
//! The responder only reads; admin routes write. Storage sits behind the
//! [`PromptStore`] trait so the responder can be exercised without Postgres.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::error::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum PromptStoreError {
    #[error("prompt storage failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("prompt must not be empty")]
    EmptyPrompt,
}

impl ErrorCode for PromptStoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_DATABASE",
            Self::EmptyPrompt => "E_EMPTY_PROMPT",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

#[async_trait]
pub trait PromptStore: Send + Sync {
    /// The user's custom prompt, if one is stored.
    async fn get_user_prompt(&self, user_id: &str) -> Result<Option<String>, PromptStoreError>;

    /// Store or replace the user's prompt.
    async fn set_user_prompt(&self, user_id: &str, prompt: &str) -> Result<(), PromptStoreError>;

    /// Remove the user's prompt. Returns whether one existed.
    async fn delete_user_prompt(&self, user_id: &str) -> Result<bool, PromptStoreError>;
}

/// Postgres-backed prompt store over the `user_prompts` table.
#[derive(Clone)]
pub struct PgPromptStore {
    pool: PgPool,
}

impl PgPromptStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PromptStore for PgPromptStore {
    async fn get_user_prompt(&self, user_id: &str) -> Result<Option<String>, PromptStoreError> {
        let row = sqlx::query("SELECT prompt FROM user_prompts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("prompt")))
    }

    async fn set_user_prompt(&self, user_id: &str, prompt: &str) -> Result<(), PromptStoreError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(PromptStoreError::EmptyPrompt);
        }
        sqlx::query(
            r"INSERT INTO user_prompts (user_id, prompt, updated_at)
              VALUES ($1, $2, now())
              ON CONFLICT (user_id) DO UPDATE
              SET prompt = EXCLUDED.prompt, updated_at = now()",
        )
        .bind(user_id)
        .bind(prompt)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_user_prompt(&self, user_id: &str) -> Result<bool, PromptStoreError> {
        let result = sqlx::query("DELETE FROM user_prompts WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
