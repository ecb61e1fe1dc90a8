mod config;
mod conversation;
mod db;
mod error;
mod llm;
mod rate_limit;
mod routes;
mod services;
mod state;
mod tokens;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::conversation::ConversationStore;
use crate::llm::ChatProvider;
use crate::llm::types::ProviderKind;
use crate::rate_limit::RateLimiter;
use crate::services::prompt::PgPromptStore;
use crate::services::responder::{Responder, ResponderConfig};
use crate::services::scheduler::BackgroundTasks;

/// Build one provider client; a missing or broken config disables it.
fn provider(kind: ProviderKind) -> Option<Arc<dyn ChatProvider>> {
    match llm::from_env(kind) {
        Ok(client) => {
            tracing::info!(provider = %kind, model = client.model(), "provider client initialized");
            Some(client)
        }
        Err(e) => {
            tracing::warn!(provider = %kind, error = %e, "provider not configured; disabled");
            None
        }
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::AppConfig::from_env().expect("invalid configuration");

    let pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("database init failed");

    let primary = provider(ProviderKind::Groq);
    let fallback = provider(ProviderKind::HuggingFace);
    if primary.is_none() && fallback.is_none() {
        tracing::warn!("no provider configured; every chat request will fail");
    }
    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN not set; admin routes disabled");
    }

    let responder = Responder::new(
        RateLimiter::new(),
        ConversationStore::new(),
        Arc::new(PgPromptStore::new(pool)),
        primary,
        fallback,
        ResponderConfig::from_env(),
    );
    let state = state::AppState::new(responder, config.admin_token.clone());
    let tasks = BackgroundTasks::spawn(Arc::clone(&state.responder));

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, "relaybot listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");

    tasks.shutdown().await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
