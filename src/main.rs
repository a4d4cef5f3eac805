//! SMB review bot
//!
//! Conversation orchestrator for a small-business customer bot: chats with
//! customers, asks satisfied ones for a review, and records what they write.

mod access;
mod api;
mod db;
mod llm;
mod notifier;
mod prompts;
mod runtime;
mod state_machine;

use api::{create_router, AppState, Delivery};
use db::Database;
use llm::{LlmConfig, ModelRegistry};
use notifier::{OutboxNotifier, WebhookNotifier};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smb_review_bot=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let db_path = std::env::var("SMB_DB_PATH").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.smb-review-bot/bot.db")
    });

    let port: u16 = std::env::var("SMB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %db_path, "Opening database");
    let db = Database::open(&db_path)?;

    // Initialize LLM registry
    let llm_config = LlmConfig::from_env();
    let llm_registry = Arc::new(ModelRegistry::new(&llm_config));

    if llm_registry.has_models() {
        tracing::info!(
            models = ?llm_registry.available_models(),
            default = %llm_registry.default_model_id(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!(
            keys = ?LlmConfig::key_env_vars(),
            "No LLM API keys configured; replies will use canned fallbacks"
        );
    }

    // Reply delivery
    let delivery = match std::env::var("SMB_NOTIFY_WEBHOOK") {
        Ok(url) if !url.trim().is_empty() => {
            tracing::info!(url = %url, "Delivering replies via webhook");
            Delivery::Other(Arc::new(WebhookNotifier::new(url)))
        }
        _ => {
            tracing::info!("Delivering replies to in-memory outbox");
            Delivery::Outbox(Arc::new(OutboxNotifier::new()))
        }
    };

    let state = AppState::new(db, llm_registry, access::policy_from_env(), delivery);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new().gzip(true).br(true);

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("SMB review bot listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
