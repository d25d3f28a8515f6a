//! # mm-api: Binary Entry Point
//!
//! Starts the Axum HTTP server for the middleman coordinator.
//! Binds to configurable port (default 8080).

use std::sync::Arc;

use anyhow::Context;

use mm_api::coordinator::CoordinatorConfig;
use mm_api::notify::{ChatPlatform, LogOnlyPlatform};
use mm_api::state::{AppConfig, AppState};
use mm_api::store::{InMemorySessionStore, PgSessionStore, SessionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured tracing. LOG_FORMAT=json for machine-readable output.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = AppConfig::from_env();
    let protocol = CoordinatorConfig::from_env();
    let port = config.port;
    tracing::info!(?protocol, "protocol settings loaded");

    // Initialize database pool (optional: absent means in-memory only).
    let store: Arc<dyn SessionStore> = match mm_api::db::init_pool()
        .await
        .context("database initialization failed")?
    {
        Some(pool) => Arc::new(PgSessionStore::new(pool)),
        None => Arc::new(InMemorySessionStore::new()),
    };

    let platform: Arc<dyn ChatPlatform> = match mm_chat::ChatApiConfig::from_env() {
        Ok(chat_config) => {
            tracing::info!(base_url = %chat_config.base_url, "chat gateway client configured");
            Arc::new(mm_chat::ChatClient::new(chat_config).context("failed to create chat gateway client")?)
        }
        Err(e) => {
            tracing::warn!("Chat gateway not configured: {e}. Outbound chat commands will only be logged.");
            Arc::new(LogOnlyPlatform)
        }
    };

    let state = AppState::with_parts(config, protocol, store, platform);

    // Re-arm acceptance timers for sessions that were awaiting at shutdown.
    let rearmed = state
        .coordinator
        .rehydrate()
        .await
        .context("timer rehydration failed")?;
    tracing::info!(rearmed, "acceptance timers rehydrated");

    let app = mm_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("middleman coordinator listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
