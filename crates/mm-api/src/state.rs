//! # Application State
//!
//! Shared state handed to every handler: the coordinator (which owns the
//! store, the timers and the notification sink), the reaction adapter, and
//! the metrics registry. Built once in `main`; tests build it from parts.

use std::sync::Arc;

use crate::adapter::ChatEventAdapter;
use crate::coordinator::{AcceptanceCoordinator, CoordinatorConfig};
use crate::middleware::metrics::ApiMetrics;
use crate::notify::{ChatPlatform, LogOnlyPlatform, NotificationSink};
use crate::store::{InMemorySessionStore, SessionStore};

/// HTTP server configuration.
///
/// Custom `Debug` redacts the `auth_token` to prevent credential leakage in logs.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Shared bearer secret. If `None`, authentication is disabled.
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
        }
    }
}

impl AppConfig {
    /// Read `PORT` and `AUTH_TOKEN`.
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);
        let auth_token = std::env::var("AUTH_TOKEN").ok().filter(|t| !t.is_empty());
        Self { port, auth_token }
    }
}

/// Shared application state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub coordinator: AcceptanceCoordinator,
    pub adapter: ChatEventAdapter,
    pub metrics: ApiMetrics,
}

impl AppState {
    /// In-memory store, log-only chat, default protocol settings.
    pub fn new() -> Self {
        Self::with_parts(
            AppConfig::default(),
            CoordinatorConfig::default(),
            Arc::new(InMemorySessionStore::new()),
            Arc::new(LogOnlyPlatform),
        )
    }

    /// Wire the coordinator, sink and adapter around the given backends.
    pub fn with_parts(
        config: AppConfig,
        protocol: CoordinatorConfig,
        store: Arc<dyn SessionStore>,
        platform: Arc<dyn ChatPlatform>,
    ) -> Self {
        let metrics = ApiMetrics::new();
        let sink = NotificationSink::new(platform, protocol.sink_settings(), metrics.clone());
        let coordinator = AcceptanceCoordinator::new(store, sink, protocol.acceptance_window, metrics.clone());
        let adapter = ChatEventAdapter::new(
            coordinator.clone(),
            &protocol.accept_emoji,
            protocol.bot_user_ids.iter().cloned(),
        );
        Self {
            config,
            coordinator,
            adapter,
            metrics,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
