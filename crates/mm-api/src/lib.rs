//! # mm-api: Middleman Acceptance Coordinator
//!
//! Coordinates the mutual-acceptance step before a middleman joins a trade.
//! Both parties must accept within the acceptance window; the first
//! terminal outcome (ready, declined or timed out) wins and every later
//! event is a no-op.
//!
//! ## API Surface
//!
//! | Prefix                   | Module                  | Domain                  |
//! |--------------------------|-------------------------|-------------------------|
//! | `/v1/middleman/*`        | [`routes::middleman`]   | Sessions and acceptance |
//! | `/v1/chat/reactions`     | [`routes::reactions`]   | Reaction relay          |
//! | `/openapi.json`          | [`openapi`]             | API document            |
//! | `/health/*`, `/metrics`  | this module             | Probes (no auth)        |
//!
//! ## Components
//!
//! - [`store`]: durable session records. Every transition is a
//!   compare-and-set, so exactly one writer resolves a session.
//! - [`timers`]: one acceptance timer per awaiting session, rebuilt from
//!   the store on startup.
//! - [`notify`]: outbound chat commands. Failures are logged and counted,
//!   never surfaced to the protocol.
//! - [`coordinator`]: the protocol itself.
//! - [`adapter`]: filters relayed reactions down to acceptances.
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → AuthMiddleware → Handler
//! ```

pub mod adapter;
pub mod auth;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod notify;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod store;
pub mod timers;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::{Extension, Router};
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::middleware::metrics::ApiMetrics;
use crate::state::AppState;

/// Check if metrics are enabled via the `MM_METRICS_ENABLED` env var.
/// Defaults to `true` when the variable is absent or set to anything other than `"false"`.
fn metrics_enabled() -> bool {
    std::env::var("MM_METRICS_ENABLED")
        .map(|v| v.to_lowercase() != "false")
        .unwrap_or(true)
}

/// Assemble the full application router with all routes and middleware.
///
/// Health probes (`/health/*`) and `/metrics` are mounted outside the auth
/// middleware so they remain accessible without credentials.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        token: state.config.auth_token.clone(),
    };
    let metrics = state.metrics.clone();
    let metrics_on = metrics_enabled();

    // Request bodies are small JSON documents.
    let mut api = Router::new()
        .merge(routes::middleman::router())
        .merge(routes::reactions::router())
        .merge(openapi::router())
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(from_fn(auth::auth_middleware));

    if metrics_on {
        api = api
            .layer(from_fn(middleware::metrics::metrics_middleware))
            .layer(Extension(metrics.clone()));
    }

    let api = api
        .layer(TraceLayer::new_for_http())
        .layer(Extension(auth_config))
        .with_state(state.clone());

    let mut unauthenticated = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness));

    if metrics_on {
        unauthenticated = unauthenticated
            .route("/metrics", axum::routing::get(prometheus_metrics))
            .layer(Extension(metrics));
    }

    let unauthenticated = unauthenticated.with_state(state);

    Router::new().merge(unauthenticated).merge(api)
}

/// GET /metrics: Prometheus scrape endpoint.
///
/// Samples the armed-timer gauge, then encodes the registry in text format.
async fn prometheus_metrics(
    State(state): State<AppState>,
    Extension(metrics): Extension<ApiMetrics>,
) -> impl IntoResponse {
    metrics
        .timers_armed()
        .set(state.coordinator.timers().armed_count() as i64);

    match metrics.gather_and_encode() {
        Ok(body) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode Prometheus metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e).into_response()
        }
    }
}

/// Liveness probe: always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: 200 "ready" when the session store answers, 503
/// otherwise.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.coordinator.store();
    if let Err(e) = store.ping().await {
        tracing::warn!(backend = store.backend(), "session store health check failed: {e}");
        return (StatusCode::SERVICE_UNAVAILABLE, "session store unreachable").into_response();
    }
    (StatusCode::OK, "ready").into_response()
}
