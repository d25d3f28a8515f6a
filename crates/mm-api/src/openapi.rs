//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI 3.1 document
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Adds the bearer token security scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some(
                            "`{role}:{subject}:{secret}` or the bare secret. Set via AUTH_TOKEN env var.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Middleman Coordinator API",
        description = "Mutual-acceptance coordination for middleman escrow sessions.\n\nBoth parties of a trade must accept within the acceptance window before a middleman is summoned. Acceptance arrives from the web or as a reaction relayed by the chat gateway.\n\nAll `/v1/*` endpoints require a bearer token. Health probes and `/metrics` are unauthenticated.",
        license(name = "AGPL-3.0-or-later")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    paths(
        // ── Middleman sessions ──────────────────────────────────────────
        crate::routes::middleman::request_for_trade,
        crate::routes::middleman::create_direct,
        crate::routes::middleman::get_session,
        crate::routes::middleman::get_trade_session,
        crate::routes::middleman::confirm_direct,
        crate::routes::middleman::accept,
        crate::routes::middleman::decline,
        crate::routes::middleman::complete,
        // ── Chat relay ──────────────────────────────────────────────────
        crate::routes::reactions::relay_reaction,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            crate::routes::middleman::TradeRequestBody,
            crate::routes::middleman::DirectRequestBody,
            crate::routes::middleman::PartyActionBody,
            crate::routes::middleman::CompleteBody,
            crate::routes::middleman::SessionResponse,
            crate::routes::middleman::TradeRequestResponse,
            crate::routes::middleman::AcceptResponse,
            crate::adapter::ReactionEvent,
            crate::adapter::ReactionDisposition,
            crate::routes::reactions::ReactionResponse,
        ),
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "middleman", description = "Middleman requests, acceptance, decline and completion"),
        (name = "chat", description = "Reaction relay from the chat gateway"),
    )
)]
pub struct ApiDoc;

/// Serves the document at `/openapi.json`.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_generates() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "Middleman Coordinator API");
    }

    #[test]
    fn document_lists_session_paths() {
        let spec = ApiDoc::openapi();
        for path in [
            "/v1/middleman/trade-requests",
            "/v1/middleman/requests",
            "/v1/middleman/requests/{id}",
            "/v1/middleman/requests/{id}/accept",
            "/v1/middleman/requests/{id}/decline",
            "/v1/middleman/requests/{id}/complete",
            "/v1/middleman/trades/{trade_id}",
            "/v1/chat/reactions",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn document_has_bearer_scheme() {
        let spec = ApiDoc::openapi();
        let components = spec.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
