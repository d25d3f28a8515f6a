//! # Reaction Relay
//!
//! The chat gateway forwards every reaction added in a coordination thread
//! here. Only gateway (or moderator) tokens may relay. The response always
//! reports what happened to the reaction, so the gateway can redeliver
//! freely.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::adapter::{ReactionDisposition, ReactionEvent};
use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::extract_json;
use crate::state::AppState;

/// Outcome of a relayed reaction.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReactionResponse {
    pub disposition: ReactionDisposition,
    /// The session the reaction was matched to, if any.
    pub request_id: Option<Uuid>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/chat/reactions", post(relay_reaction))
}

/// POST /v1/chat/reactions: Relay a reaction from the chat gateway.
#[utoipa::path(
    post,
    path = "/v1/chat/reactions",
    request_body = ReactionEvent,
    responses(
        (status = 200, description = "Reaction classified", body = ReactionResponse),
        (status = 403, description = "Gateway role required", body = crate::error::ErrorBody),
        (status = 503, description = "Session store unavailable", body = crate::error::ErrorBody),
    ),
    tag = "chat"
)]
pub(crate) async fn relay_reaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<ReactionEvent>, JsonRejection>,
) -> Result<Json<ReactionResponse>, AppError> {
    require_role(&caller, Role::Gateway)?;
    let event = extract_json(body)?;

    let (disposition, request_id) = state.adapter.on_reaction(&event).await?;
    Ok(Json(ReactionResponse {
        disposition,
        request_id: request_id.map(|id| *id.as_uuid()),
    }))
}
