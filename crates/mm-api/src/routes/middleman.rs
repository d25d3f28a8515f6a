//! # Middleman Session API
//!
//! Web-side entry points of the acceptance protocol. Handlers check who
//! may act and delegate to the [`AcceptanceCoordinator`](crate::coordinator::AcceptanceCoordinator).
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/v1/middleman/trade-requests` | `request_for_trade` |
//! | `POST` | `/v1/middleman/requests` | `create_direct` |
//! | `GET` | `/v1/middleman/requests/{id}` | `get_session` |
//! | `POST` | `/v1/middleman/requests/{id}/confirm` | `confirm_direct` |
//! | `POST` | `/v1/middleman/requests/{id}/accept` | `accept` |
//! | `POST` | `/v1/middleman/requests/{id}/decline` | `decline` |
//! | `POST` | `/v1/middleman/requests/{id}/complete` | `complete` |
//! | `GET` | `/v1/middleman/trades/{trade_id}` | `get_trade_session` |
//!
//! Party tokens act only as their own subject. Gateway and moderator tokens
//! name the party in the body.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use mm_core::{PartyId, RequestId, ThreadRef, TradeId};
use mm_state::{MergeOutcome, MiddlemanRequest, RequestOrigin, RequestStatus};

use crate::auth::{require_acting_as, require_role, CallerIdentity, Role};
use crate::coordinator::AcceptOutcome;
use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, Validate};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// A party asks for a middleman on a marketplace trade.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct TradeRequestBody {
    #[schema(value_type = String)]
    pub trade_id: TradeId,
    #[schema(value_type = String)]
    pub requester_id: PartyId,
    /// The other side of the trade, when the marketplace knows it.
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub counterparty_id: Option<PartyId>,
}

impl Validate for TradeRequestBody {
    fn validate(&self) -> Result<(), String> {
        if self.counterparty_id.as_ref() == Some(&self.requester_id) {
            return Err("counterparty_id must differ from requester_id".into());
        }
        Ok(())
    }
}

/// A party invites another to a middleman session outside a trade.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct DirectRequestBody {
    #[schema(value_type = String)]
    pub requester_id: PartyId,
    #[schema(value_type = String)]
    pub counterparty_id: PartyId,
}

impl Validate for DirectRequestBody {
    fn validate(&self) -> Result<(), String> {
        if self.counterparty_id == self.requester_id {
            return Err("counterparty_id must differ from requester_id".into());
        }
        Ok(())
    }
}

/// Names the acting party. Party tokens may omit it.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PartyActionBody {
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub party_id: Option<PartyId>,
}

/// A middleman claims a ready session.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CompleteBody {
    /// Defaults to the caller's subject.
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub middleman_id: Option<PartyId>,
}

/// A middleman session as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub id: Uuid,
    #[schema(value_type = Option<String>)]
    pub trade_id: Option<TradeId>,
    #[schema(value_type = String)]
    pub origin: RequestOrigin,
    #[schema(value_type = String)]
    pub party_a: PartyId,
    #[schema(value_type = Option<String>)]
    pub party_b: Option<PartyId>,
    pub party_a_accepted: bool,
    pub party_b_accepted: bool,
    #[schema(value_type = String)]
    pub status: RequestStatus,
    #[schema(value_type = Option<String>)]
    pub thread_ref: Option<ThreadRef>,
    #[schema(value_type = Option<String>)]
    pub middleman_id: Option<PartyId>,
    pub created_at: DateTime<Utc>,
    pub awaiting_since: Option<DateTime<Utc>>,
    /// End of the acceptance window, while it is running.
    pub deadline: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SessionResponse {
    pub fn from_record(record: MiddlemanRequest, window: std::time::Duration) -> Self {
        let deadline = (record.status == RequestStatus::AwaitingAcceptance).then(|| record.deadline(window));
        Self {
            id: *record.id.as_uuid(),
            trade_id: record.trade_id,
            origin: record.origin,
            party_a: record.party_a,
            party_b: record.party_b,
            party_a_accepted: record.party_a_accepted,
            party_b_accepted: record.party_b_accepted,
            status: record.status,
            thread_ref: record.thread_ref,
            middleman_id: record.middleman_id,
            created_at: record.created_at,
            awaiting_since: record.awaiting_since,
            deadline,
            resolved_at: record.resolved_at,
            updated_at: record.updated_at,
        }
    }
}

/// Result of a trade-side request.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TradeRequestResponse {
    /// `created`, `merged` or `unchanged`.
    #[schema(value_type = String)]
    pub outcome: MergeOutcome,
    pub session: SessionResponse,
}

/// Result of an acceptance.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AcceptResponse {
    /// `accepted`, `duplicate`, `ready` or `already_resolved`.
    pub outcome: String,
    pub session: SessionResponse,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the middleman session router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/middleman/trade-requests", post(request_for_trade))
        .route("/v1/middleman/requests", post(create_direct))
        .route("/v1/middleman/requests/{id}", get(get_session))
        .route("/v1/middleman/requests/{id}/confirm", post(confirm_direct))
        .route("/v1/middleman/requests/{id}/accept", post(accept))
        .route("/v1/middleman/requests/{id}/decline", post(decline))
        .route("/v1/middleman/requests/{id}/complete", post(complete))
        .route("/v1/middleman/trades/{trade_id}", get(get_trade_session))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The party a request acts as: the body's `party_id`, else the caller's
/// subject.
fn acting_party(caller: &CallerIdentity, named: Option<PartyId>) -> Result<PartyId, AppError> {
    let party = named
        .or_else(|| caller.subject.clone())
        .ok_or_else(|| AppError::Validation("party_id is required for this token".into()))?;
    require_acting_as(caller, &party)?;
    Ok(party)
}

/// Bodies on action endpoints are optional; no JSON body means defaults.
fn optional_body<T: Default>(body: Result<Option<Json<T>>, JsonRejection>) -> Result<T, AppError> {
    match body {
        Ok(Some(Json(value))) => Ok(value),
        Ok(None) => Ok(T::default()),
        Err(rejection) => extract_json::<T>(Err(rejection)),
    }
}

fn respond(state: &AppState, record: MiddlemanRequest) -> SessionResponse {
    SessionResponse::from_record(record, state.coordinator.acceptance_window())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /v1/middleman/trade-requests: Request a middleman for a trade.
#[utoipa::path(
    post,
    path = "/v1/middleman/trade-requests",
    request_body = TradeRequestBody,
    responses(
        (status = 201, description = "First request recorded", body = TradeRequestResponse),
        (status = 200, description = "Merged with the counterparty's request, or unchanged", body = TradeRequestResponse),
        (status = 409, description = "Trade has an open session with other parties", body = crate::error::ErrorBody),
    ),
    tag = "middleman"
)]
pub(crate) async fn request_for_trade(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<TradeRequestBody>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = extract_validated_json(body)?;
    require_acting_as(&caller, &req.requester_id)?;

    let (session, outcome) = state
        .coordinator
        .on_requested(&req.trade_id, &req.requester_id, req.counterparty_id.as_ref())
        .await?;

    let status = match outcome {
        MergeOutcome::Created => StatusCode::CREATED,
        MergeOutcome::Merged | MergeOutcome::Unchanged => StatusCode::OK,
    };
    Ok((
        status,
        Json(TradeRequestResponse {
            outcome,
            session: respond(&state, session),
        }),
    ))
}

/// POST /v1/middleman/requests: Invite a party to a direct session.
#[utoipa::path(
    post,
    path = "/v1/middleman/requests",
    request_body = DirectRequestBody,
    responses(
        (status = 201, description = "Direct session opened, awaiting the invitee", body = SessionResponse),
        (status = 422, description = "Invalid parties", body = crate::error::ErrorBody),
    ),
    tag = "middleman"
)]
pub(crate) async fn create_direct(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<DirectRequestBody>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = extract_validated_json(body)?;
    require_acting_as(&caller, &req.requester_id)?;

    let session = state
        .coordinator
        .on_direct_requested(&req.requester_id, &req.counterparty_id)
        .await?;
    Ok((StatusCode::CREATED, Json(respond(&state, session))))
}

/// GET /v1/middleman/requests/{id}: Session state.
#[utoipa::path(
    get,
    path = "/v1/middleman/requests/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session", body = SessionResponse),
        (status = 404, description = "Unknown session", body = crate::error::ErrorBody),
    ),
    tag = "middleman"
)]
pub(crate) async fn get_session(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, AppError> {
    let session = state.coordinator.session(RequestId::from_uuid(id)).await?;
    if !caller.can_view(&session) {
        return Err(AppError::Forbidden("caller is not a party to this session".into()));
    }
    Ok(Json(respond(&state, session)))
}

/// GET /v1/middleman/trades/{trade_id}: Latest session for a trade.
#[utoipa::path(
    get,
    path = "/v1/middleman/trades/{trade_id}",
    params(("trade_id" = String, Path, description = "Marketplace trade id")),
    responses(
        (status = 200, description = "Latest session for the trade", body = SessionResponse),
        (status = 404, description = "No session for this trade", body = crate::error::ErrorBody),
    ),
    tag = "middleman"
)]
pub(crate) async fn get_trade_session(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(trade_id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    let trade_id = TradeId::new(&trade_id)?;
    let session = state.coordinator.session_for_trade(&trade_id).await?;
    if !caller.can_view(&session) {
        return Err(AppError::Forbidden("caller is not a party to this session".into()));
    }
    Ok(Json(respond(&state, session)))
}

/// POST /v1/middleman/requests/{id}/confirm: Invitee confirms a direct session.
#[utoipa::path(
    post,
    path = "/v1/middleman/requests/{id}/confirm",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = PartyActionBody,
    responses(
        (status = 200, description = "Acceptance window opened", body = SessionResponse),
        (status = 409, description = "Not a pending direct invitation for this party", body = crate::error::ErrorBody),
    ),
    tag = "middleman"
)]
pub(crate) async fn confirm_direct(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Option<Json<PartyActionBody>>, JsonRejection>,
) -> Result<Json<SessionResponse>, AppError> {
    let req = optional_body(body)?;
    let party = acting_party(&caller, req.party_id)?;
    let session = state
        .coordinator
        .on_direct_confirmed(RequestId::from_uuid(id), &party)
        .await?;
    Ok(Json(respond(&state, session)))
}

/// POST /v1/middleman/requests/{id}/accept: Web-side acceptance.
///
/// Accepting a session that already resolved is not an error; the outcome
/// says so and nothing changes.
#[utoipa::path(
    post,
    path = "/v1/middleman/requests/{id}/accept",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = PartyActionBody,
    responses(
        (status = 200, description = "Acceptance recorded or ignored", body = AcceptResponse),
        (status = 403, description = "Caller is not a party", body = crate::error::ErrorBody),
        (status = 409, description = "Session is not awaiting acceptance", body = crate::error::ErrorBody),
    ),
    tag = "middleman"
)]
pub(crate) async fn accept(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Option<Json<PartyActionBody>>, JsonRejection>,
) -> Result<Json<AcceptResponse>, AppError> {
    let req = optional_body(body)?;
    let party = acting_party(&caller, req.party_id)?;
    let id = RequestId::from_uuid(id);

    let outcome = state.coordinator.on_party_accepted(id, &party).await?;
    let label = outcome.as_str().to_string();
    let session = match outcome {
        AcceptOutcome::Pending { session, .. } | AcceptOutcome::Ready(session) => session,
        AcceptOutcome::AlreadyResolved { .. } => state.coordinator.session(id).await?,
    };
    Ok(Json(AcceptResponse {
        outcome: label,
        session: respond(&state, session),
    }))
}

/// POST /v1/middleman/requests/{id}/decline: Decline an open session.
///
/// Allowed for moderators and for either party of the session.
#[utoipa::path(
    post,
    path = "/v1/middleman/requests/{id}/decline",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = PartyActionBody,
    responses(
        (status = 200, description = "Session declined; thread teardown scheduled", body = SessionResponse),
        (status = 409, description = "Session already resolved", body = crate::error::ErrorBody),
    ),
    tag = "middleman"
)]
pub(crate) async fn decline(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Option<Json<PartyActionBody>>, JsonRejection>,
) -> Result<Json<SessionResponse>, AppError> {
    let req = optional_body(body)?;
    let id = RequestId::from_uuid(id);

    if !caller.has_role(Role::Moderator) {
        let party = acting_party(&caller, req.party_id)?;
        let session = state.coordinator.session(id).await?;
        if !session.is_party(&party) {
            return Err(AppError::Forbidden(format!("{party} is not a party to this session")));
        }
    }

    let session = state.coordinator.decline(id).await?;
    Ok(Json(respond(&state, session)))
}

/// POST /v1/middleman/requests/{id}/complete: Middleman claims a ready session.
#[utoipa::path(
    post,
    path = "/v1/middleman/requests/{id}/complete",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = CompleteBody,
    responses(
        (status = 200, description = "Session completed", body = SessionResponse),
        (status = 403, description = "Moderator role required", body = crate::error::ErrorBody),
        (status = 409, description = "Session is not ready", body = crate::error::ErrorBody),
    ),
    tag = "middleman"
)]
pub(crate) async fn complete(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Option<Json<CompleteBody>>, JsonRejection>,
) -> Result<Json<SessionResponse>, AppError> {
    require_role(&caller, Role::Moderator)?;
    let req = optional_body(body)?;
    let middleman = req
        .middleman_id
        .or_else(|| caller.subject.clone())
        .ok_or_else(|| AppError::Validation("middleman_id is required for this token".into()))?;

    let session = state
        .coordinator
        .complete(RequestId::from_uuid(id), &middleman)
        .await?;
    Ok(Json(respond(&state, session)))
}
