//! # Authentication & Authorization Middleware
//!
//! Bearer token middleware with role-based access control.
//!
//! ## Token Format
//!
//! ```text
//! Bearer {role}:{subject}:{secret}    scoped token
//! Bearer {secret}                     legacy token (treated as Moderator)
//! ```
//!
//! `subject` is the party id a `party` token acts for. It may be empty for
//! `gateway` and `moderator` tokens.
//!
//! ## CallerIdentity
//!
//! Every authenticated request gets a [`CallerIdentity`] injected into the
//! request extensions. Handlers extract it via the `FromRequestParts` impl.

use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use utoipa::ToSchema;

use mm_core::PartyId;
use mm_state::MiddlemanRequest;

use crate::error::{AppError, ErrorBody, ErrorDetail};

// ── Role ────────────────────────────────────────────────────────────────────

/// Roles ordered by privilege: `Party < Gateway < Moderator`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A trading party acting for itself.
    Party,
    /// The chat gateway relaying reactions. May act for any party.
    Gateway,
    /// Marketplace staff and middlemen. Full access.
    Moderator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Party => "party",
            Self::Gateway => "gateway",
            Self::Moderator => "moderator",
        }
    }
}

// ── CallerIdentity ──────────────────────────────────────────────────────────

/// Identity of the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub role: Role,
    /// The party this caller acts as. Always set for `Party`.
    pub subject: Option<PartyId>,
}

impl CallerIdentity {
    pub fn moderator() -> Self {
        Self {
            role: Role::Moderator,
            subject: None,
        }
    }

    pub fn has_role(&self, minimum: Role) -> bool {
        self.role >= minimum
    }

    /// Whether the caller may act as `party`: parties only as themselves,
    /// gateway and moderators as anyone.
    pub fn can_act_as(&self, party: &PartyId) -> bool {
        match self.role {
            Role::Party => self.subject.as_ref() == Some(party),
            Role::Gateway | Role::Moderator => true,
        }
    }

    /// Whether the caller may see `session`.
    pub fn can_view(&self, session: &MiddlemanRequest) -> bool {
        match (self.role, &self.subject) {
            (Role::Party, Some(subject)) => session.is_party(subject),
            (Role::Party, None) => false,
            (Role::Gateway | Role::Moderator, _) => true,
        }
    }
}

/// Extracts the identity the auth middleware injected. Returns 401 if
/// absent.
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no caller identity in request context".into()))
    }
}

/// 403 unless the caller has at least `minimum`.
pub fn require_role(caller: &CallerIdentity, minimum: Role) -> Result<(), AppError> {
    if caller.has_role(minimum) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "role '{}' required, caller has '{}'",
            minimum.as_str(),
            caller.role.as_str()
        )))
    }
}

/// 403 unless the caller may act as `party`.
pub fn require_acting_as(caller: &CallerIdentity, party: &PartyId) -> Result<(), AppError> {
    if caller.can_act_as(party) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("caller may not act as party {party}")))
    }
}

// ── Auth Configuration ──────────────────────────────────────────────────────

/// Auth configuration injected into request extensions.
#[derive(Clone)]
pub struct AuthConfig {
    pub token: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ── Token Validation ────────────────────────────────────────────────────────

/// Constant-time comparison of bearer secrets.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Parse a bearer token in format `{role}:{subject}:{secret}` or `{secret}`.
pub fn parse_bearer_token(provided: &str, expected_secret: &str) -> Result<CallerIdentity, String> {
    let parts: Vec<&str> = provided.splitn(3, ':').collect();

    match parts.as_slice() {
        [secret] => {
            if constant_time_token_eq(secret, expected_secret) {
                Ok(CallerIdentity::moderator())
            } else {
                Err("invalid bearer token".into())
            }
        }
        [role, subject, secret] => {
            if !constant_time_token_eq(secret, expected_secret) {
                return Err("invalid bearer token".into());
            }

            let role = match *role {
                "party" => Role::Party,
                "gateway" => Role::Gateway,
                "moderator" => Role::Moderator,
                other => return Err(format!("unknown role: {other}")),
            };

            let subject = if subject.is_empty() {
                None
            } else {
                Some(PartyId::new(subject).map_err(|e| format!("invalid subject: {e}"))?)
            };

            if role == Role::Party && subject.is_none() {
                return Err("party tokens must name a subject".into());
            }

            Ok(CallerIdentity { role, subject })
        }
        _ => Err("invalid token format: expected {role}:{subject}:{secret} or {secret}".into()),
    }
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Validate the Bearer token and inject the caller's [`CallerIdentity`].
///
/// When `AuthConfig.token` is `None`, every request runs as a moderator
/// (auth disabled, development mode).
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let expected_token = request.extensions().get::<AuthConfig>().cloned();

    match expected_token {
        Some(AuthConfig {
            token: Some(ref expected),
        }) => {
            let auth_header = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());

            match auth_header.map(|v| v.strip_prefix("Bearer ")) {
                Some(Some(provided)) => match parse_bearer_token(provided, expected) {
                    Ok(identity) => {
                        request.extensions_mut().insert(identity);
                        next.run(request).await
                    }
                    Err(msg) => {
                        tracing::warn!(reason = %msg, "authentication failed: invalid bearer token");
                        unauthorized_response(&msg)
                    }
                },
                Some(None) => {
                    tracing::warn!("authentication failed: non-Bearer authorization scheme");
                    unauthorized_response("authorization header must use Bearer scheme")
                }
                None => {
                    tracing::warn!("authentication failed: missing authorization header");
                    unauthorized_response("missing authorization header")
                }
            }
        }
        _ => {
            request.extensions_mut().insert(CallerIdentity::moderator());
            next.run(request).await
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
            details: None,
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::middleware::from_fn;
    use axum::routing::get;
    use axum::Router;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app(token: Option<String>) -> Router {
        let auth_config = AuthConfig { token };
        Router::new()
            .route(
                "/whoami",
                get(|caller: CallerIdentity| async move {
                    format!(
                        "{}:{}",
                        caller.role.as_str(),
                        caller.subject.map(|s| s.to_string()).unwrap_or_default()
                    )
                }),
            )
            .layer(from_fn(auth_middleware))
            .layer(axum::Extension(auth_config))
    }

    async fn call(app: Router, auth: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri("/whoami");
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn legacy_token_is_moderator() {
        let (status, body) = call(test_app(Some("s3cret".into())), Some("Bearer s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "moderator:");
    }

    #[tokio::test]
    async fn scoped_party_token() {
        let (status, body) = call(test_app(Some("s3cret".into())), Some("Bearer party:alice:s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "party:alice");
    }

    #[tokio::test]
    async fn missing_header_rejected() {
        let (status, body) = call(test_app(Some("s3cret".into())), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let err: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(err["error"]["code"], "UNAUTHORIZED");
        assert!(err["error"]["message"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn wrong_secret_rejected() {
        let (status, _) = call(test_app(Some("s3cret".into())), Some("Bearer gateway::nope")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn non_bearer_scheme_rejected() {
        let (status, body) = call(test_app(Some("s3cret".into())), Some("Basic dXNlcjpwYXNz")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Bearer scheme"));
    }

    #[tokio::test]
    async fn auth_disabled_runs_as_moderator() {
        let (status, body) = call(test_app(None), Some("Bearer anything")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "moderator:");
    }

    #[test]
    fn parse_rejects_unknown_role_and_subjectless_party() {
        assert!(parse_bearer_token("admin::s", "s").unwrap_err().contains("unknown role"));
        assert!(parse_bearer_token("party::s", "s").unwrap_err().contains("subject"));
        assert!(parse_bearer_token("a:b", "s").is_err());
    }

    #[test]
    fn constant_time_eq() {
        assert!(constant_time_token_eq("secret-token", "secret-token"));
        assert!(!constant_time_token_eq("secret", "secret-token"));
        assert!(!constant_time_token_eq("", "secret-token"));
    }

    #[test]
    fn role_ordering() {
        assert!(Role::Party < Role::Gateway);
        assert!(Role::Gateway < Role::Moderator);
    }

    #[test]
    fn parties_act_only_as_themselves() {
        let alice = PartyId::new("alice").unwrap();
        let bob = PartyId::new("bob").unwrap();
        let caller = CallerIdentity {
            role: Role::Party,
            subject: Some(alice.clone()),
        };
        assert!(caller.can_act_as(&alice));
        assert!(!caller.can_act_as(&bob));
        assert!(require_acting_as(&caller, &bob).is_err());
        assert!(require_role(&caller, Role::Gateway).is_err());

        let gateway = CallerIdentity {
            role: Role::Gateway,
            subject: None,
        };
        assert!(gateway.can_act_as(&bob));
    }

    #[test]
    fn parties_view_only_their_sessions() {
        let alice = PartyId::new("alice").unwrap();
        let session = MiddlemanRequest::new_direct(alice.clone(), PartyId::new("bob").unwrap(), Utc::now()).unwrap();
        let as_alice = CallerIdentity {
            role: Role::Party,
            subject: Some(alice),
        };
        let as_carol = CallerIdentity {
            role: Role::Party,
            subject: Some(PartyId::new("carol").unwrap()),
        };
        assert!(as_alice.can_view(&session));
        assert!(!as_carol.can_view(&session));
        assert!(CallerIdentity::moderator().can_view(&session));
    }
}
