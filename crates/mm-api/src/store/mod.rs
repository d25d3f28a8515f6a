//! # Session Store
//!
//! Persistence seam for [`MiddlemanRequest`] records. Every mutating
//! operation is a single atomic read-and-conditional-update; the store is
//! the only arbiter between concurrent acceptance, merge and timeout paths.
//!
//! Two backends:
//!
//! - [`InMemorySessionStore`]: one `parking_lot::RwLock` write guard per
//!   operation, never held across `.await`. Used when `DATABASE_URL` is
//!   unset and in tests.
//! - [`PgSessionStore`]: each transition is one conditional
//!   `UPDATE ... RETURNING` statement. A zero-row update is classified by
//!   re-reading the row and replaying the transition on the aggregate.

mod memory;
mod postgres;

pub use memory::InMemorySessionStore;
pub use postgres::PgSessionStore;

use async_trait::async_trait;
use mm_core::{PartyId, RequestId, ThreadRef, TradeId};
use mm_state::{MergeOutcome, MiddlemanRequest, RequestStatus, TransitionError};
use thiserror::Error;

/// Errors returned by session store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No session with this id.
    #[error("middleman request {0} not found")]
    NotFound(RequestId),

    /// The lifecycle rejected the change.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The backing database could not be reached or failed.
    #[error("session store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    /// A persisted row could not be decoded.
    #[error("corrupt session record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether this is the lost-race outcome of a resolution.
    pub fn is_already_resolved(&self) -> bool {
        matches!(self, Self::Transition(e) if e.is_already_resolved())
    }
}

/// CRUD and conditional transitions over middleman sessions.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Record a trade-side request: create the open session for the trade,
    /// join the counterparty's half-request, or return the session
    /// unchanged. Only the caller whose update performed the merge sees
    /// [`MergeOutcome::Merged`].
    async fn create_or_merge(
        &self,
        trade_id: &TradeId,
        requester: &PartyId,
        counterparty: Option<&PartyId>,
    ) -> Result<(MiddlemanRequest, MergeOutcome), StoreError>;

    /// Open a direct session pre-accepted by `requester`.
    async fn create_direct(&self, requester: &PartyId, counterparty: &PartyId) -> Result<MiddlemanRequest, StoreError>;

    /// `created -> awaiting_acceptance` for a direct session, by its invitee.
    async fn confirm_direct(&self, id: RequestId, party: &PartyId) -> Result<MiddlemanRequest, StoreError>;

    /// Set `party`'s acceptance flag while the session is awaiting
    /// acceptance. Returns the post-update record and whether the flag
    /// changed.
    async fn set_party_accepted(&self, id: RequestId, party: &PartyId) -> Result<(MiddlemanRequest, bool), StoreError>;

    /// Resolve an open session to `ready` or `declined`. Exactly one call
    /// succeeds per session.
    async fn mark_resolved(&self, id: RequestId, status: RequestStatus) -> Result<MiddlemanRequest, StoreError>;

    /// Record the coordination thread. One-shot.
    async fn attach_thread(&self, id: RequestId, thread: &ThreadRef) -> Result<MiddlemanRequest, StoreError>;

    /// `ready -> completed`, claimed by `middleman`.
    async fn mark_completed(&self, id: RequestId, middleman: &PartyId) -> Result<MiddlemanRequest, StoreError>;

    async fn get(&self, id: RequestId) -> Result<Option<MiddlemanRequest>, StoreError>;

    /// Most recent session for a trade, open or not.
    async fn latest_for_trade(&self, trade_id: &TradeId) -> Result<Option<MiddlemanRequest>, StoreError>;

    async fn find_by_thread(&self, thread: &ThreadRef) -> Result<Option<MiddlemanRequest>, StoreError>;

    /// Sessions whose acceptance window is still running.
    async fn list_awaiting(&self) -> Result<Vec<MiddlemanRequest>, StoreError>;

    /// Readiness check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Backend name for logs.
    fn backend(&self) -> &'static str;
}

/// A conditional update matched no row, yet the re-read record would
/// accept the transition: another writer got in between.
pub(crate) fn lost_update(id: RequestId) -> StoreError {
    StoreError::Transition(TransitionError::Conflict {
        reason: format!("request {id} changed concurrently; retry"),
    })
}
