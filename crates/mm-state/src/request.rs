//! # Middleman Request Aggregate
//!
//! A [`MiddlemanRequest`] is one middleman session between two trading
//! parties. It is the unit of persistence and the owner of the lifecycle
//! rules: every mutation goes through a method here that either applies
//! the change or returns a [`TransitionError`].
//!
//! ## Invariants
//!
//! - `status == Ready` implies both acceptance flags are set.
//! - Once `resolved_at` is set, acceptance flags and the resolution never
//!   change again. `Ready -> Completed` is the only edge after resolution.
//! - `thread_ref` is assigned at most once.
//! - Mutations that change nothing report "unchanged" so stores can skip
//!   the write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mm_core::{acceptance_deadline, PartyId, RequestId, ThreadRef, TradeId};

use crate::error::TransitionError;
use crate::status::RequestStatus;

// ─── Supporting Types ────────────────────────────────────────────────

/// How a session was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOrigin {
    /// Both sides of a marketplace trade asked for a middleman.
    Trade,
    /// One party invited the other outside a trade.
    Direct,
}

impl RequestOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Direct => "direct",
        }
    }
}

impl std::fmt::Display for RequestOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trade" => Ok(Self::Trade),
            "direct" => Ok(Self::Direct),
            other => Err(format!("unknown request origin: {other:?}")),
        }
    }
}

/// Which side of the session a party is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartySide {
    A,
    B,
}

impl PartySide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
        }
    }
}

/// Result of recording a trade-side middleman request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// No open session existed; a new one was created.
    Created,
    /// The counterparty's open session was joined; acceptance is now pending.
    Merged,
    /// The requester was already part of the open session.
    Unchanged,
}

impl MergeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Merged => "merged",
            Self::Unchanged => "unchanged",
        }
    }
}

// ─── Aggregate ───────────────────────────────────────────────────────

/// A middleman session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiddlemanRequest {
    pub id: RequestId,
    /// Marketplace trade, absent for direct sessions.
    pub trade_id: Option<TradeId>,
    pub origin: RequestOrigin,
    /// The first requester (trade path) or the inviter (direct path).
    pub party_a: PartyId,
    /// Unknown until the counterparty requests or is named.
    pub party_b: Option<PartyId>,
    pub party_a_accepted: bool,
    pub party_b_accepted: bool,
    pub status: RequestStatus,
    pub thread_ref: Option<ThreadRef>,
    /// The human middleman who claimed the session.
    pub middleman_id: Option<PartyId>,
    pub created_at: DateTime<Utc>,
    /// When the session entered `awaiting_acceptance`.
    pub awaiting_since: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl MiddlemanRequest {
    /// A first trade-side request. The counterparty may already be known
    /// from the marketplace, but the session stays `created` until they
    /// request a middleman too.
    pub fn new_trade_request(
        trade_id: TradeId,
        requester: PartyId,
        counterparty: Option<PartyId>,
        now: DateTime<Utc>,
    ) -> Result<Self, TransitionError> {
        if counterparty.as_ref() == Some(&requester) {
            return Err(TransitionError::SelfDealing { party: requester });
        }
        Ok(Self {
            id: RequestId::new(),
            trade_id: Some(trade_id),
            origin: RequestOrigin::Trade,
            party_a: requester,
            party_b: counterparty,
            party_a_accepted: false,
            party_b_accepted: false,
            status: RequestStatus::Created,
            thread_ref: None,
            middleman_id: None,
            created_at: now,
            awaiting_since: None,
            resolved_at: None,
            updated_at: now,
        })
    }

    /// A direct invitation. Asking for the session counts as the inviter's
    /// acceptance.
    pub fn new_direct(
        requester: PartyId,
        counterparty: PartyId,
        now: DateTime<Utc>,
    ) -> Result<Self, TransitionError> {
        if counterparty == requester {
            return Err(TransitionError::SelfDealing { party: requester });
        }
        Ok(Self {
            id: RequestId::new(),
            trade_id: None,
            origin: RequestOrigin::Direct,
            party_a: requester,
            party_b: Some(counterparty),
            party_a_accepted: true,
            party_b_accepted: false,
            status: RequestStatus::Created,
            thread_ref: None,
            middleman_id: None,
            created_at: now,
            awaiting_since: None,
            resolved_at: None,
            updated_at: now,
        })
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Which side `party` is on, if either.
    pub fn side_of(&self, party: &PartyId) -> Option<PartySide> {
        if &self.party_a == party {
            Some(PartySide::A)
        } else if self.party_b.as_ref() == Some(party) {
            Some(PartySide::B)
        } else {
            None
        }
    }

    pub fn is_party(&self, party: &PartyId) -> bool {
        self.side_of(party).is_some()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    pub fn both_accepted(&self) -> bool {
        self.party_a_accepted && self.party_b_accepted
    }

    pub fn has_accepted(&self, side: PartySide) -> bool {
        match side {
            PartySide::A => self.party_a_accepted,
            PartySide::B => self.party_b_accepted,
        }
    }

    /// Expiry of the acceptance window. The window is measured from
    /// creation, not from the merge.
    pub fn deadline(&self, window: std::time::Duration) -> DateTime<Utc> {
        acceptance_deadline(self.created_at, window)
    }

    /// Both parties, in side order, once `party_b` is known.
    pub fn parties(&self) -> Vec<&PartyId> {
        std::iter::once(&self.party_a)
            .chain(self.party_b.as_ref())
            .collect()
    }

    fn already_resolved(&self) -> TransitionError {
        TransitionError::AlreadyResolved {
            id: self.id,
            status: self.status,
        }
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Record a trade-side request from `requester` against this open
    /// session.
    ///
    /// A request from the party who opened the session, or from either
    /// party once acceptance is pending, changes nothing. A request from the
    /// other side joins the session and starts the acceptance phase.
    pub fn merge_request(
        &mut self,
        requester: &PartyId,
        counterparty: Option<&PartyId>,
        now: DateTime<Utc>,
    ) -> Result<MergeOutcome, TransitionError> {
        if self.is_resolved() {
            return Err(self.already_resolved());
        }
        if self.is_party(requester) && self.status == RequestStatus::AwaitingAcceptance {
            return Ok(MergeOutcome::Unchanged);
        }
        if self.status != RequestStatus::Created {
            return Err(TransitionError::Conflict {
                reason: format!("trade session {} is {}", self.id, self.status),
            });
        }
        if requester == &self.party_a {
            return match (counterparty, self.party_b.as_ref()) {
                (Some(named), Some(known)) if named != known => Err(TransitionError::Conflict {
                    reason: format!("trade session {} already names counterparty {known}", self.id),
                }),
                _ => Ok(MergeOutcome::Unchanged),
            };
        }
        if let Some(known) = &self.party_b {
            if known != requester {
                return Err(TransitionError::Conflict {
                    reason: format!("{requester} is not a party to trade session {}", self.id),
                });
            }
        }
        if let Some(named) = counterparty {
            if named != &self.party_a {
                return Err(TransitionError::Conflict {
                    reason: format!(
                        "trade session {} was opened by {}, not {named}",
                        self.id, self.party_a
                    ),
                });
            }
        }

        self.party_b = Some(requester.clone());
        self.status = RequestStatus::AwaitingAcceptance;
        self.awaiting_since = Some(now);
        self.updated_at = now;
        Ok(MergeOutcome::Merged)
    }

    /// The invited party agreed to a direct session. This opens the
    /// acceptance phase; the invitee still has to accept explicitly.
    pub fn confirm_direct(&mut self, party: &PartyId, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.is_resolved() {
            return Err(self.already_resolved());
        }
        if self.origin != RequestOrigin::Direct {
            return Err(TransitionError::Conflict {
                reason: format!("session {} is not a direct invitation", self.id),
            });
        }
        if self.party_b.as_ref() != Some(party) {
            return Err(TransitionError::Conflict {
                reason: format!("{party} was not invited to session {}", self.id),
            });
        }
        if self.status != RequestStatus::Created {
            return Err(TransitionError::Conflict {
                reason: format!("session {} is already confirmed", self.id),
            });
        }
        self.status = RequestStatus::AwaitingAcceptance;
        self.awaiting_since = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Set the acceptance flag for `party`. Returns whether the flag
    /// changed; accepting twice is a no-op.
    pub fn accept(&mut self, party: &PartyId, now: DateTime<Utc>) -> Result<bool, TransitionError> {
        if self.is_resolved() {
            return Err(self.already_resolved());
        }
        if self.status != RequestStatus::AwaitingAcceptance {
            return Err(TransitionError::NotAwaiting {
                id: self.id,
                status: self.status,
            });
        }
        let side = self.side_of(party).ok_or_else(|| TransitionError::UnknownParty {
            id: self.id,
            party: party.clone(),
        })?;
        let flag = match side {
            PartySide::A => &mut self.party_a_accepted,
            PartySide::B => &mut self.party_b_accepted,
        };
        if *flag {
            return Ok(false);
        }
        *flag = true;
        self.updated_at = now;
        Ok(true)
    }

    /// Resolve an open session to `Ready` or `Declined`. Exactly one
    /// resolution ever succeeds; every later attempt sees `AlreadyResolved`.
    pub fn resolve(&mut self, to: RequestStatus, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.is_resolved() {
            return Err(self.already_resolved());
        }
        if !matches!(to, RequestStatus::Ready | RequestStatus::Declined) || !self.status.can_transition_to(to) {
            return Err(TransitionError::InvalidTransition { from: self.status, to });
        }
        if to == RequestStatus::Ready && !self.both_accepted() {
            return Err(TransitionError::IncompleteAcceptance { id: self.id });
        }
        self.status = to;
        self.resolved_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Record the coordination thread. Set once.
    pub fn attach_thread(&mut self, thread: ThreadRef, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if let Some(existing) = &self.thread_ref {
            return Err(TransitionError::ThreadAlreadyAttached {
                id: self.id,
                thread: existing.clone(),
            });
        }
        self.thread_ref = Some(thread);
        self.updated_at = now;
        Ok(())
    }

    /// A middleman claimed a ready session.
    pub fn complete(&mut self, middleman: PartyId, now: DateTime<Utc>) -> Result<(), TransitionError> {
        match self.status {
            RequestStatus::Ready => {
                self.status = RequestStatus::Completed;
                self.middleman_id = Some(middleman);
                self.updated_at = now;
                Ok(())
            }
            RequestStatus::Completed => Err(self.already_resolved()),
            from => Err(TransitionError::InvalidTransition {
                from,
                to: RequestStatus::Completed,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn party(s: &str) -> PartyId {
        PartyId::new(s).unwrap()
    }

    fn trade_session() -> MiddlemanRequest {
        MiddlemanRequest::new_trade_request(TradeId::new("T-1").unwrap(), party("alice"), None, Utc::now())
            .unwrap()
    }

    fn awaiting_session() -> MiddlemanRequest {
        let mut req = trade_session();
        assert_eq!(
            req.merge_request(&party("bob"), None, Utc::now()).unwrap(),
            MergeOutcome::Merged
        );
        req
    }

    #[test]
    fn new_trade_request_starts_created_without_acceptance() {
        let req = trade_session();
        assert_eq!(req.status, RequestStatus::Created);
        assert_eq!(req.origin, RequestOrigin::Trade);
        assert!(!req.party_a_accepted && !req.party_b_accepted);
        assert!(req.party_b.is_none());
        assert!(req.resolved_at.is_none());
    }

    #[test]
    fn self_dealing_rejected() {
        let err = MiddlemanRequest::new_direct(party("alice"), party("alice"), Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::SelfDealing { .. }));
        let err = MiddlemanRequest::new_trade_request(
            TradeId::new("T-1").unwrap(),
            party("alice"),
            Some(party("alice")),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::SelfDealing { .. }));
    }

    #[test]
    fn counterparty_request_merges_into_awaiting() {
        let req = awaiting_session();
        assert_eq!(req.status, RequestStatus::AwaitingAcceptance);
        assert_eq!(req.party_b.as_ref().unwrap(), &party("bob"));
        assert!(req.awaiting_since.is_some());
        assert!(!req.party_a_accepted && !req.party_b_accepted);
    }

    #[test]
    fn repeat_request_from_opener_is_unchanged() {
        let mut req = trade_session();
        let before = req.clone();
        assert_eq!(
            req.merge_request(&party("alice"), None, Utc::now()).unwrap(),
            MergeOutcome::Unchanged
        );
        assert_eq!(req, before);
    }

    #[test]
    fn repeat_request_after_merge_is_unchanged() {
        let mut req = awaiting_session();
        let before = req.clone();
        assert_eq!(
            req.merge_request(&party("bob"), Some(&party("alice")), Utc::now()).unwrap(),
            MergeOutcome::Unchanged
        );
        assert_eq!(req, before);
    }

    #[test]
    fn outsider_cannot_join_named_session() {
        let mut req = MiddlemanRequest::new_trade_request(
            TradeId::new("T-1").unwrap(),
            party("alice"),
            Some(party("bob")),
            Utc::now(),
        )
        .unwrap();
        let err = req.merge_request(&party("mallory"), None, Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::Conflict { .. }));
        assert_eq!(req.status, RequestStatus::Created);
    }

    #[test]
    fn merge_with_mismatched_counterparty_rejected() {
        let mut req = trade_session();
        let err = req
            .merge_request(&party("bob"), Some(&party("carol")), Utc::now())
            .unwrap_err();
        assert!(matches!(err, TransitionError::Conflict { .. }));
    }

    #[test]
    fn accept_is_idempotent() {
        let mut req = awaiting_session();
        assert!(req.accept(&party("alice"), Utc::now()).unwrap());
        assert!(!req.accept(&party("alice"), Utc::now()).unwrap());
        assert!(req.party_a_accepted);
        assert!(!req.party_b_accepted);
    }

    #[test]
    fn accept_before_merge_is_not_awaiting() {
        let mut req = trade_session();
        let err = req.accept(&party("alice"), Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::NotAwaiting { .. }));
    }

    #[test]
    fn accept_by_outsider_rejected() {
        let mut req = awaiting_session();
        let err = req.accept(&party("mallory"), Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::UnknownParty { .. }));
    }

    #[test]
    fn ready_requires_both_flags() {
        let mut req = awaiting_session();
        req.accept(&party("alice"), Utc::now()).unwrap();
        let err = req.resolve(RequestStatus::Ready, Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::IncompleteAcceptance { .. }));
        assert!(req.resolved_at.is_none());

        req.accept(&party("bob"), Utc::now()).unwrap();
        req.resolve(RequestStatus::Ready, Utc::now()).unwrap();
        assert_eq!(req.status, RequestStatus::Ready);
        assert!(req.resolved_at.is_some());
    }

    #[test]
    fn resolution_happens_once() {
        let mut req = awaiting_session();
        req.resolve(RequestStatus::Declined, Utc::now()).unwrap();
        let resolved_at = req.resolved_at;

        let err = req.resolve(RequestStatus::Declined, Utc::now()).unwrap_err();
        assert!(err.is_already_resolved());
        let err = req.accept(&party("alice"), Utc::now()).unwrap_err();
        assert!(err.is_already_resolved());
        assert_eq!(req.resolved_at, resolved_at);
        assert!(!req.party_a_accepted);
    }

    #[test]
    fn resolve_rejects_non_resolution_targets() {
        let mut req = awaiting_session();
        let err = req.resolve(RequestStatus::Completed, Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn created_session_may_be_declined() {
        let mut req = trade_session();
        req.resolve(RequestStatus::Declined, Utc::now()).unwrap();
        assert_eq!(req.status, RequestStatus::Declined);
    }

    #[test]
    fn thread_is_attached_once() {
        let mut req = awaiting_session();
        req.attach_thread(ThreadRef::new("th-1").unwrap(), Utc::now()).unwrap();
        let err = req
            .attach_thread(ThreadRef::new("th-2").unwrap(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, TransitionError::ThreadAlreadyAttached { .. }));
        assert_eq!(req.thread_ref.unwrap(), "th-1");
    }

    #[test]
    fn direct_session_is_pre_accepted_and_confirmed_by_invitee() {
        let mut req = MiddlemanRequest::new_direct(party("alice"), party("bob"), Utc::now()).unwrap();
        assert!(req.party_a_accepted);
        assert_eq!(req.status, RequestStatus::Created);

        let err = req.confirm_direct(&party("mallory"), Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::Conflict { .. }));

        req.confirm_direct(&party("bob"), Utc::now()).unwrap();
        assert_eq!(req.status, RequestStatus::AwaitingAcceptance);
        assert!(!req.both_accepted());
        let err = req.confirm_direct(&party("bob"), Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::Conflict { .. }));

        assert!(req.accept(&party("bob"), Utc::now()).unwrap());
        req.resolve(RequestStatus::Ready, Utc::now()).unwrap();
    }

    #[test]
    fn complete_only_from_ready() {
        let mut req = awaiting_session();
        let err = req.complete(party("mod"), Utc::now()).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));

        req.accept(&party("alice"), Utc::now()).unwrap();
        req.accept(&party("bob"), Utc::now()).unwrap();
        req.resolve(RequestStatus::Ready, Utc::now()).unwrap();
        req.complete(party("mod"), Utc::now()).unwrap();
        assert_eq!(req.status, RequestStatus::Completed);
        assert_eq!(req.middleman_id.as_ref().unwrap(), &party("mod"));

        let err = req.complete(party("mod"), Utc::now()).unwrap_err();
        assert!(err.is_already_resolved());
    }

    #[test]
    fn deadline_measured_from_creation() {
        let req = trade_session();
        let deadline = req.deadline(std::time::Duration::from_secs(300));
        assert_eq!((deadline - req.created_at).num_seconds(), 300);
    }

    #[test]
    fn serializes_with_snake_case_enums() {
        let req = awaiting_session();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["status"], "awaiting_acceptance");
        assert_eq!(json["origin"], "trade");
        assert_eq!(json["party_a"], "alice");
    }
}
