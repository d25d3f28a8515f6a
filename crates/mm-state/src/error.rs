//! # Transition Errors
//!
//! Rejections produced by the request aggregate. [`TransitionError::AlreadyResolved`]
//! is the expected outcome of a lost race and is treated as control flow by
//! the coordinator, not as a failure.

use mm_core::{PartyId, RequestId, ThreadRef};
use thiserror::Error;

use crate::status::RequestStatus;

/// Errors raised by request lifecycle transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The request already left the open states.
    #[error("request {id} is already resolved ({status})")]
    AlreadyResolved { id: RequestId, status: RequestStatus },

    /// Acceptance is only recorded while awaiting acceptance.
    #[error("request {id} is not awaiting acceptance ({status})")]
    NotAwaiting { id: RequestId, status: RequestStatus },

    /// The acting party is neither side of the request.
    #[error("{party} is not a party to request {id}")]
    UnknownParty { id: RequestId, party: PartyId },

    /// `ready` requires both acceptance flags.
    #[error("request {id} cannot become ready before both parties accept")]
    IncompleteAcceptance { id: RequestId },

    /// The coordination thread reference is set once.
    #[error("request {id} already has thread {thread}")]
    ThreadAlreadyAttached { id: RequestId, thread: ThreadRef },

    /// The requested status change is not an edge of the lifecycle.
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    /// The request conflicts with an existing open session.
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    /// A party cannot request a middleman with themselves.
    #[error("{party} cannot open a middleman request with themselves")]
    SelfDealing { party: PartyId },
}

impl TransitionError {
    /// Whether this rejection is a lost race rather than a caller error.
    pub fn is_already_resolved(&self) -> bool {
        matches!(self, Self::AlreadyResolved { .. })
    }
}
