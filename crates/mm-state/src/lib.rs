//! # mm-state: Middleman Request Lifecycle
//!
//! The state machine of a middleman session, independent of storage.
//!
//! ## Lifecycle
//!
//! ```text
//!                 merge / confirm             both accepted
//!   CREATED ────────────────────▶ AWAITING_ACCEPTANCE ──────────▶ READY ──claim──▶ COMPLETED
//!      │                                │
//!      │ decline                        │ timeout / decline
//!      ▼                                ▼
//!   DECLINED ◀───────────────────────────┘
//! ```
//!
//! ## Design
//!
//! Status is a runtime enum with validated transitions (the same choice the
//! entity lifecycle makes): records are loaded from a database and their
//! status is not known at compile time. The aggregate's mutating methods
//! ([`MiddlemanRequest::accept`], [`MiddlemanRequest::resolve`], ...) are the
//! single definition of the transition rules. The in-memory store applies
//! them under a write lock; the Postgres store encodes the same predicates
//! in its conditional `UPDATE` statements.

pub mod error;
pub mod request;
pub mod status;

pub use error::TransitionError;
pub use request::{MergeOutcome, MiddlemanRequest, PartySide, RequestOrigin};
pub use status::RequestStatus;
