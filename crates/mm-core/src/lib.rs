//! # mm-core: Foundational Types for the Middleman Stack
//!
//! Leaf crate of the workspace. Defines the identifier newtypes and protocol
//! constants shared by the state machine, the chat client, and the API
//! service.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `RequestId`, `TradeId`,
//!    `PartyId`, `ThreadRef`, `MessageRef`: a party identifier cannot be
//!    passed where a thread reference is expected.
//!
//! 2. **Validated constructors.** String identifiers are trimmed, non-empty,
//!    and length-bounded at construction. Deserialization goes through the
//!    same validation.
//!
//! 3. **Protocol constants in one place.** The acceptance window and the
//!    teardown grace delay are defined here and overridden only through
//!    service configuration.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `mm-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod protocol;

pub use error::ValidationError;
pub use identity::{MessageRef, PartyId, RequestId, ThreadRef, TradeId};
pub use protocol::{
    acceptance_deadline, ACCEPTANCE_WINDOW_SECS, DEFAULT_ACCEPT_EMOJI, TEARDOWN_GRACE_SECS,
};
