//! # API Route Modules
//!
//! - `middleman`: session lifecycle: trade-side and direct requests,
//!   confirmation, acceptance, decline, completion, and session lookups.
//! - `reactions`: relay endpoint for chat platform reactions (gateway only).

pub mod middleman;
pub mod reactions;
