//! # Validation Errors
//!
//! Errors raised when constructing identifier newtypes from untrusted input.

use thiserror::Error;

/// Identifier validation failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The identifier was empty after trimming whitespace.
    #[error("{kind} must not be empty")]
    Empty {
        /// Which identifier kind was rejected (e.g. "party_id").
        kind: &'static str,
    },

    /// The identifier exceeded the maximum length.
    #[error("{kind} must not exceed {max} characters (got {actual})")]
    TooLong {
        kind: &'static str,
        max: usize,
        actual: usize,
    },

    /// The identifier contained control characters.
    #[error("{kind} must not contain control characters")]
    ControlCharacter { kind: &'static str },

    /// A UUID identifier failed to parse.
    #[error("invalid {kind}: {reason}")]
    Malformed { kind: &'static str, reason: String },
}
