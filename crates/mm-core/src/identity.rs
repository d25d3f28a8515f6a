//! # Identifier Newtypes
//!
//! Newtype wrappers for every identifier the coordinator handles. The
//! marketplace and the chat platform both use opaque string ids, so without
//! distinct types a party id, a thread id and a trade id are all `String`
//! and trivially confused.
//!
//! String identifiers are validated on construction and on deserialization:
//! trimmed, non-empty, at most [`MAX_IDENTIFIER_LEN`] characters, and free
//! of control characters.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Maximum length of any string identifier.
pub const MAX_IDENTIFIER_LEN: usize = 128;

fn validate_identifier(kind: &'static str, raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty { kind });
    }
    let len = trimmed.chars().count();
    if len > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLong {
            kind,
            max: MAX_IDENTIFIER_LEN,
            actual: len,
        });
    }
    if trimmed.chars().any(char::is_control) {
        return Err(ValidationError::ControlCharacter { kind });
    }
    Ok(trimmed.to_string())
}

/// Unique identifier of a middleman request (session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a new random request identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID (e.g. a database row id).
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| ValidationError::Malformed {
                kind: "request_id",
                reason: e.to_string(),
            })
    }
}

macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a validated identifier.
            pub fn new(raw: impl AsRef<str>) -> Result<Self, ValidationError> {
                validate_identifier($kind, raw.as_ref()).map(Self)
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

string_identifier!(
    /// Marketplace trade identifier. One open middleman session may exist per trade.
    TradeId,
    "trade_id"
);

string_identifier!(
    /// A trading participant, identified by their chat-platform user id.
    PartyId,
    "party_id"
);

string_identifier!(
    /// Chat-platform identifier of a coordination thread.
    ThreadRef,
    "thread_ref"
);

string_identifier!(
    /// Chat-platform identifier of a single message.
    MessageRef,
    "message_ref"
);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn party_id_trims_whitespace() {
        let p = PartyId::new("  alice ").unwrap();
        assert_eq!(p.as_str(), "alice");
        assert_eq!(p, "alice");
    }

    #[test]
    fn empty_identifier_rejected() {
        assert_eq!(
            PartyId::new("   ").unwrap_err(),
            ValidationError::Empty { kind: "party_id" }
        );
    }

    #[test]
    fn overlong_identifier_rejected() {
        let raw = "x".repeat(MAX_IDENTIFIER_LEN + 1);
        match TradeId::new(&raw).unwrap_err() {
            ValidationError::TooLong { max, actual, .. } => {
                assert_eq!(max, MAX_IDENTIFIER_LEN);
                assert_eq!(actual, MAX_IDENTIFIER_LEN + 1);
            }
            other => panic!("expected TooLong, got {other:?}"),
        }
    }

    #[test]
    fn control_characters_rejected() {
        assert!(ThreadRef::new("thread\u{0}1").is_err());
    }

    #[test]
    fn deserialization_validates() {
        let ok: PartyId = serde_json::from_str("\"bob\"").unwrap();
        assert_eq!(ok.as_str(), "bob");
        assert!(serde_json::from_str::<PartyId>("\"\"").is_err());
    }

    #[test]
    fn request_id_parses_uuid() {
        let id = RequestId::new();
        let parsed: RequestId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<RequestId>().is_err());
    }

    proptest! {
        #[test]
        fn valid_identifiers_are_trimmed_and_preserved(s in "[a-zA-Z0-9_-]{1,64}") {
            let padded = format!("  {s}\t");
            let id = PartyId::new(&padded).unwrap();
            prop_assert_eq!(id.as_str(), s.as_str());
        }

        #[test]
        fn whitespace_only_is_always_rejected(s in "[ \t\n]{0,16}") {
            prop_assert!(PartyId::new(&s).is_err());
        }
    }
}
