//! # Request Status
//!
//! The five lifecycle states and the edges between them.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a middleman request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Only one side has asked for a middleman so far.
    Created,
    /// Both parties are known; the acceptance window is running.
    AwaitingAcceptance,
    /// Both parties accepted; waiting for a human middleman.
    Ready,
    /// Declined explicitly or by timeout. Terminal.
    Declined,
    /// A middleman claimed the session. Terminal.
    Completed,
}

impl RequestStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [RequestStatus; 5] = [
        Self::Created,
        Self::AwaitingAcceptance,
        Self::Ready,
        Self::Declined,
        Self::Completed,
    ];

    /// The canonical string stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingAcceptance => "awaiting_acceptance",
            Self::Ready => "ready",
            Self::Declined => "declined",
            Self::Completed => "completed",
        }
    }

    /// Whether acceptance flags may still change (`resolved_at IS NULL`).
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Created | Self::AwaitingAcceptance)
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Declined | Self::Completed)
    }

    /// Statuses reachable in one step.
    pub fn valid_transitions(&self) -> &'static [RequestStatus] {
        match self {
            Self::Created => &[Self::AwaitingAcceptance, Self::Declined],
            Self::AwaitingAcceptance => &[Self::Ready, Self::Declined],
            Self::Ready => &[Self::Completed],
            Self::Declined | Self::Completed => &[],
        }
    }

    /// Whether `to` is reachable in one step.
    pub fn can_transition_to(&self, to: RequestStatus) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown request status: {s:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip_for_every_status() {
        for status in RequestStatus::ALL {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert!("operational".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&RequestStatus::AwaitingAcceptance).unwrap();
        assert_eq!(json, "\"awaiting_acceptance\"");
    }

    #[test]
    fn terminal_states_have_no_exits() {
        assert!(RequestStatus::Declined.valid_transitions().is_empty());
        assert!(RequestStatus::Completed.valid_transitions().is_empty());
        assert!(RequestStatus::Declined.is_terminal());
        assert!(!RequestStatus::Ready.is_terminal());
    }

    #[test]
    fn ready_is_only_reachable_from_awaiting() {
        for from in RequestStatus::ALL {
            let expected = from == RequestStatus::AwaitingAcceptance;
            assert_eq!(from.can_transition_to(RequestStatus::Ready), expected, "{from}");
        }
    }

    #[test]
    fn open_states() {
        assert!(RequestStatus::Created.is_open());
        assert!(RequestStatus::AwaitingAcceptance.is_open());
        assert!(!RequestStatus::Ready.is_open());
    }
}
