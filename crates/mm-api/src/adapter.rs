//! # Chat Event Adapter
//!
//! Turns reactions relayed from the chat platform into acceptance calls.
//! Most reactions in a coordination thread are noise: the wrong emoji, a
//! bot, a bystander, or a late click on a session that already resolved.
//! Those are discarded here without reaching the coordinator.
//!
//! The adapter keeps no state, so the gateway may redeliver an event any
//! number of times.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use mm_core::{PartyId, RequestId, ThreadRef};

use crate::coordinator::{AcceptOutcome, AcceptanceCoordinator, CoordinatorError};

/// Variation selector some clients append to emoji.
const VARIATION_SELECTOR_16: char = '\u{FE0F}';

/// A reaction added to a message in a coordination thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ReactionEvent {
    #[schema(value_type = String)]
    pub thread_id: ThreadRef,
    #[schema(value_type = String)]
    pub user_id: PartyId,
    pub emoji: String,
    /// Set by the gateway for bot and system accounts.
    #[serde(default)]
    pub is_bot: bool,
}

/// What the adapter did with a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReactionDisposition {
    /// First acceptance of this party; waiting on the other.
    Accepted,
    /// This acceptance made the session ready.
    Ready,
    /// The party had already accepted.
    Duplicate,
    IgnoredEmoji,
    IgnoredBot,
    /// The thread is not a coordination thread.
    UnknownThread,
    AlreadyResolved,
    /// The reacting user is not one of the two parties.
    NotAParty,
}

impl ReactionDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Ready => "ready",
            Self::Duplicate => "duplicate",
            Self::IgnoredEmoji => "ignored_emoji",
            Self::IgnoredBot => "ignored_bot",
            Self::UnknownThread => "unknown_thread",
            Self::AlreadyResolved => "already_resolved",
            Self::NotAParty => "not_a_party",
        }
    }

    /// Whether the coordinator was called.
    pub fn reached_coordinator(&self) -> bool {
        matches!(self, Self::Accepted | Self::Ready | Self::Duplicate)
    }
}

/// Filters relayed reactions and forwards acceptances.
#[derive(Debug, Clone)]
pub struct ChatEventAdapter {
    coordinator: AcceptanceCoordinator,
    accept_emoji: String,
    bot_ids: HashSet<PartyId>,
}

fn strip_variation(emoji: &str) -> String {
    emoji.trim().chars().filter(|c| *c != VARIATION_SELECTOR_16).collect()
}

impl ChatEventAdapter {
    pub fn new(coordinator: AcceptanceCoordinator, accept_emoji: &str, bot_ids: impl IntoIterator<Item = PartyId>) -> Self {
        Self {
            coordinator,
            accept_emoji: strip_variation(accept_emoji),
            bot_ids: bot_ids.into_iter().collect(),
        }
    }

    fn is_accept_emoji(&self, emoji: &str) -> bool {
        strip_variation(emoji) == self.accept_emoji
    }

    /// Handle one reaction. Returns the disposition and, when a session was
    /// identified, its id.
    pub async fn on_reaction(
        &self,
        event: &ReactionEvent,
    ) -> Result<(ReactionDisposition, Option<RequestId>), CoordinatorError> {
        let result = self.classify(event).await;
        if let Ok((disposition, request_id)) = &result {
            self.coordinator.metrics().record_reaction(disposition.as_str());
            tracing::debug!(
                thread = %event.thread_id,
                user = %event.user_id,
                request_id = ?request_id,
                disposition = disposition.as_str(),
                "reaction handled"
            );
        }
        result
    }

    async fn classify(
        &self,
        event: &ReactionEvent,
    ) -> Result<(ReactionDisposition, Option<RequestId>), CoordinatorError> {
        if !self.is_accept_emoji(&event.emoji) {
            return Ok((ReactionDisposition::IgnoredEmoji, None));
        }
        if event.is_bot || self.bot_ids.contains(&event.user_id) {
            return Ok((ReactionDisposition::IgnoredBot, None));
        }

        let Some(session) = self.coordinator.session_for_thread(&event.thread_id).await? else {
            return Ok((ReactionDisposition::UnknownThread, None));
        };
        let id = Some(session.id);
        if session.is_resolved() {
            return Ok((ReactionDisposition::AlreadyResolved, id));
        }
        if !session.is_party(&event.user_id) {
            return Ok((ReactionDisposition::NotAParty, id));
        }

        let disposition = match self.coordinator.on_party_accepted(session.id, &event.user_id).await? {
            AcceptOutcome::Pending { changed: true, .. } => ReactionDisposition::Accepted,
            AcceptOutcome::Pending { changed: false, .. } => ReactionDisposition::Duplicate,
            AcceptOutcome::Ready(_) => ReactionDisposition::Ready,
            AcceptOutcome::AlreadyResolved { .. } => ReactionDisposition::AlreadyResolved,
        };
        Ok((disposition, id))
    }
}
