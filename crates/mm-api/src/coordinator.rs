//! # Acceptance Coordinator
//!
//! Drives a middleman session from the first request to resolution.
//!
//! Every inbound trigger (web request, relayed reaction, timer) is a method
//! call here. Every state change is one conditional store operation; the
//! coordinator never decides a race itself. When acceptance and timeout
//! collide, exactly one `mark_resolved` succeeds and the loser sees
//! `AlreadyResolved`, which is a silent no-op.
//!
//! Side effects follow the store: timers are armed from the transition that
//! opened the acceptance window, chat notifications are sent after the
//! mutation commits, and a failed notification never undoes a mutation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use mm_core::{
    PartyId, RequestId, ThreadRef, TradeId, ACCEPTANCE_WINDOW_SECS, DEFAULT_ACCEPT_EMOJI, TEARDOWN_GRACE_SECS,
};
use mm_state::{MergeOutcome, MiddlemanRequest, RequestStatus, TransitionError};

use crate::middleware::metrics::ApiMetrics;
use crate::notify::{NotificationSink, SinkSettings};
use crate::store::{SessionStore, StoreError};
use crate::timers::TimerRegistry;

/// Delay before retrying a timeout that hit an unavailable store.
const TIMEOUT_RETRY_DELAY_SECS: i64 = 30;

// ── Configuration ───────────────────────────────────────────────────────────

/// Protocol settings read from the environment.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub acceptance_window: Duration,
    pub teardown_grace: Duration,
    pub accept_emoji: String,
    /// Role pinged when a session becomes ready.
    pub middleman_role: Option<String>,
    /// Accounts whose reactions are ignored.
    pub bot_user_ids: Vec<PartyId>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            acceptance_window: Duration::from_secs(ACCEPTANCE_WINDOW_SECS),
            teardown_grace: Duration::from_secs(TEARDOWN_GRACE_SECS),
            accept_emoji: DEFAULT_ACCEPT_EMOJI.to_string(),
            middleman_role: None,
            bot_user_ids: Vec::new(),
        }
    }
}

fn env_secs(name: &str, default: u64) -> Duration {
    let secs = match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, default, "ignoring non-numeric duration");
            default
        }),
        Err(_) => default,
    };
    Duration::from_secs(secs)
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl CoordinatorConfig {
    /// Read `MM_ACCEPTANCE_WINDOW_SECS`, `MM_TEARDOWN_GRACE_SECS`,
    /// `MM_ACCEPT_EMOJI`, `MM_MIDDLEMAN_ROLE` and `MM_BOT_USER_IDS`
    /// (comma-separated). Unset or invalid values fall back to defaults.
    pub fn from_env() -> Self {
        let bot_user_ids = env_nonempty("MM_BOT_USER_IDS")
            .map(|raw| {
                raw.split(',')
                    .filter_map(|id| match PartyId::new(id) {
                        Ok(id) => Some(id),
                        Err(e) => {
                            tracing::warn!(value = id, error = %e, "ignoring invalid bot user id");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            acceptance_window: env_secs("MM_ACCEPTANCE_WINDOW_SECS", ACCEPTANCE_WINDOW_SECS),
            teardown_grace: env_secs("MM_TEARDOWN_GRACE_SECS", TEARDOWN_GRACE_SECS),
            accept_emoji: env_nonempty("MM_ACCEPT_EMOJI").unwrap_or_else(|| DEFAULT_ACCEPT_EMOJI.to_string()),
            middleman_role: env_nonempty("MM_MIDDLEMAN_ROLE"),
            bot_user_ids,
        }
    }

    pub fn sink_settings(&self) -> SinkSettings {
        SinkSettings {
            middleman_role: self.middleman_role.clone(),
            accept_emoji: self.accept_emoji.clone(),
            acceptance_window: self.acceptance_window,
            teardown_grace: self.teardown_grace,
        }
    }
}

// ── Errors and outcomes ─────────────────────────────────────────────────────

/// Errors surfaced by coordinator operations.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No session was ever opened for this trade.
    #[error("no middleman request for trade {0}")]
    TradeNotFound(TradeId),
}

impl CoordinatorError {
    pub fn is_already_resolved(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_already_resolved())
    }
}

/// Result of recording one party's acceptance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Waiting on the other party. `changed` is false for a repeat.
    Pending { session: MiddlemanRequest, changed: bool },
    /// This acceptance completed the pair.
    Ready(MiddlemanRequest),
    /// The session had already resolved; nothing was done.
    AlreadyResolved { id: RequestId, status: RequestStatus },
}

impl AcceptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending { changed: true, .. } => "accepted",
            Self::Pending { changed: false, .. } => "duplicate",
            Self::Ready(_) => "ready",
            Self::AlreadyResolved { .. } => "already_resolved",
        }
    }
}

fn resolved_status(err: &StoreError) -> Option<(RequestId, RequestStatus)> {
    match err {
        StoreError::Transition(TransitionError::AlreadyResolved { id, status }) => Some((*id, *status)),
        _ => None,
    }
}

// ── Coordinator ─────────────────────────────────────────────────────────────

/// The mutual-acceptance coordinator. Cheap to clone.
#[derive(Clone)]
pub struct AcceptanceCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn SessionStore>,
    timers: TimerRegistry,
    sink: NotificationSink,
    metrics: ApiMetrics,
    acceptance_window: Duration,
}

impl std::fmt::Debug for AcceptanceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptanceCoordinator")
            .field("store", &self.inner.store.backend())
            .field("timers", &self.inner.timers)
            .field("acceptance_window", &self.inner.acceptance_window)
            .finish()
    }
}

impl AcceptanceCoordinator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        sink: NotificationSink,
        acceptance_window: Duration,
        metrics: ApiMetrics,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                timers: TimerRegistry::new(),
                sink,
                metrics,
                acceptance_window,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.inner.timers
    }

    pub fn sink(&self) -> &NotificationSink {
        &self.inner.sink
    }

    pub fn metrics(&self) -> &ApiMetrics {
        &self.inner.metrics
    }

    pub fn acceptance_window(&self) -> Duration {
        self.inner.acceptance_window
    }

    // -- Inbound triggers --

    /// A party asked for a middleman on a trade. The second distinct party
    /// merges the pair, which arms the acceptance timer and opens the
    /// coordination thread. Only the merging call does either.
    pub async fn on_requested(
        &self,
        trade_id: &TradeId,
        requester: &PartyId,
        counterparty: Option<&PartyId>,
    ) -> Result<(MiddlemanRequest, MergeOutcome), CoordinatorError> {
        let (session, outcome) = self
            .inner
            .store
            .create_or_merge(trade_id, requester, counterparty)
            .await?;

        tracing::info!(
            request_id = %session.id,
            %trade_id,
            party = %requester,
            outcome = outcome.as_str(),
            "middleman requested"
        );

        let session = match outcome {
            MergeOutcome::Created => {
                self.inner.metrics.record_transition(RequestStatus::Created);
                session
            }
            MergeOutcome::Merged => {
                self.inner.metrics.record_transition(RequestStatus::AwaitingAcceptance);
                self.arm_timeout(&session);
                self.open_thread(session).await
            }
            MergeOutcome::Unchanged => session,
        };
        Ok((session, outcome))
    }

    /// Direct path: `requester` invites `counterparty`. The requester's
    /// acceptance is implied; no thread until the invitee confirms.
    pub async fn on_direct_requested(
        &self,
        requester: &PartyId,
        counterparty: &PartyId,
    ) -> Result<MiddlemanRequest, CoordinatorError> {
        let session = self.inner.store.create_direct(requester, counterparty).await?;
        self.inner.metrics.record_transition(RequestStatus::Created);
        tracing::info!(request_id = %session.id, party = %requester, counterparty = %counterparty, "direct middleman request opened");
        Ok(session)
    }

    /// The invitee of a direct request confirmed. Opens the acceptance
    /// window and the coordination thread. The invitee still has to accept.
    pub async fn on_direct_confirmed(&self, id: RequestId, party: &PartyId) -> Result<MiddlemanRequest, CoordinatorError> {
        let session = self.inner.store.confirm_direct(id, party).await?;
        self.inner.metrics.record_transition(RequestStatus::AwaitingAcceptance);
        tracing::info!(request_id = %id, %party, "direct middleman request confirmed");
        self.arm_timeout(&session);
        Ok(self.open_thread(session).await)
    }

    /// Record one party's acceptance, from the web or a relayed reaction.
    pub async fn on_party_accepted(&self, id: RequestId, party: &PartyId) -> Result<AcceptOutcome, CoordinatorError> {
        let (session, changed) = match self.inner.store.set_party_accepted(id, party).await {
            Ok(result) => result,
            Err(e) => {
                return match resolved_status(&e) {
                    Some((id, status)) => {
                        tracing::debug!(request_id = %id, %party, %status, "acceptance after resolution ignored");
                        Ok(AcceptOutcome::AlreadyResolved { id, status })
                    }
                    None => Err(e.into()),
                };
            }
        };

        if !session.both_accepted() {
            if changed {
                tracing::info!(request_id = %id, %party, "party accepted");
                self.inner.sink.announce_party_accepted(&session, party).await;
            }
            return Ok(AcceptOutcome::Pending { session, changed });
        }

        match self.inner.store.mark_resolved(id, RequestStatus::Ready).await {
            Ok(ready) => {
                self.inner.timers.cancel(id);
                self.inner.metrics.record_transition(RequestStatus::Ready);
                tracing::info!(request_id = %id, "both parties accepted, session ready");
                self.inner.sink.announce_ready(&ready).await;
                Ok(AcceptOutcome::Ready(ready))
            }
            Err(e) => match resolved_status(&e) {
                Some((id, status)) => {
                    self.inner.metrics.record_race_lost("accept");
                    tracing::debug!(request_id = %id, %status, "ready resolution lost the race");
                    Ok(AcceptOutcome::AlreadyResolved { id, status })
                }
                None => Err(e.into()),
            },
        }
    }

    /// The acceptance window closed. Returns whether this call declined the
    /// session; `false` means it had already resolved.
    pub async fn on_timeout(&self, id: RequestId) -> Result<bool, CoordinatorError> {
        match self.inner.store.mark_resolved(id, RequestStatus::Declined).await {
            Ok(declined) => {
                self.inner.metrics.record_transition(RequestStatus::Declined);
                tracing::info!(request_id = %id, "acceptance window expired, session declined");
                self.inner.sink.spawn_teardown(declined);
                Ok(true)
            }
            Err(e) if e.is_already_resolved() => {
                self.inner.metrics.record_race_lost("timeout");
                tracing::debug!(request_id = %id, "timeout after resolution ignored");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Explicit decline. Cancels the timer and tears the thread down. A
    /// session that already resolved is a conflict for the caller.
    pub async fn decline(&self, id: RequestId) -> Result<MiddlemanRequest, CoordinatorError> {
        let declined = match self.inner.store.mark_resolved(id, RequestStatus::Declined).await {
            Ok(declined) => declined,
            Err(e) => {
                if e.is_already_resolved() {
                    self.inner.metrics.record_race_lost("decline");
                }
                return Err(e.into());
            }
        };
        self.inner.timers.cancel(id);
        self.inner.metrics.record_transition(RequestStatus::Declined);
        tracing::info!(request_id = %id, "session declined");
        self.inner.sink.spawn_teardown(declined.clone());
        Ok(declined)
    }

    /// A middleman claimed a ready session.
    pub async fn complete(&self, id: RequestId, middleman: &PartyId) -> Result<MiddlemanRequest, CoordinatorError> {
        let completed = self.inner.store.mark_completed(id, middleman).await?;
        self.inner.metrics.record_transition(RequestStatus::Completed);
        tracing::info!(request_id = %id, %middleman, "session completed");
        self.inner.sink.announce_completed(&completed).await;
        Ok(completed)
    }

    /// Re-arm timers for every session still awaiting acceptance. Called
    /// once at startup. Returns the number of timers armed.
    pub async fn rehydrate(&self) -> Result<usize, CoordinatorError> {
        let pending = self.inner.store.list_awaiting().await?;
        let this = self.clone();
        let armed = self
            .inner
            .timers
            .rehydrate(&pending, self.inner.acceptance_window, move |id| this.fire_timeout(id));
        tracing::info!(armed, backend = self.inner.store.backend(), "acceptance timers rehydrated");
        Ok(armed)
    }

    // -- Reads --

    pub async fn session(&self, id: RequestId) -> Result<MiddlemanRequest, CoordinatorError> {
        self.inner
            .store
            .get(id)
            .await?
            .ok_or(CoordinatorError::Store(StoreError::NotFound(id)))
    }

    /// Most recent session for a trade.
    pub async fn session_for_trade(&self, trade_id: &TradeId) -> Result<MiddlemanRequest, CoordinatorError> {
        self.inner
            .store
            .latest_for_trade(trade_id)
            .await?
            .ok_or_else(|| CoordinatorError::TradeNotFound(trade_id.clone()))
    }

    pub async fn session_for_thread(&self, thread: &ThreadRef) -> Result<Option<MiddlemanRequest>, CoordinatorError> {
        Ok(self.inner.store.find_by_thread(thread).await?)
    }

    // -- Internals --

    fn arm_timeout(&self, session: &MiddlemanRequest) {
        self.schedule_timeout(session.id, session.deadline(self.inner.acceptance_window));
    }

    fn schedule_timeout(&self, id: RequestId, fire_at: DateTime<Utc>) {
        let this = self.clone();
        self.inner.timers.arm(id, fire_at, move || this.fire_timeout(id));
    }

    /// Timer action. Boxed because a failed attempt schedules itself again.
    fn fire_timeout(&self, id: RequestId) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        let this = self.clone();
        Box::pin(async move {
            match this.on_timeout(id).await {
                Ok(_) => {}
                Err(CoordinatorError::Store(StoreError::Unavailable(e))) => {
                    tracing::error!(request_id = %id, error = %e, "store unavailable at timeout, retrying later");
                    this.schedule_timeout(id, Utc::now() + chrono::Duration::seconds(TIMEOUT_RETRY_DELAY_SECS));
                }
                Err(e) => tracing::warn!(request_id = %id, error = %e, "timeout could not be applied"),
            }
        })
    }

    /// Create the thread and record it. Returns the freshest record.
    ///
    /// The session may resolve while the thread is being created. Whoever
    /// resolved it saw no thread and skipped its announcement, so the
    /// resolution is announced here once the thread is attached.
    async fn open_thread(&self, session: MiddlemanRequest) -> MiddlemanRequest {
        let Some(thread) = self.inner.sink.create_thread(&session).await else {
            return session;
        };
        match self.inner.store.attach_thread(session.id, &thread).await {
            Ok(updated) => {
                match updated.status {
                    RequestStatus::Declined => {
                        self.inner.sink.spawn_teardown(updated.clone());
                    }
                    RequestStatus::Ready => {
                        tracing::info!(request_id = %updated.id, "session became ready before its thread was attached");
                        self.inner.sink.announce_ready(&updated).await;
                    }
                    RequestStatus::Completed => {
                        self.inner.sink.announce_completed(&updated).await;
                    }
                    RequestStatus::Created | RequestStatus::AwaitingAcceptance => {}
                }
                updated
            }
            Err(e) => {
                tracing::warn!(request_id = %session.id, %thread, error = %e, "could not record coordination thread");
                session
            }
        }
    }
}
