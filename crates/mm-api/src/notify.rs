//! # Notification Sink
//!
//! Every outbound effect of the coordinator goes through [`NotificationSink`]
//! as a typed call. The sink renders the message and hands it to a
//! [`ChatPlatform`] backend:
//!
//! - [`mm_chat::ChatClient`]: the chat gateway over HTTP. Transient failures
//!   get one retry inside the client.
//! - [`LogOnlyPlatform`]: logs each command and invents thread refs. Used
//!   when `CHAT_API_TOKEN` is unset.
//!
//! Failures never propagate. A command that still fails after the client's
//! retry is logged with `warn!`, counted in `mm_outbound_failures_total`,
//! and abandoned. Store state is never rolled back for a chat failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use mm_chat::{ChatApiError, ChatClient, CreateThreadRequest, PostMessageRequest};
use mm_core::{PartyId, ThreadRef};
use mm_state::MiddlemanRequest;

use crate::middleware::metrics::ApiMetrics;

// ── Platform seam ───────────────────────────────────────────────────────────

/// Outbound chat operations the sink needs.
#[async_trait]
pub trait ChatPlatform: Send + Sync + 'static {
    /// Open a private coordination thread.
    async fn create_thread(&self, name: &str) -> Result<ThreadRef, ChatApiError>;

    async fn add_member(&self, thread: &ThreadRef, user: &PartyId) -> Result<(), ChatApiError>;

    async fn post_message(&self, thread: &ThreadRef, message: &PostMessageRequest) -> Result<(), ChatApiError>;

    /// Delete a thread. A 404 is reported as an error; the sink treats it
    /// as success.
    async fn delete_thread(&self, thread: &ThreadRef) -> Result<(), ChatApiError>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

#[async_trait]
impl ChatPlatform for ChatClient {
    async fn create_thread(&self, name: &str) -> Result<ThreadRef, ChatApiError> {
        let req = CreateThreadRequest {
            name: name.to_string(),
            parent_channel: self.parent_channel().map(str::to_string),
            private: true,
        };
        Ok(self.threads().create(&req).await?.id)
    }

    async fn add_member(&self, thread: &ThreadRef, user: &PartyId) -> Result<(), ChatApiError> {
        self.threads().add_member(thread, user).await
    }

    async fn post_message(&self, thread: &ThreadRef, message: &PostMessageRequest) -> Result<(), ChatApiError> {
        self.messages().post(thread, message).await.map(|_| ())
    }

    async fn delete_thread(&self, thread: &ThreadRef) -> Result<(), ChatApiError> {
        self.threads().delete(thread).await
    }

    fn name(&self) -> &'static str {
        "gateway"
    }
}

/// Chat backend that only logs. Thread refs are synthetic (`local-{uuid}`).
#[derive(Debug, Clone, Default)]
pub struct LogOnlyPlatform;

#[async_trait]
impl ChatPlatform for LogOnlyPlatform {
    async fn create_thread(&self, name: &str) -> Result<ThreadRef, ChatApiError> {
        let thread = ThreadRef::new(format!("local-{}", uuid::Uuid::new_v4())).map_err(|e| ChatApiError::ApiError {
            endpoint: "local create_thread".into(),
            status: 500,
            body: e.to_string(),
        })?;
        tracing::info!(%thread, name, "chat (log-only): create thread");
        Ok(thread)
    }

    async fn add_member(&self, thread: &ThreadRef, user: &PartyId) -> Result<(), ChatApiError> {
        tracing::info!(%thread, %user, "chat (log-only): add member");
        Ok(())
    }

    async fn post_message(&self, thread: &ThreadRef, message: &PostMessageRequest) -> Result<(), ChatApiError> {
        tracing::info!(%thread, content = %message.content, "chat (log-only): post message");
        Ok(())
    }

    async fn delete_thread(&self, thread: &ThreadRef) -> Result<(), ChatApiError> {
        tracing::info!(%thread, "chat (log-only): delete thread");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log-only"
    }
}

// ── Sink ────────────────────────────────────────────────────────────────────

/// Message settings for the sink.
#[derive(Debug, Clone)]
pub struct SinkSettings {
    /// Role pinged when a session becomes ready.
    pub middleman_role: Option<String>,
    pub accept_emoji: String,
    pub acceptance_window: Duration,
    /// Delay between the teardown warning and the thread deletion.
    pub teardown_grace: Duration,
}

/// Renders and sends the coordinator's chat notifications.
#[derive(Clone)]
pub struct NotificationSink {
    platform: Arc<dyn ChatPlatform>,
    settings: Arc<SinkSettings>,
    metrics: ApiMetrics,
}

impl std::fmt::Debug for NotificationSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationSink")
            .field("platform", &self.platform.name())
            .field("settings", &self.settings)
            .finish()
    }
}

fn mention(user: &PartyId) -> String {
    format!("<@{user}>")
}

impl NotificationSink {
    pub fn new(platform: Arc<dyn ChatPlatform>, settings: SinkSettings, metrics: ApiMetrics) -> Self {
        Self {
            platform,
            settings: Arc::new(settings),
            metrics,
        }
    }

    pub fn settings(&self) -> &SinkSettings {
        &self.settings
    }

    fn failed(&self, command: &'static str, session: &MiddlemanRequest, err: &ChatApiError) {
        tracing::warn!(
            request_id = %session.id,
            command,
            platform = self.platform.name(),
            error = %err,
            "chat command failed, giving up"
        );
        self.metrics.record_outbound_failure(command);
    }

    /// Create the coordination thread, invite both parties and post the
    /// acceptance prompt. Returns `None` when the thread could not be
    /// created. Invite and prompt failures are logged; the thread is still
    /// returned.
    pub async fn create_thread(&self, session: &MiddlemanRequest) -> Option<ThreadRef> {
        let name = match &session.trade_id {
            Some(trade) => format!("middleman-{trade}"),
            None => format!("middleman-{}", session.id),
        };

        let thread = match self.platform.create_thread(&name).await {
            Ok(thread) => thread,
            Err(e) => {
                self.failed("create_thread", session, &e);
                return None;
            }
        };

        for party in session.parties() {
            if let Err(e) = self.platform.add_member(&thread, party).await {
                self.failed("add_member", session, &e);
            }
        }

        let parties = session.parties();
        let mentions: Vec<String> = parties.iter().map(|p| mention(p)).collect();
        let subject = match &session.trade_id {
            Some(trade) => format!("trade {trade}"),
            None => "this deal".to_string(),
        };
        let mut content = format!(
            "{} a middleman was requested for {subject}. React with {} within {} minutes to confirm.",
            mentions.join(" "),
            self.settings.accept_emoji,
            self.settings.acceptance_window.as_secs().div_ceil(60),
        );
        if session.party_a_accepted {
            content.push_str(&format!(" {} has already accepted.", mention(&session.party_a)));
        }
        let prompt = PostMessageRequest::mentioning_users(content, parties.iter().map(|p| p.to_string()).collect());
        if let Err(e) = self.platform.post_message(&thread, &prompt).await {
            self.failed("post_prompt", session, &e);
        }

        tracing::info!(request_id = %session.id, %thread, "coordination thread created");
        Some(thread)
    }

    /// Acknowledge one party's acceptance while the other is pending.
    pub async fn announce_party_accepted(&self, session: &MiddlemanRequest, party: &PartyId) {
        let Some(thread) = &session.thread_ref else { return };
        let message = PostMessageRequest::text(format!(
            "{} accepted. Waiting for the other party.",
            mention(party)
        ));
        if let Err(e) = self.platform.post_message(thread, &message).await {
            self.failed("announce_party_accepted", session, &e);
        }
    }

    /// Post the ready message and ping the middleman role.
    pub async fn announce_ready(&self, session: &MiddlemanRequest) {
        let Some(thread) = &session.thread_ref else {
            tracing::warn!(request_id = %session.id, "session ready without a coordination thread");
            return;
        };
        let message = PostMessageRequest::text("Both parties accepted. A middleman will join shortly.");
        if let Err(e) = self.platform.post_message(thread, &message).await {
            self.failed("announce_ready", session, &e);
        }
        if let Some(role) = &self.settings.middleman_role {
            let ping = PostMessageRequest::role_ping(role, format!("session {} is ready for a middleman", session.id));
            if let Err(e) = self.platform.post_message(thread, &ping).await {
                self.failed("ping_role", session, &e);
            }
        }
    }

    pub async fn announce_completed(&self, session: &MiddlemanRequest) {
        let Some(thread) = &session.thread_ref else { return };
        let content = match &session.middleman_id {
            Some(middleman) => format!("{} has taken this session. Marked as completed.", mention(middleman)),
            None => "This session is marked as completed.".to_string(),
        };
        if let Err(e) = self.platform.post_message(thread, &PostMessageRequest::text(content)).await {
            self.failed("announce_completed", session, &e);
        }
    }

    /// Warn, wait the grace delay, delete the thread. A thread that is
    /// already gone counts as deleted.
    pub async fn teardown_thread(&self, session: &MiddlemanRequest) {
        let Some(thread) = &session.thread_ref else { return };
        let grace = self.settings.teardown_grace;

        let warning = PostMessageRequest::text(format!(
            "This session was not confirmed in time or was declined. The thread will be deleted in {} seconds.",
            grace.as_secs()
        ));
        if let Err(e) = self.platform.post_message(thread, &warning).await {
            self.failed("teardown_warning", session, &e);
        }

        tokio::time::sleep(grace).await;

        match self.platform.delete_thread(thread).await {
            Ok(()) => tracing::info!(request_id = %session.id, %thread, "coordination thread deleted"),
            Err(e) if e.is_not_found() => {
                tracing::debug!(request_id = %session.id, %thread, "coordination thread already deleted");
            }
            Err(e) => self.failed("delete_thread", session, &e),
        }
    }

    /// Run [`Self::teardown_thread`] in the background.
    pub fn spawn_teardown(&self, session: MiddlemanRequest) -> tokio::task::JoinHandle<()> {
        let sink = self.clone();
        tokio::spawn(async move { sink.teardown_thread(&session).await })
    }
}
