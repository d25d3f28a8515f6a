//! Typed client for thread messages.
//!
//! Role pings are ordinary messages whose content contains `<@&role>` and
//! whose allowed-mentions list names that role; without the allow-list the
//! platform renders the mention but notifies nobody.

use serde::{Deserialize, Serialize};

use mm_core::{MessageRef, ThreadRef};

use crate::error::ChatApiError;
use crate::retry::RetryPolicy;

/// Mentions the platform is allowed to notify for a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllowedMentions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

/// Request to post a message into a thread.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    pub content: String,
    pub allowed_mentions: AllowedMentions,
}

impl PostMessageRequest {
    /// Plain text with no notifications.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            allowed_mentions: AllowedMentions::default(),
        }
    }

    /// Text that notifies the listed users.
    pub fn mentioning_users(content: impl Into<String>, users: Vec<String>) -> Self {
        Self {
            content: content.into(),
            allowed_mentions: AllowedMentions {
                users,
                roles: Vec::new(),
            },
        }
    }

    /// Text prefixed with a ping of `role`.
    pub fn role_ping(role: &str, content: impl AsRef<str>) -> Self {
        Self {
            content: format!("<@&{role}> {}", content.as_ref()),
            allowed_mentions: AllowedMentions {
                users: Vec::new(),
                roles: vec![role.to_string()],
            },
        }
    }
}

/// Message as returned by the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageRef,
    #[serde(default)]
    pub thread_id: Option<ThreadRef>,
}

/// Client for message endpoints.
#[derive(Debug, Clone)]
pub struct MessageClient {
    http: reqwest::Client,
    base_url: url::Url,
}

impl MessageClient {
    pub(crate) fn new(http: reqwest::Client, base_url: url::Url) -> Self {
        Self { http, base_url }
    }

    /// Post a message into a thread.
    ///
    /// Calls `POST {base_url}/threads/{thread}/messages`.
    pub async fn post(&self, thread: &ThreadRef, req: &PostMessageRequest) -> Result<ChatMessage, ChatApiError> {
        let endpoint = format!("POST /threads/{thread}/messages");
        let url = crate::endpoint_url(&self.base_url, &format!("threads/{thread}/messages"));

        let resp = crate::retry::retry_send(RetryPolicy::Transient, || self.http.post(&url).json(req).send())
            .await
            .map_err(|e| ChatApiError::Http {
                endpoint: endpoint.clone(),
                source: e,
            })?;
        let resp = crate::ensure_success(&endpoint, resp).await?;

        resp.json().await.map_err(|e| ChatApiError::Deserialization {
            endpoint: endpoint.clone(),
            source: e,
        })
    }

    /// Ping a role in a thread.
    pub async fn ping_role(&self, thread: &ThreadRef, role: &str, content: &str) -> Result<ChatMessage, ChatApiError> {
        self.post(thread, &PostMessageRequest::role_ping(role, content)).await
    }
}
