//! Typed client for coordination threads.
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | POST   | `/threads` | Create a private thread |
//! | PUT    | `/threads/{threadId}/members/{userId}` | Invite a member |
//! | DELETE | `/threads/{threadId}` | Delete the thread |

use serde::{Deserialize, Serialize};

use mm_core::{PartyId, ThreadRef};

use crate::error::ChatApiError;
use crate::retry::RetryPolicy;

/// Request to open a coordination thread.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_channel: Option<String>,
    /// Private threads are visible only to invited members and moderators.
    pub private: bool,
}

/// Thread as returned by the gateway.
///
/// Unknown fields are ignored so gateway upgrades do not break the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatThread {
    pub id: ThreadRef,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_channel: Option<String>,
}

/// Client for thread lifecycle endpoints.
#[derive(Debug, Clone)]
pub struct ThreadClient {
    http: reqwest::Client,
    base_url: url::Url,
}

impl ThreadClient {
    pub(crate) fn new(http: reqwest::Client, base_url: url::Url) -> Self {
        Self { http, base_url }
    }

    /// Open a new thread.
    ///
    /// Calls `POST {base_url}/threads`. Only a `429` is retried: after a
    /// `5xx` or a lost connection the thread may already exist, and a
    /// second one would never be deleted.
    pub async fn create(&self, req: &CreateThreadRequest) -> Result<ChatThread, ChatApiError> {
        let endpoint = "POST /threads";
        let url = crate::endpoint_url(&self.base_url, "threads");

        let resp = crate::retry::retry_send(RetryPolicy::RejectedOnly, || self.http.post(&url).json(req).send())
            .await
            .map_err(|e| ChatApiError::Http {
                endpoint: endpoint.into(),
                source: e,
            })?;
        let resp = crate::ensure_success(endpoint, resp).await?;

        resp.json().await.map_err(|e| ChatApiError::Deserialization {
            endpoint: endpoint.into(),
            source: e,
        })
    }

    /// Invite a user into a thread. Inviting an existing member succeeds.
    ///
    /// Calls `PUT {base_url}/threads/{thread}/members/{user}`.
    pub async fn add_member(&self, thread: &ThreadRef, user: &PartyId) -> Result<(), ChatApiError> {
        let endpoint = format!("PUT /threads/{thread}/members/{user}");
        let url = crate::endpoint_url(&self.base_url, &format!("threads/{thread}/members/{user}"));

        let resp = crate::retry::retry_send(RetryPolicy::Transient, || self.http.put(&url).send())
            .await
            .map_err(|e| ChatApiError::Http {
                endpoint: endpoint.clone(),
                source: e,
            })?;
        crate::ensure_success(&endpoint, resp).await?;
        Ok(())
    }

    /// Delete a thread and its history.
    ///
    /// Calls `DELETE {base_url}/threads/{thread}`. A missing thread is
    /// reported as an [`ChatApiError::ApiError`] with status 404; see
    /// [`ChatApiError::is_not_found`].
    pub async fn delete(&self, thread: &ThreadRef) -> Result<(), ChatApiError> {
        let endpoint = format!("DELETE /threads/{thread}");
        let url = crate::endpoint_url(&self.base_url, &format!("threads/{thread}"));

        let resp = crate::retry::retry_send(RetryPolicy::Transient, || self.http.delete(&url).send())
            .await
            .map_err(|e| ChatApiError::Http {
                endpoint: endpoint.clone(),
                source: e,
            })?;
        crate::ensure_success(&endpoint, resp).await?;
        Ok(())
    }
}
