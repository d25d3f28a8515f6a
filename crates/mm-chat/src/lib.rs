//! # mm-chat -- Typed client for the chat platform gateway
//!
//! The coordinator never talks to the chat platform directly. Reactions
//! arrive through the relay endpoint of `mm-api`; outbound commands go
//! through this crate:
//!
//! - **Threads**: create a private coordination thread, invite members,
//!   delete the thread.
//! - **Messages**: post text into a thread, ping a role.
//!
//! Every call gets one retry on transient failures (see `retry`). Callers
//! decide what a failure means; the coordinator logs and moves on.

pub mod config;
pub mod error;
pub mod messages;
pub(crate) mod retry;
pub mod threads;

pub use config::ChatApiConfig;
pub use error::ChatApiError;
pub use messages::{AllowedMentions, ChatMessage, PostMessageRequest};
pub use threads::{ChatThread, CreateThreadRequest};

use std::time::Duration;

/// Top-level chat gateway client. Holds the sub-clients.
#[derive(Debug, Clone)]
pub struct ChatClient {
    threads: threads::ThreadClient,
    messages: messages::MessageClient,
    parent_channel: Option<String>,
}

impl ChatClient {
    /// Create a new chat gateway client from configuration.
    pub fn new(config: ChatApiConfig) -> Result<Self, ChatApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    reqwest::header::HeaderValue::from_str(&format!("Bearer {}", config.api_token))
                        .map_err(|_| ChatApiError::Config(config::ConfigError::MissingToken))?,
                );
                headers
            })
            .build()
            .map_err(|e| ChatApiError::Http {
                endpoint: "client_init".into(),
                source: e,
            })?;

        Ok(Self {
            threads: threads::ThreadClient::new(http.clone(), config.base_url.clone()),
            messages: messages::MessageClient::new(http, config.base_url),
            parent_channel: config.parent_channel,
        })
    }

    /// Access the thread client.
    pub fn threads(&self) -> &threads::ThreadClient {
        &self.threads
    }

    /// Access the message client.
    pub fn messages(&self) -> &messages::MessageClient {
        &self.messages
    }

    /// Channel new threads are opened under, if configured.
    pub fn parent_channel(&self) -> Option<&str> {
        self.parent_channel.as_deref()
    }
}

/// Join `path` onto the base URL regardless of a trailing slash.
pub(crate) fn endpoint_url(base: &url::Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path)
}

/// Turn a non-2xx response into [`ChatApiError::ApiError`].
pub(crate) async fn ensure_success(endpoint: &str, resp: reqwest::Response) -> Result<reqwest::Response, ChatApiError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(ChatApiError::ApiError {
        endpoint: endpoint.to_string(),
        status,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_handles_trailing_slash() {
        let with_path: url::Url = "http://gw.local/api/v1".parse().unwrap();
        assert_eq!(endpoint_url(&with_path, "threads"), "http://gw.local/api/v1/threads");
        let root: url::Url = "http://gw.local".parse().unwrap();
        assert_eq!(endpoint_url(&root, "threads"), "http://gw.local/threads");
    }
}
