//! Chat platform client configuration.
//!
//! The gateway is a REST service in front of the chat platform. The
//! coordinator only needs its base URL, a bearer token and the parent
//! channel under which coordination threads are opened.

use url::Url;

/// Default gateway location when `CHAT_API_BASE_URL` is unset.
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8090";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Configuration for connecting to the chat platform gateway.
///
/// Custom `Debug` implementation redacts the `api_token` field
/// to prevent credential leakage in log output.
#[derive(Clone)]
pub struct ChatApiConfig {
    /// Base URL of the gateway REST API.
    pub base_url: Url,
    /// Bearer token for the gateway.
    pub api_token: String,
    /// Channel under which coordination threads are created. The gateway
    /// picks its own default when absent.
    pub parent_channel: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ChatApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatApiConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &"[REDACTED]")
            .field("parent_channel", &self.parent_channel)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ChatApiConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `CHAT_API_TOKEN` (required)
    /// - `CHAT_API_BASE_URL` (default: `http://127.0.0.1:8090`)
    /// - `CHAT_PARENT_CHANNEL` (optional)
    /// - `CHAT_TIMEOUT_SECS` (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_token = std::env::var("CHAT_API_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingToken)?;

        Ok(Self {
            base_url: env_url("CHAT_API_BASE_URL", DEFAULT_BASE_URL)?,
            api_token,
            parent_channel: std::env::var("CHAT_PARENT_CHANNEL")
                .ok()
                .filter(|c| !c.trim().is_empty()),
            timeout_secs: std::env::var("CHAT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Configuration pointing at a local mock gateway (for testing).
    pub fn local_mock(base_url: &str, token: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: Url::parse(base_url)
                .map_err(|e| ConfigError::InvalidUrl(base_url.to_string(), e.to_string()))?,
            api_token: token.to_string(),
            parent_channel: None,
            timeout_secs: 5,
        })
    }
}

fn env_url(var: &str, default: &str) -> Result<Url, ConfigError> {
    let raw = std::env::var(var).unwrap_or_else(|_| default.to_string());
    Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl(var.to_string(), e.to_string()))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("CHAT_API_TOKEN environment variable is required")]
    MissingToken,
    #[error("invalid URL for {0}: {1}")]
    InvalidUrl(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let cfg = ChatApiConfig::local_mock("http://127.0.0.1:9000", "super-secret").unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn local_mock_builds_valid_config() {
        let cfg = ChatApiConfig::local_mock("http://127.0.0.1:9000", "t").unwrap();
        assert_eq!(cfg.base_url.as_str(), "http://127.0.0.1:9000/");
        assert_eq!(cfg.timeout_secs, 5);
        assert!(cfg.parent_channel.is_none());
    }

    #[test]
    fn env_url_uses_default_when_var_absent() {
        let url = env_url("MM_CHAT_NONEXISTENT_VAR_4821", "https://gateway.example.com").unwrap();
        assert_eq!(url.as_str(), "https://gateway.example.com/");
    }

    #[test]
    fn local_mock_rejects_invalid_url() {
        assert!(ChatApiConfig::local_mock("not a url", "t").is_err());
    }
}
