//! Bounded retry for chat gateway calls.
//!
//! Every command gets at most one follow-up attempt. Repeatable commands
//! are retried after a transport failure, a `429` or a `5xx`. Commands that
//! must not be applied twice are retried only after a `429`, which the
//! gateway answers before acting; a `5xx` or a dropped connection may
//! follow a request that already took effect. Other responses are returned
//! to the caller on the first attempt. The coordinator abandons a command
//! after that, so an outage of the gateway costs at most two requests per
//! command.

use std::time::Duration;

/// Follow-up attempts after the initial request.
pub(crate) const MAX_RETRIES: u32 = 1;

/// Delay before the follow-up attempt.
const RETRY_DELAY_MS: u64 = 250;

/// Which failures a command may be retried after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryPolicy {
    /// Transport failures, `429` and `5xx`. Repeating the command is harmless.
    Transient,
    /// `429` only. Creating a resource twice would orphan the first one.
    RejectedOnly,
}

impl RetryPolicy {
    fn retries_status(self, status: reqwest::StatusCode) -> bool {
        match self {
            Self::Transient => status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS,
            Self::RejectedOnly => status == reqwest::StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn retries_transport_errors(self) -> bool {
        self == Self::Transient
    }
}

/// Send an HTTP request, retrying failures allowed by `policy` up to
/// [`MAX_RETRIES`] times. The final attempt's result is returned as is; the
/// caller inspects the status code.
pub(crate) async fn retry_send<F, Fut>(policy: RetryPolicy, f: F) -> Result<reqwest::Response, reqwest::Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let delay = Duration::from_millis(RETRY_DELAY_MS);
    for attempt in 0..MAX_RETRIES {
        match f().await {
            Ok(resp) if !policy.retries_status(resp.status()) => return Ok(resp),
            Err(e) if !policy.retries_transport_errors() => return Err(e),
            Ok(resp) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    status = resp.status().as_u16(),
                    "chat gateway returned a transient error, retrying in {delay:?}"
                );
            }
            Err(e) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    "chat gateway request failed, retrying in {delay:?}: {e}"
                );
            }
        }
        tokio::time::sleep(delay).await;
    }
    f().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn retryable_statuses() {
        let transient = RetryPolicy::Transient;
        assert!(transient.retries_status(reqwest::StatusCode::BAD_GATEWAY));
        assert!(transient.retries_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(!transient.retries_status(reqwest::StatusCode::NOT_FOUND));
        assert!(!transient.retries_status(reqwest::StatusCode::OK));

        let rejected = RetryPolicy::RejectedOnly;
        assert!(rejected.retries_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(!rejected.retries_status(reqwest::StatusCode::BAD_GATEWAY));
        assert!(!rejected.retries_transport_errors());
    }

    #[tokio::test]
    async fn transport_failure_is_retried_once() {
        let call_count = Arc::new(AtomicU32::new(0));
        let cc = call_count.clone();

        let result = retry_send(RetryPolicy::Transient, || {
            let cc = cc.clone();
            async move {
                cc.fetch_add(1, Ordering::SeqCst);
                // Closed port: connection refused.
                reqwest::Client::builder()
                    .timeout(Duration::from_millis(50))
                    .build()
                    .unwrap()
                    .get("http://127.0.0.1:1/")
                    .send()
                    .await
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }

    #[tokio::test]
    async fn transport_failure_is_final_for_rejected_only() {
        let call_count = Arc::new(AtomicU32::new(0));
        let cc = call_count.clone();

        let result = retry_send(RetryPolicy::RejectedOnly, || {
            let cc = cc.clone();
            async move {
                cc.fetch_add(1, Ordering::SeqCst);
                reqwest::Client::builder()
                    .timeout(Duration::from_millis(50))
                    .build()
                    .unwrap()
                    .get("http://127.0.0.1:1/")
                    .send()
                    .await
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
