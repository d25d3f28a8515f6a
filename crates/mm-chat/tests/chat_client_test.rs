//! Contract tests for the chat gateway client.
//!
//! wiremock stands in for the gateway. Each test checks the path and body
//! the client sends and how it interprets the gateway's answer.

use mm_chat::{ChatApiConfig, ChatApiError, ChatClient, CreateThreadRequest, PostMessageRequest};
use mm_core::{PartyId, ThreadRef};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(mock_server: &MockServer) -> ChatClient {
    let config = ChatApiConfig::local_mock(&mock_server.uri(), "test-token").unwrap();
    ChatClient::new(config).unwrap()
}

fn thread(id: &str) -> ThreadRef {
    ThreadRef::new(id).unwrap()
}

// ── POST /threads ────────────────────────────────────────────────────

#[tokio::test]
async fn create_thread_sends_bearer_and_returns_thread() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/threads"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(serde_json::json!({
            "name": "middleman-trade-1",
            "private": true
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "th-100",
            "name": "middleman-trade-1",
            "parentChannel": "escrow"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let created = client
        .threads()
        .create(&CreateThreadRequest {
            name: "middleman-trade-1".into(),
            parent_channel: Some("escrow".into()),
            private: true,
        })
        .await
        .unwrap();

    assert_eq!(created.id, "th-100");
    assert_eq!(created.parent_channel.as_deref(), Some("escrow"));
}

#[tokio::test]
async fn create_thread_rejects_unusable_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/threads"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": "" })))
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let err = client
        .threads()
        .create(&CreateThreadRequest {
            name: "x".into(),
            parent_channel: None,
            private: true,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ChatApiError::Deserialization { .. }), "got {err:?}");
}

#[tokio::test]
async fn server_error_is_retried_exactly_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/threads/th-1/members/alice"))
        .respond_with(ResponseTemplate::new(503).set_body_string("gateway restarting"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let err = client
        .threads()
        .add_member(&thread("th-1"), &PartyId::new("alice").unwrap())
        .await
        .unwrap_err();

    match err {
        ChatApiError::ApiError { status, body, .. } => {
            assert_eq!(status, 503);
            assert!(body.contains("restarting"));
        }
        other => panic!("expected ApiError, got: {other:?}"),
    }
}

#[tokio::test]
async fn create_thread_is_not_repeated_after_server_error() {
    let mock_server = MockServer::start().await;

    // The gateway may have created the thread before failing.
    Mock::given(method("POST"))
        .and(path("/threads"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream timeout"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let err = client
        .threads()
        .create(&CreateThreadRequest {
            name: "x".into(),
            parent_channel: None,
            private: true,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ChatApiError::ApiError { status: 502, .. }), "got {err:?}");
}

#[tokio::test]
async fn create_thread_retries_after_rate_limit() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/threads"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/threads"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": "th-7" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let created = client
        .threads()
        .create(&CreateThreadRequest {
            name: "x".into(),
            parent_channel: None,
            private: true,
        })
        .await
        .unwrap();
    assert_eq!(created.id, "th-7");
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/threads/th-1/members/alice"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let err = client
        .threads()
        .add_member(&thread("th-1"), &PartyId::new("alice").unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(403));
}

// ── PUT /threads/{id}/members/{user} ─────────────────────────────────

#[tokio::test]
async fn add_member_puts_member_path() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/threads/th-1/members/bob"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    client
        .threads()
        .add_member(&thread("th-1"), &PartyId::new("bob").unwrap())
        .await
        .unwrap();
}

// ── POST /threads/{id}/messages ──────────────────────────────────────

#[tokio::test]
async fn role_ping_sends_allowed_mentions() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/threads/th-1/messages"))
        .and(body_partial_json(serde_json::json!({
            "content": "<@&mods> trade-1 is ready",
            "allowedMentions": { "roles": ["mods"] }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "msg-9",
            "threadId": "th-1"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let msg = client
        .messages()
        .ping_role(&thread("th-1"), "mods", "trade-1 is ready")
        .await
        .unwrap();
    assert_eq!(msg.id, "msg-9");
    assert_eq!(msg.thread_id.unwrap(), "th-1");
}

#[tokio::test]
async fn post_message_to_missing_thread_is_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/threads/gone/messages"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let err = client
        .messages()
        .post(&thread("gone"), &PostMessageRequest::text("hello"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

// ── DELETE /threads/{id} ─────────────────────────────────────────────

#[tokio::test]
async fn delete_thread_succeeds_on_204() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/threads/th-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    client.threads().delete(&thread("th-1")).await.unwrap();
}

#[tokio::test]
async fn delete_missing_thread_reports_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/threads/th-1"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = test_client(&mock_server);
    let err = client.threads().delete(&thread("th-1")).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn base_url_path_prefix_is_preserved() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/gateway/v1/threads/th-2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = ChatApiConfig::local_mock(&format!("{}/gateway/v1", mock_server.uri()), "t").unwrap();
    let client = ChatClient::new(config).unwrap();
    client.threads().delete(&thread("th-2")).await.unwrap();
}
