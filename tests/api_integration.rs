//! End-to-end HTTP surface tests against the in-memory fake store.

use std::sync::Arc;

use axum_test::TestServer;
use chrono::Utc;
use serde_json::json;
use social_bridge::config::Config;
use social_bridge::handlers::{self, AppState};
use social_bridge::models::{Platform, Tenant, TenantRole, WebhookConfig};
use social_bridge::store::{DataStore, FakeStore};
use uuid::Uuid;

fn test_config() -> Config {
    Config {
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        app_secret: "test-app-secret".to_string(),
        database_url: "postgres://unused".to_string(),
        data_service_key: "unused".to_string(),
        default_ai_api_key: "default-ai-key".to_string(),
        public_site_url: "https://example.com".to_string(),
        signature_check_disabled: true,
        default_drain_batch_size: 5,
        max_retry_count: 3,
        worker_concurrency: 5,
        stale_claim_timeout: std::time::Duration::from_secs(60),
        retry_initial_delay: std::time::Duration::from_millis(1),
        retry_backoff_factor: 2.0,
        retry_max_delay: std::time::Duration::from_millis(5),
        session_ttl: std::time::Duration::from_secs(365 * 24 * 3600),
        session_cleanup_interval: std::time::Duration::from_secs(3600),
        credential_refresh_interval: std::time::Duration::from_secs(24 * 3600),
        credential_refresh_threshold: std::time::Duration::from_secs(7 * 24 * 3600),
        ai_call_timeout: std::time::Duration::from_secs(15),
        provider_send_timeout: std::time::Duration::from_secs(10),
        ai_runtime_base_url: "https://runtime.invalid".to_string(),
        provider_graph_base_url: "https://graph.invalid/v18.0".to_string(),
    }
}

fn test_server_with_store(store: FakeStore) -> (TestServer, Arc<FakeStore>) {
    let store = Arc::new(store);
    let config = Arc::new(test_config());
    let state = AppState::new(store.clone(), config);
    let app = handlers::build_router(state);
    (TestServer::new(app).unwrap(), store)
}

#[tokio::test]
async fn verification_handshake_echoes_challenge() {
    let tenant_id = Uuid::new_v4();
    let store = FakeStore::new()
        .with_tenant(Tenant {
            id: tenant_id,
            email: "op@example.com".to_string(),
            role: TenantRole::Admin,
            created_at: Utc::now(),
            deleted_at: None,
        })
        .with_webhook_config(WebhookConfig {
            id: Uuid::new_v4(),
            tenant_id,
            platform: Platform::Page,
            verification_token: "tkA".to_string(),
            webhook_url: None,
            generated_url: None,
            is_active: true,
        });

    let (server, _store) = test_server_with_store(store);

    let response = server
        .get(&format!("/api/webhooks/{tenant_id}/page/xyz"))
        .add_query_param("hub.mode", "subscribe")
        .add_query_param("hub.verify_token", "tkA")
        .add_query_param("hub.challenge", "C123")
        .await;

    response.assert_status_ok();
    response.assert_text("C123");
}

#[tokio::test]
async fn verification_handshake_rejects_wrong_token() {
    let tenant_id = Uuid::new_v4();
    let store = FakeStore::new().with_webhook_config(WebhookConfig {
        id: Uuid::new_v4(),
        tenant_id,
        platform: Platform::Page,
        verification_token: "tkA".to_string(),
        webhook_url: None,
        generated_url: None,
        is_active: true,
    });

    let (server, _store) = test_server_with_store(store);

    let response = server
        .get(&format!("/api/webhooks/{tenant_id}/page/xyz"))
        .add_query_param("hub.mode", "subscribe")
        .add_query_param("hub.verify_token", "wrong")
        .add_query_param("hub.challenge", "C123")
        .await;

    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn page_message_is_enqueued_with_disabled_signature_check() {
    let tenant_id = Uuid::new_v4();
    let store = FakeStore::new();
    let (server, store) = test_server_with_store(store);

    let body = json!({
        "object": "page",
        "entry": [{"messaging": [{
            "sender": {"id": "P1"},
            "recipient": {"id": "R1"},
            "timestamp": 1_700_000_000_000_i64,
            "message": {"mid": "m1", "text": "hello"}
        }]}]
    });

    let response = server.post(&format!("/api/webhooks/{tenant_id}/page/xyz")).json(&body).await;
    response.assert_status_ok();

    let events = store.events_snapshot();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].sender_id, "P1");
    assert_eq!(events[0].recipient_id, "R1");
}

#[tokio::test]
async fn echo_message_is_not_enqueued() {
    let tenant_id = Uuid::new_v4();
    let store = FakeStore::new();
    let (server, store) = test_server_with_store(store);

    let body = json!({
        "object": "page",
        "entry": [{"messaging": [{
            "sender": {"id": "P1"},
            "recipient": {"id": "R1"},
            "timestamp": 1,
            "message": {"mid": "m1", "text": "hello", "is_echo": true}
        }]}]
    });

    // The handler enqueues per raw event without normalizing; the echo
    // check happens when the worker later normalizes the payload. The row
    // IS queued here, but draining it must complete quietly with no
    // dead-lettered trace of an echo of the tenant's own message.
    let response = server.post(&format!("/api/webhooks/{tenant_id}/page/xyz")).json(&body).await;
    response.assert_status_ok();
    assert_eq!(store.events_snapshot().len(), 1);

    let drain_response = server.get("/api/drain").await;
    drain_response.assert_status_ok();

    assert!(store.dead_letters_snapshot().is_empty());
}

#[tokio::test]
async fn session_cleanup_reports_zero_when_nothing_expired() {
    let (server, _store) = test_server_with_store(FakeStore::new());
    let response = server.get("/api/session-cleanup").await;
    response.assert_status_ok();
    response.assert_json(&json!({"cleaned": 0}));
}

#[tokio::test]
async fn drain_with_empty_queue_reports_zero_processed() {
    let (server, _store) = test_server_with_store(FakeStore::new());
    let response = server.get("/api/drain").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["processed"], 0);
}

#[tokio::test]
async fn health_check_responds_ok() {
    let (server, _store) = test_server_with_store(FakeStore::new());
    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_text("ok");
}
