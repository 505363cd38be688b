//! Data service abstraction.
//!
//! `DataStore` is the single seam between the pipeline and persistence. The
//! production implementation is a `sqlx::PgPool`; tests run against an
//! in-memory fake so CI needs no live Postgres.

pub mod fake;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    AIProjectBinding, Conversation, DeadLetter, Message, NewQueuedEvent, ProcessingTrace,
    QueuedEvent, Sender, Session, SocialConnection, Tenant, WebhookConfig,
};

pub use fake::FakeStore;
pub use pg::PgStore;

/// Everything the worker pipeline and HTTP handlers need from persistence.
///
/// Grouped roughly by the entity it concerns.
#[async_trait]
pub trait DataStore: Send + Sync {
    // --- Tenants / webhook configs / AI bindings -----------------------
    async fn find_webhook_config(&self, tenant_id: Uuid, platform: crate::models::Platform) -> AppResult<Option<WebhookConfig>>;
    async fn find_webhook_config_by_token(&self, verification_token: &str) -> AppResult<Option<WebhookConfig>>;
    async fn find_tenant(&self, tenant_id: Uuid) -> AppResult<Option<Tenant>>;
    async fn find_ai_binding(&self, tenant_id: Uuid) -> AppResult<Option<AIProjectBinding>>;

    // --- Social connections ----------------------------------------------
    async fn find_connection_for_recipient(
        &self,
        tenant_id: Uuid,
        platform: crate::models::Platform,
        recipient_external_id: &str,
    ) -> AppResult<Option<SocialConnection>>;
    async fn list_connections_expiring_within(&self, threshold: DateTime<Utc>) -> AppResult<Vec<SocialConnection>>;
    async fn update_connection_token(
        &self,
        connection_id: Uuid,
        access_token: &str,
        token_expiry: DateTime<Utc>,
        refreshed_at: DateTime<Utc>,
    ) -> AppResult<()>;

    // --- Queue -----------------------------------------------------------
    /// Inserts the `QueuedEvent` and its initial `received` `ProcessingTrace`
    /// atomically: a crash between the two must not be observable as an
    /// event with no trace.
    async fn enqueue_with_trace(&self, event: NewQueuedEvent) -> AppResult<QueuedEvent>;
    async fn claim_batch(&self, batch_size: i64, stale_after: chrono::Duration, now: DateTime<Utc>) -> AppResult<Vec<QueuedEvent>>;
    async fn mark_completed(&self, event_id: Uuid, now: DateTime<Utc>) -> AppResult<()>;
    async fn mark_failed_retry(&self, event_id: Uuid, error: &str, now: DateTime<Utc>) -> AppResult<()>;
    async fn mark_failed_terminal(&self, event_id: Uuid, error: &str, now: DateTime<Utc>) -> AppResult<()>;

    // --- Conversations / messages / traces / dead letters ---------------
    async fn upsert_conversation(
        &self,
        tenant_id: Uuid,
        platform: crate::models::Platform,
        external_thread_id: &str,
        participant_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Conversation>;
    async fn record_message(
        &self,
        conversation_id: Uuid,
        sender: Sender,
        content: &str,
        external_id: Option<&str>,
        sent_at: DateTime<Utc>,
    ) -> AppResult<Message>;
    async fn append_trace(&self, trace: ProcessingTrace) -> AppResult<()>;
    async fn insert_dead_letter(&self, dead_letter: DeadLetter) -> AppResult<()>;

    // --- Sessions ----------------------------------------------------------
    async fn get_or_create_session(
        &self,
        tenant_id: Uuid,
        participant_id: &str,
        platform: crate::models::Platform,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> AppResult<Session>;
    async fn save_session_context(&self, session_id: Uuid, context: serde_json::Value, now: DateTime<Utc>) -> AppResult<()>;
    async fn link_session_to_conversation(&self, conversation_id: Uuid, session_id: Uuid) -> AppResult<()>;
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> AppResult<u64>;

    // --- Data deletion --------------------------------------------------
    /// Every tenant whose conversations mention this participant — the
    /// signed deletion callback only carries a participant id, not the
    /// tenant(s) they have messaged.
    async fn list_tenant_ids_for_participant(&self, participant_id: &str) -> AppResult<Vec<Uuid>>;
    async fn purge_participant_data(&self, tenant_id: Uuid, participant_id: &str) -> AppResult<()>;

    /// Best-effort advisory lock acquisition keyed by an arbitrary i64
    /// for per-conversation serialization. Returns `true` if the
    /// lock was acquired. The fake store always returns `true` since its
    /// single-threaded access is already serialized by its internal mutex.
    async fn try_advisory_lock(&self, key: i64) -> AppResult<bool>;
}
