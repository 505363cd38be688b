//! `sqlx::PgPool`-backed `DataStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    AIProjectBinding, Conversation, DeadLetter, Message, NewQueuedEvent, Platform,
    ProcessingTrace, QueuedEvent, Sender, Session, SocialConnection, Tenant, WebhookConfig,
};

use super::DataStore;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run the embedded migrations, matching the teacher's
    /// startup sequence of failing fast on a bad `DATABASE_URL`.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

fn data_err(e: sqlx::Error) -> AppError {
    AppError::DataUnavailable(e.to_string())
}

#[async_trait]
impl DataStore for PgStore {
    async fn find_webhook_config(&self, tenant_id: Uuid, platform: Platform) -> AppResult<Option<WebhookConfig>> {
        sqlx::query_as::<_, WebhookConfig>(
            "SELECT id, tenant_id, platform, verification_token, webhook_url, generated_url, is_active
             FROM webhook_configs WHERE tenant_id = $1 AND (platform = $2 OR platform = 'any') AND is_active
             LIMIT 1",
        )
        .bind(tenant_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(data_err)
    }

    async fn find_webhook_config_by_token(&self, verification_token: &str) -> AppResult<Option<WebhookConfig>> {
        sqlx::query_as::<_, WebhookConfig>(
            "SELECT id, tenant_id, platform, verification_token, webhook_url, generated_url, is_active
             FROM webhook_configs WHERE verification_token = $1 AND is_active LIMIT 1",
        )
        .bind(verification_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(data_err)
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> AppResult<Option<Tenant>> {
        sqlx::query_as::<_, Tenant>(
            "SELECT id, email, role, created_at, deleted_at FROM tenants WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(data_err)
    }

    async fn find_ai_binding(&self, tenant_id: Uuid) -> AppResult<Option<AIProjectBinding>> {
        sqlx::query_as::<_, AIProjectBinding>(
            "SELECT id, tenant_id, project_id, runtime_config, api_key FROM ai_project_bindings WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(data_err)
    }

    async fn find_connection_for_recipient(
        &self,
        tenant_id: Uuid,
        platform: Platform,
        recipient_external_id: &str,
    ) -> AppResult<Option<SocialConnection>> {
        sqlx::query_as::<_, SocialConnection>(
            "SELECT id, tenant_id, platform, page_id, account_id, access_token, token_expiry, refreshed_at
             FROM social_connections
             WHERE tenant_id = $1 AND platform = $2 AND (page_id = $3 OR account_id = $3)
             LIMIT 1",
        )
        .bind(tenant_id)
        .bind(platform.as_str())
        .bind(recipient_external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(data_err)
    }

    async fn list_connections_expiring_within(&self, threshold: DateTime<Utc>) -> AppResult<Vec<SocialConnection>> {
        sqlx::query_as::<_, SocialConnection>(
            "SELECT id, tenant_id, platform, page_id, account_id, access_token, token_expiry, refreshed_at
             FROM social_connections WHERE token_expiry <= $1",
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await
        .map_err(data_err)
    }

    async fn update_connection_token(
        &self,
        connection_id: Uuid,
        access_token: &str,
        token_expiry: DateTime<Utc>,
        refreshed_at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE social_connections SET access_token = $2, token_expiry = $3, refreshed_at = $4 WHERE id = $1",
        )
        .bind(connection_id)
        .bind(access_token)
        .bind(token_expiry)
        .bind(refreshed_at)
        .execute(&self.pool)
        .await
        .map_err(data_err)?;
        Ok(())
    }

    async fn enqueue_with_trace(&self, event: NewQueuedEvent) -> AppResult<QueuedEvent> {
        let mut tx = self.pool.begin().await.map_err(data_err)?;

        let queued = sqlx::query_as::<_, QueuedEvent>(
            "INSERT INTO queued_events
                (id, tenant_id, platform, sender_id, recipient_id, raw_payload, event_ts, status, retry_count, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', 0, $8)
             RETURNING id, tenant_id, platform, sender_id, recipient_id, raw_payload, event_ts, status,
                       retry_count, last_retry_at, error, completed_at, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(event.tenant_id)
        .bind(event.platform.as_str())
        .bind(event.sender_id)
        .bind(event.recipient_id)
        .bind(event.raw_payload)
        .bind(event.event_ts)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(data_err)?;

        sqlx::query(
            "INSERT INTO processing_traces (id, queued_event_id, stage, status, error, metadata, ts)
             VALUES ($1, $2, 'received', 'completed', NULL, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(queued.id)
        .bind(serde_json::json!({}))
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(data_err)?;

        tx.commit().await.map_err(data_err)?;
        Ok(queued)
    }

    async fn claim_batch(&self, batch_size: i64, stale_after: chrono::Duration, now: DateTime<Utc>) -> AppResult<Vec<QueuedEvent>> {
        let stale_cutoff = now - stale_after;

        // Reap stale in-flight claims before pulling a fresh batch.
        sqlx::query(
            "UPDATE queued_events SET status = 'pending'
             WHERE status = 'processing' AND last_retry_at < $1",
        )
        .bind(stale_cutoff)
        .execute(&self.pool)
        .await
        .map_err(data_err)?;

        sqlx::query_as::<_, QueuedEvent>(
            "UPDATE queued_events SET status = 'processing', retry_count = retry_count + 1, last_retry_at = $2
             WHERE id IN (
                 SELECT id FROM queued_events
                 WHERE status = 'pending'
                 ORDER BY created_at
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, tenant_id, platform, sender_id, recipient_id, raw_payload, event_ts, status,
                       retry_count, last_retry_at, error, completed_at, created_at",
        )
        .bind(batch_size)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(data_err)
    }

    async fn mark_completed(&self, event_id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE queued_events SET status = 'completed', completed_at = $2 WHERE id = $1")
            .bind(event_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(data_err)?;
        Ok(())
    }

    async fn mark_failed_retry(&self, event_id: Uuid, error: &str, now: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            "UPDATE queued_events SET status = 'pending', retry_count = retry_count + 1,
                last_retry_at = $2, error = $3 WHERE id = $1",
        )
        .bind(event_id)
        .bind(now)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(data_err)?;
        Ok(())
    }

    async fn mark_failed_terminal(&self, event_id: Uuid, error: &str, now: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            "UPDATE queued_events SET status = 'failed', retry_count = retry_count + 1,
                last_retry_at = $2, error = $3 WHERE id = $1",
        )
        .bind(event_id)
        .bind(now)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(data_err)?;
        Ok(())
    }

    async fn upsert_conversation(
        &self,
        tenant_id: Uuid,
        platform: Platform,
        external_thread_id: &str,
        participant_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Conversation> {
        sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (id, tenant_id, platform, external_thread_id, participant_id, last_message_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (tenant_id, platform, external_thread_id)
             DO UPDATE SET last_message_at = $6
             RETURNING id, tenant_id, platform, external_thread_id, participant_id, last_message_at, session_id",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(platform.as_str())
        .bind(external_thread_id)
        .bind(participant_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(data_err)
    }

    async fn record_message(
        &self,
        conversation_id: Uuid,
        sender: Sender,
        content: &str,
        external_id: Option<&str>,
        sent_at: DateTime<Utc>,
    ) -> AppResult<Message> {
        let sender_str = match sender {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        };
        sqlx::query_as::<_, Message>(
            "INSERT INTO messages (id, conversation_id, sender, content, external_id, sent_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, conversation_id, sender, content, external_id, sent_at",
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(sender_str)
        .bind(content)
        .bind(external_id)
        .bind(sent_at)
        .fetch_one(&self.pool)
        .await
        .map_err(data_err)
    }

    async fn append_trace(&self, trace: ProcessingTrace) -> AppResult<()> {
        let status_str = match trace.status {
            crate::models::TraceStatus::Completed => "completed",
            crate::models::TraceStatus::Failed => "failed",
        };
        sqlx::query(
            "INSERT INTO processing_traces (id, queued_event_id, stage, status, error, metadata, ts)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(trace.id)
        .bind(trace.queued_event_id)
        .bind(trace.stage)
        .bind(status_str)
        .bind(trace.error)
        .bind(trace.metadata)
        .bind(trace.ts)
        .execute(&self.pool)
        .await
        .map_err(data_err)?;
        Ok(())
    }

    async fn insert_dead_letter(&self, dead_letter: DeadLetter) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO dead_letters (id, tenant_id, original_payload, error, metadata, failed_at, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(dead_letter.id)
        .bind(dead_letter.tenant_id)
        .bind(dead_letter.original_payload)
        .bind(dead_letter.error)
        .bind(dead_letter.metadata)
        .bind(dead_letter.failed_at)
        .bind(dead_letter.status)
        .execute(&self.pool)
        .await
        .map_err(data_err)?;
        Ok(())
    }

    async fn get_or_create_session(
        &self,
        tenant_id: Uuid,
        participant_id: &str,
        platform: Platform,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> AppResult<Session> {
        if let Some(existing) = sqlx::query_as::<_, Session>(
            "SELECT id, tenant_id, participant_id, platform, context, last_interaction, expires_at
             FROM sessions WHERE tenant_id = $1 AND participant_id = $2 AND platform = $3",
        )
        .bind(tenant_id)
        .bind(participant_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(data_err)?
        {
            return Ok(existing);
        }

        sqlx::query_as::<_, Session>(
            "INSERT INTO sessions (id, tenant_id, participant_id, platform, context, last_interaction, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (tenant_id, participant_id, platform) DO UPDATE SET last_interaction = sessions.last_interaction
             RETURNING id, tenant_id, participant_id, platform, context, last_interaction, expires_at",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(participant_id)
        .bind(platform.as_str())
        .bind(serde_json::json!({}))
        .bind(now)
        .bind(now + ttl)
        .fetch_one(&self.pool)
        .await
        .map_err(data_err)
    }

    async fn save_session_context(&self, session_id: Uuid, context: serde_json::Value, now: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE sessions SET context = $2, last_interaction = $3 WHERE id = $1")
            .bind(session_id)
            .bind(context)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(data_err)?;
        Ok(())
    }

    async fn link_session_to_conversation(&self, conversation_id: Uuid, session_id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE conversations SET session_id = $2 WHERE id = $1")
            .bind(conversation_id)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(data_err)?;
        Ok(())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(data_err)?;
        Ok(result.rows_affected())
    }

    async fn list_tenant_ids_for_participant(&self, participant_id: &str) -> AppResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT DISTINCT tenant_id FROM conversations WHERE participant_id = $1",
        )
        .bind(participant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(data_err)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn purge_participant_data(&self, tenant_id: Uuid, participant_id: &str) -> AppResult<()> {
        let mut tx = self.pool.begin().await.map_err(data_err)?;
        sqlx::query("DELETE FROM sessions WHERE tenant_id = $1 AND participant_id = $2")
            .bind(tenant_id)
            .bind(participant_id)
            .execute(&mut *tx)
            .await
            .map_err(data_err)?;
        sqlx::query(
            "DELETE FROM messages WHERE conversation_id IN
                (SELECT id FROM conversations WHERE tenant_id = $1 AND participant_id = $2)",
        )
        .bind(tenant_id)
        .bind(participant_id)
        .execute(&mut *tx)
        .await
        .map_err(data_err)?;
        sqlx::query("DELETE FROM conversations WHERE tenant_id = $1 AND participant_id = $2")
            .bind(tenant_id)
            .bind(participant_id)
            .execute(&mut *tx)
            .await
            .map_err(data_err)?;
        tx.commit().await.map_err(data_err)?;
        Ok(())
    }

    async fn try_advisory_lock(&self, key: i64) -> AppResult<bool> {
        let row: (bool,) = sqlx::query_as("SELECT pg_try_advisory_xact_lock($1)")
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(data_err)?;
        Ok(row.0)
    }
}
