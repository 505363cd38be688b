//! In-memory `DataStore` used by integration tests. No live Postgres
//! required for test tooling.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    AIProjectBinding, Conversation, DeadLetter, Message, NewQueuedEvent, Platform,
    ProcessingTrace, QueuedEvent, QueuedEventStatus, Sender, Session, SocialConnection, Tenant,
    TraceStatus, WebhookConfig,
};

use super::DataStore;

#[derive(Default)]
pub struct FakeStore {
    webhook_configs: DashMap<Uuid, WebhookConfig>,
    tenants: DashMap<Uuid, Tenant>,
    ai_bindings: DashMap<Uuid, AIProjectBinding>,
    connections: DashMap<Uuid, SocialConnection>,
    events: Mutex<Vec<QueuedEvent>>,
    conversations: Mutex<Vec<Conversation>>,
    messages: Mutex<Vec<Message>>,
    traces: Mutex<Vec<ProcessingTrace>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    sessions: DashMap<Uuid, Session>,
}

impl FakeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_webhook_config(self, config: WebhookConfig) -> Self {
        self.webhook_configs.insert(config.id, config);
        self
    }

    #[must_use]
    pub fn with_tenant(self, tenant: Tenant) -> Self {
        self.tenants.insert(tenant.id, tenant);
        self
    }

    #[must_use]
    pub fn with_ai_binding(self, binding: AIProjectBinding) -> Self {
        self.ai_bindings.insert(binding.tenant_id, binding);
        self
    }

    #[must_use]
    pub fn with_connection(self, connection: SocialConnection) -> Self {
        self.connections.insert(connection.id, connection);
        self
    }

    #[must_use]
    pub fn events_snapshot(&self) -> Vec<QueuedEvent> {
        self.events.lock().unwrap().clone()
    }

    #[must_use]
    pub fn dead_letters_snapshot(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().unwrap().clone()
    }

    #[must_use]
    pub fn traces_snapshot(&self) -> Vec<ProcessingTrace> {
        self.traces.lock().unwrap().clone()
    }

    #[must_use]
    pub fn messages_snapshot(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataStore for FakeStore {
    async fn find_webhook_config(&self, tenant_id: Uuid, platform: Platform) -> AppResult<Option<WebhookConfig>> {
        Ok(self
            .webhook_configs
            .iter()
            .find(|c| c.tenant_id == tenant_id && (c.platform == platform || c.platform == Platform::Any) && c.is_active)
            .map(|c| c.clone()))
    }

    async fn find_webhook_config_by_token(&self, verification_token: &str) -> AppResult<Option<WebhookConfig>> {
        Ok(self
            .webhook_configs
            .iter()
            .find(|c| c.verification_token == verification_token && c.is_active)
            .map(|c| c.clone()))
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> AppResult<Option<Tenant>> {
        Ok(self.tenants.get(&tenant_id).map(|t| t.clone()).filter(|t| t.deleted_at.is_none()))
    }

    async fn find_ai_binding(&self, tenant_id: Uuid) -> AppResult<Option<AIProjectBinding>> {
        Ok(self.ai_bindings.get(&tenant_id).map(|b| b.clone()))
    }

    async fn find_connection_for_recipient(
        &self,
        tenant_id: Uuid,
        platform: Platform,
        recipient_external_id: &str,
    ) -> AppResult<Option<SocialConnection>> {
        Ok(self
            .connections
            .iter()
            .find(|c| {
                c.tenant_id == tenant_id
                    && c.platform == platform
                    && c.external_id() == recipient_external_id
            })
            .map(|c| c.clone()))
    }

    async fn list_connections_expiring_within(&self, threshold: DateTime<Utc>) -> AppResult<Vec<SocialConnection>> {
        Ok(self
            .connections
            .iter()
            .filter(|c| c.token_expiry <= threshold)
            .map(|c| c.clone())
            .collect())
    }

    async fn update_connection_token(
        &self,
        connection_id: Uuid,
        access_token: &str,
        token_expiry: DateTime<Utc>,
        refreshed_at: DateTime<Utc>,
    ) -> AppResult<()> {
        if let Some(mut conn) = self.connections.get_mut(&connection_id) {
            conn.access_token = access_token.to_string();
            conn.token_expiry = token_expiry;
            conn.refreshed_at = Some(refreshed_at);
        }
        Ok(())
    }

    async fn enqueue_with_trace(&self, event: NewQueuedEvent) -> AppResult<QueuedEvent> {
        let queued = QueuedEvent {
            id: Uuid::new_v4(),
            tenant_id: event.tenant_id,
            platform: event.platform,
            sender_id: event.sender_id,
            recipient_id: event.recipient_id,
            raw_payload: event.raw_payload,
            event_ts: event.event_ts,
            status: QueuedEventStatus::Pending,
            retry_count: 0,
            last_retry_at: None,
            error: None,
            completed_at: None,
            created_at: Utc::now(),
        };
        self.events.lock().unwrap().push(queued.clone());
        self.traces.lock().unwrap().push(ProcessingTrace {
            id: Uuid::new_v4(),
            queued_event_id: queued.id,
            stage: "received".to_string(),
            status: TraceStatus::Completed,
            error: None,
            metadata: serde_json::json!({}),
            ts: Utc::now(),
        });
        Ok(queued)
    }

    async fn claim_batch(&self, batch_size: i64, stale_after: chrono::Duration, now: DateTime<Utc>) -> AppResult<Vec<QueuedEvent>> {
        let mut events = self.events.lock().unwrap();

        for event in events.iter_mut() {
            if event.status == QueuedEventStatus::Processing {
                if let Some(last_retry) = event.last_retry_at {
                    if now - last_retry >= stale_after {
                        event.status = QueuedEventStatus::Pending;
                    }
                }
            }
        }

        let mut claimed = Vec::new();
        for event in events.iter_mut() {
            if claimed.len() as i64 >= batch_size {
                break;
            }
            if event.status == QueuedEventStatus::Pending {
                event.status = QueuedEventStatus::Processing;
                event.retry_count += 1;
                event.last_retry_at = Some(now);
                claimed.push(event.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, event_id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        let mut events = self.events.lock().unwrap();
        if let Some(event) = events.iter_mut().find(|e| e.id == event_id) {
            event.status = QueuedEventStatus::Completed;
            event.completed_at = Some(now);
        }
        Ok(())
    }

    async fn mark_failed_retry(&self, event_id: Uuid, error: &str, now: DateTime<Utc>) -> AppResult<()> {
        let mut events = self.events.lock().unwrap();
        if let Some(event) = events.iter_mut().find(|e| e.id == event_id) {
            event.status = QueuedEventStatus::Pending;
            event.retry_count += 1;
            event.last_retry_at = Some(now);
            event.error = Some(error.to_string());
        }
        Ok(())
    }

    async fn mark_failed_terminal(&self, event_id: Uuid, error: &str, now: DateTime<Utc>) -> AppResult<()> {
        let mut events = self.events.lock().unwrap();
        if let Some(event) = events.iter_mut().find(|e| e.id == event_id) {
            event.status = QueuedEventStatus::Failed;
            event.retry_count += 1;
            event.last_retry_at = Some(now);
            event.error = Some(error.to_string());
        }
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
        let mut conversations = self.conversations.lock().unwrap();
        if let Some(existing) = conversations
            .iter_mut()
            .find(|c| c.tenant_id == tenant_id && c.platform == platform && c.external_thread_id == external_thread_id)
        {
            existing.last_message_at = now;
            return Ok(existing.clone());
        }

        let conversation = Conversation {
            id: Uuid::new_v4(),
            tenant_id,
            platform,
            external_thread_id: external_thread_id.to_string(),
            participant_id: participant_id.to_string(),
            last_message_at: now,
            session_id: None,
        };
        conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn record_message(
        &self,
        conversation_id: Uuid,
        sender: Sender,
        content: &str,
        external_id: Option<&str>,
        sent_at: DateTime<Utc>,
    ) -> AppResult<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender,
            content: content.to_string(),
            external_id: external_id.map(str::to_string),
            sent_at,
        };
        self.messages.lock().unwrap().push(message.clone());
        Ok(message)
    }

    async fn append_trace(&self, trace: ProcessingTrace) -> AppResult<()> {
        self.traces.lock().unwrap().push(trace);
        Ok(())
    }

    async fn insert_dead_letter(&self, dead_letter: DeadLetter) -> AppResult<()> {
        self.dead_letters.lock().unwrap().push(dead_letter);
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
        if let Some(existing) = self
            .sessions
            .iter()
            .find(|s| s.tenant_id == tenant_id && s.participant_id == participant_id && s.platform == platform)
        {
            return Ok(existing.clone());
        }

        let session = Session {
            id: Uuid::new_v4(),
            tenant_id,
            participant_id: participant_id.to_string(),
            platform,
            context: serde_json::json!({}),
            last_interaction: now,
            expires_at: now + ttl,
        };
        self.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn save_session_context(&self, session_id: Uuid, context: serde_json::Value, now: DateTime<Utc>) -> AppResult<()> {
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            session.context = context;
            session.last_interaction = now;
        }
        Ok(())
    }

    async fn link_session_to_conversation(&self, conversation_id: Uuid, session_id: Uuid) -> AppResult<()> {
        let mut conversations = self.conversations.lock().unwrap();
        if let Some(conversation) = conversations.iter_mut().find(|c| c.id == conversation_id) {
            conversation.session_id = Some(session_id);
        }
        Ok(())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let expired: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|s| s.expires_at <= now)
            .map(|s| s.id)
            .collect();
        for id in &expired {
            self.sessions.remove(id);
        }
        Ok(expired.len() as u64)
    }

    async fn list_tenant_ids_for_participant(&self, participant_id: &str) -> AppResult<Vec<Uuid>> {
        let conversations = self.conversations.lock().unwrap();
        let mut tenant_ids: Vec<Uuid> = conversations
            .iter()
            .filter(|c| c.participant_id == participant_id)
            .map(|c| c.tenant_id)
            .collect();
        tenant_ids.sort();
        tenant_ids.dedup();
        Ok(tenant_ids)
    }

    async fn purge_participant_data(&self, tenant_id: Uuid, participant_id: &str) -> AppResult<()> {
        let stale_sessions: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|s| s.tenant_id == tenant_id && s.participant_id == participant_id)
            .map(|s| s.id)
            .collect();
        for id in stale_sessions {
            self.sessions.remove(&id);
        }

        let mut conversations = self.conversations.lock().unwrap();
        let removed_ids: Vec<Uuid> = conversations
            .iter()
            .filter(|c| c.tenant_id == tenant_id && c.participant_id == participant_id)
            .map(|c| c.id)
            .collect();
        conversations.retain(|c| !(c.tenant_id == tenant_id && c.participant_id == participant_id));
        drop(conversations);

        let mut messages = self.messages.lock().unwrap();
        messages.retain(|m| !removed_ids.contains(&m.conversation_id));
        Ok(())
    }

    async fn try_advisory_lock(&self, _key: i64) -> AppResult<bool> {
        // The fake store has no cross-process contention to guard against;
        // its callers already serialize through the Mutex-guarded vectors.
        Ok(true)
    }
}
