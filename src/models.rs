//! Data model for the social webhook bridge.
//!
//! Entities mirror the relational schema in `migrations/`. All identifiers
//! are UUIDs; timestamps are UTC with millisecond precision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Social-platform variant. `Any` matches a `WebhookConfig` registered for
/// either platform (used when an operator has not split configs per platform).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Page,
    Photo,
    Any,
}

impl Platform {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Page => "page",
            Platform::Photo => "photo",
            Platform::Any => "any",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "page" => Ok(Platform::Page),
            "photo" => Ok(Platform::Photo),
            "any" => Ok(Platform::Any),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TenantRole {
    Admin,
    Customer,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub email: String,
    pub role: TenantRole,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Binds a tenant to a page or photo-sharing asset plus credentials for
/// acting on its behalf. Exactly one of `page_id`/`account_id` is set.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SocialConnection {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub platform: Platform,
    pub page_id: Option<String>,
    pub account_id: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub token_expiry: DateTime<Utc>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl SocialConnection {
    /// The provider-side identifier this connection acts as (page or account).
    #[must_use]
    pub fn external_id(&self) -> &str {
        self.page_id
            .as_deref()
            .or(self.account_id.as_deref())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.token_expiry - now).num_days()
    }

    /// Informational display band.
    #[must_use]
    pub fn expiry_band(&self, now: DateTime<Utc>) -> ExpiryBand {
        let days = self.days_until_expiry(now);
        if days <= 0 {
            ExpiryBand::Expired
        } else if days <= 5 {
            ExpiryBand::Red
        } else if days <= 14 {
            ExpiryBand::Yellow
        } else {
            ExpiryBand::Green
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryBand {
    Expired,
    Red,
    Yellow,
    Green,
}

/// Per-(tenant, platform) webhook endpoint registration.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookConfig {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub platform: Platform,
    #[serde(skip_serializing)]
    pub verification_token: String,
    pub webhook_url: Option<String>,
    pub generated_url: Option<String>,
    pub is_active: bool,
}

/// Per-tenant mapping to an AI-runtime project.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AIProjectBinding {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: String,
    pub runtime_config: serde_json::Value,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

/// Per-(tenant, participant, platform) dialog context.
///
/// `context` is an opaque JSON map with a reserved `conversationHistory`
/// key holding an ordered list of `{role, content, ts}` entries, capped at
/// 50 at rest.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub participant_id: String,
    pub platform: Platform,
    pub context: serde_json::Value,
    pub last_interaction: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub const MAX_CONVERSATION_HISTORY: usize = 50;

/// One entry in `Session.context.conversationHistory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

/// Logical thread between a participant and a tenant asset.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub platform: Platform,
    pub external_thread_id: String,
    pub participant_id: String,
    pub last_message_at: DateTime<Utc>,
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One atomic exchange record within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: Sender,
    pub content: String,
    pub external_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueuedEventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Durable record of an inbound webhook event awaiting processing.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueuedEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub platform: Platform,
    pub sender_id: String,
    pub recipient_id: String,
    pub raw_payload: serde_json::Value,
    pub event_ts: DateTime<Utc>,
    pub status: QueuedEventStatus,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields required to enqueue a new event.
#[derive(Debug, Clone)]
pub struct NewQueuedEvent {
    pub tenant_id: Uuid,
    pub platform: Platform,
    pub sender_id: String,
    pub recipient_id: String,
    pub raw_payload: serde_json::Value,
    pub event_ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Completed,
    Failed,
}

/// Append-only per-event audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessingTrace {
    pub id: Uuid,
    pub queued_event_id: Uuid,
    pub stage: String,
    pub status: TraceStatus,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
    pub ts: DateTime<Utc>,
}

/// Terminally-failed event, parked for manual inspection.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeadLetter {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub original_payload: serde_json::Value,
    pub error: String,
    pub metadata: serde_json::Value,
    pub failed_at: DateTime<Utc>,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_band_boundaries() {
        let now = Utc::now();
        let make = |days: i64| SocialConnection {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            platform: Platform::Page,
            page_id: Some("p1".into()),
            account_id: None,
            access_token: "tok".into(),
            token_expiry: now + chrono::Duration::days(days),
            refreshed_at: None,
        };

        assert_eq!(make(-1).expiry_band(now), ExpiryBand::Expired);
        assert_eq!(make(0).expiry_band(now), ExpiryBand::Expired);
        assert_eq!(make(5).expiry_band(now), ExpiryBand::Red);
        assert_eq!(make(14).expiry_band(now), ExpiryBand::Yellow);
        assert_eq!(make(15).expiry_band(now), ExpiryBand::Green);
    }

    #[test]
    fn external_id_prefers_page() {
        let conn = SocialConnection {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            platform: Platform::Page,
            page_id: Some("page-1".into()),
            account_id: None,
            access_token: "tok".into(),
            token_expiry: Utc::now(),
            refreshed_at: None,
        };
        assert_eq!(conn.external_id(), "page-1");
    }
}
