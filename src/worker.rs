//! Event processing pipeline.
//!
//! Each claimed [`QueuedEvent`] goes through: resolve connection, acquire
//! session, upsert conversation, persist the inbound message, update
//! session context, resolve the AI binding, call the AI runtime, extract
//! context updates, persist the assistant reply, format it for the
//! provider, send it, and finalize. Each network stage runs under the
//! retry core; the whole pipeline runs per-conversation under a Postgres
//! advisory lock so two workers never interleave state for the same
//! participant.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::ai_client::{self, AIResponseItem, AiClient};
use crate::config::Config;
use crate::error::AppError;
use crate::models::{
    NewQueuedEvent, Platform, ProcessingTrace, QueuedEvent, Sender, TraceStatus,
};
use crate::normalize::{self, Attachment, NormalizedMessage, QuickReply};
use crate::provider_client::{OutgoingReply, ProviderClient};
use crate::retry::{self, RetryPolicy};
use crate::session_context;
use crate::store::DataStore;

pub struct Worker {
    store: Arc<dyn DataStore>,
    ai_client: Arc<AiClient>,
    provider_client: Arc<ProviderClient>,
    config: Arc<Config>,
}

impl Worker {
    #[must_use]
    pub fn new(
        store: Arc<dyn DataStore>,
        ai_client: Arc<AiClient>,
        provider_client: Arc<ProviderClient>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            ai_client,
            provider_client,
            config,
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            3,
            self.config.retry_initial_delay,
            self.config.retry_backoff_factor,
            self.config.retry_max_delay,
        )
    }

    /// Claim up to `batch_size` pending events and process them
    /// concurrently (bounded by `worker_concurrency`), finalizing each
    /// according to the outcome.
    pub async fn drain(&self, batch_size: i64) -> Result<DrainSummary, AppError> {
        let now = Utc::now();
        let stale_after = chrono::Duration::from_std(self.config.stale_claim_timeout)
            .unwrap_or(chrono::Duration::seconds(60));
        let claimed = self.store.claim_batch(batch_size, stale_after, now).await?;

        let mut summary = DrainSummary::default();
        let mut chunks = claimed.chunks(self.config.worker_concurrency.max(1));
        while let Some(chunk) = chunks.next() {
            let results = futures::future::join_all(chunk.iter().map(|event| self.process_and_finalize(event))).await;
            for outcome in results {
                match outcome {
                    Outcome::Completed => summary.completed += 1,
                    Outcome::RetryScheduled => summary.retried += 1,
                    Outcome::DeadLettered => summary.dead_lettered += 1,
                }
            }
        }
        Ok(summary)
    }

    async fn process_and_finalize(&self, event: &QueuedEvent) -> Outcome {
        let lock_key = advisory_lock_key(event.tenant_id, &event.sender_id);
        match self.store.try_advisory_lock(lock_key).await {
            Ok(true) => {}
            Ok(false) => return Outcome::RetryScheduled,
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "advisory lock acquisition failed");
                return Outcome::RetryScheduled;
            }
        }

        match self.process_event(event).await {
            Ok(StageOutcome::Processed | StageOutcome::SkippedEcho) => {
                let _ = self.store.mark_completed(event.id, Utc::now()).await;
                Outcome::Completed
            }
            Err(e) => {
                let terminal = !retry::is_transient(&e) || event.retry_count >= self.config.max_retry_count;
                if terminal {
                    let _ = self
                        .store
                        .mark_failed_terminal(event.id, &e.to_string(), Utc::now())
                        .await;
                    let _ = self
                        .store
                        .insert_dead_letter(crate::models::DeadLetter {
                            id: Uuid::new_v4(),
                            tenant_id: event.tenant_id,
                            original_payload: event.raw_payload.clone(),
                            error: e.to_string(),
                            metadata: json!({"retry_count": event.retry_count}),
                            failed_at: Utc::now(),
                            status: "pending_review".to_string(),
                        })
                        .await;
                    warn!(event_id = %event.id, error = %e, "event moved to dead letter");
                    Outcome::DeadLettered
                } else {
                    let _ = self.store.mark_failed_retry(event.id, &e.to_string(), Utc::now()).await;
                    Outcome::RetryScheduled
                }
            }
        }
    }

    async fn process_event(&self, event: &QueuedEvent) -> Result<StageOutcome, AppError> {
        let policy = self.retry_policy();

        let Some(normalized) = normalize_from_payload(event)? else {
            return Ok(StageOutcome::SkippedEcho);
        };
        self.trace(event.id, "normalize", TraceStatus::Completed, None).await;

        let connection = self
            .store
            .find_connection_for_recipient(event.tenant_id, event.platform, &event.recipient_id)
            .await?
            .ok_or(AppError::MissingConnection)?;

        let session = self
            .store
            .get_or_create_session(
                event.tenant_id,
                &event.sender_id,
                event.platform,
                chrono::Duration::from_std(self.config.session_ttl).unwrap_or(chrono::Duration::days(365)),
                Utc::now(),
            )
            .await?;

        let conversation = self
            .store
            .upsert_conversation(event.tenant_id, event.platform, &event.sender_id, &event.sender_id, Utc::now())
            .await?;
        self.store.link_session_to_conversation(conversation.id, session.id).await?;

        self.store
            .record_message(
                conversation.id,
                Sender::User,
                &normalized.text,
                normalized.metadata.provider_message_id.as_deref(),
                Utc::now(),
            )
            .await?;

        let mut context = session.context.clone();
        session_context::push_history(&mut context, crate::models::HistoryRole::User, &normalized.text, Utc::now());
        self.store.save_session_context(session.id, context.clone(), Utc::now()).await?;

        let binding = self
            .store
            .find_ai_binding(event.tenant_id)
            .await?
            .ok_or(AppError::MissingAiBinding)?;
        let api_key = binding.api_key.as_deref().unwrap_or(&self.config.default_ai_api_key);

        let ai_client = self.ai_client.clone();
        let tenant_id = event.tenant_id;
        let participant_id = event.sender_id.clone();
        let text = normalized.text.clone();
        let ai_context = context.clone();
        let event_id = event.id;
        let trace_store = self.store.clone();
        let items = retry::run(&policy, || {
            let ai_client = ai_client.clone();
            let text = text.clone();
            let ai_context = ai_context.clone();
            let participant_id = participant_id.clone();
            let trace_store = trace_store.clone();
            async move {
                let result = ai_client.interact(tenant_id, api_key, &participant_id, &text, ai_context).await;
                record_attempt_trace(&trace_store, event_id, "ai_runtime", &result).await;
                result
            }
        })
        .await?;

        let (reply_text, variable_pairs) = render_items(&items);
        let mut updated_context = context.clone();
        if !variable_pairs.is_empty() {
            session_context::merge_variables(&mut updated_context, variable_pairs, Utc::now());
        }
        session_context::push_history(&mut updated_context, crate::models::HistoryRole::Assistant, &reply_text, Utc::now());
        self.store.save_session_context(session.id, updated_context, Utc::now()).await?;

        self.store
            .record_message(conversation.id, Sender::Assistant, &reply_text, None, Utc::now())
            .await?;

        let reply = build_outgoing_reply(&reply_text, &items);

        let provider_client = self.provider_client.clone();
        let platform = event.platform;
        let external_id = connection.external_id().to_string();
        let access_token = connection.access_token.clone();
        let recipient_id = event.sender_id.clone();
        let reply_for_send = reply.clone();
        let trace_store = self.store.clone();
        let send_result = retry::run(&policy, || {
            let provider_client = provider_client.clone();
            let external_id = external_id.clone();
            let access_token = access_token.clone();
            let recipient_id = recipient_id.clone();
            let reply = reply_for_send.clone();
            let trace_store = trace_store.clone();
            async move {
                let result = provider_client
                    .send(platform, &external_id, &access_token, &recipient_id, &reply)
                    .await;
                record_attempt_trace(&trace_store, event_id, "provider_send", &result).await;
                result
            }
        })
        .await;

        // A send failure after retries are exhausted does not roll the whole
        // event back to retry/dead-letter — the assistant message is already
        // persisted, so this completes with a warning rather than being
        // reprocessed (which would re-invoke the AI runtime and duplicate
        // conversation history).
        if let Err(e) = &send_result {
            warn!(event_id = %event.id, error = %e, "reply generated but undelivered to provider; completing with warning");
        }

        Ok(StageOutcome::Processed)
    }

    async fn trace(&self, queued_event_id: Uuid, stage: &str, status: TraceStatus, error: Option<String>) {
        let trace = ProcessingTrace {
            id: Uuid::new_v4(),
            queued_event_id,
            stage: stage.to_string(),
            status,
            error,
            metadata: json!({}),
            ts: Utc::now(),
        };
        if let Err(e) = self.store.append_trace(trace).await {
            warn!(queued_event_id = %queued_event_id, stage, error = %e, "failed to persist processing trace");
        }
    }
}

#[derive(Debug, Default)]
pub struct DrainSummary {
    pub completed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

enum Outcome {
    Completed,
    RetryScheduled,
    DeadLettered,
}

/// Result of running the pipeline stages in [`Worker::process_event`],
/// distinct from the per-batch [`Outcome`] it feeds into.
enum StageOutcome {
    Processed,
    /// The event normalized to nothing (e.g. an echo of the tenant's own
    /// message) — nothing downstream ran, and none should.
    SkippedEcho,
}

/// Writes one `ProcessingTrace` per retry attempt, success or failure, so a
/// sequence of transient failures followed by a success stays fully
/// auditable, with every attempt visible, not just the last.
async fn record_attempt_trace<T>(store: &Arc<dyn DataStore>, queued_event_id: Uuid, stage: &str, result: &Result<T, AppError>) {
    let (status, error) = match result {
        Ok(_) => (TraceStatus::Completed, None),
        Err(e) => (TraceStatus::Failed, Some(e.to_string())),
    };
    let trace = ProcessingTrace {
        id: Uuid::new_v4(),
        queued_event_id,
        stage: stage.to_string(),
        status,
        error,
        metadata: json!({}),
        ts: Utc::now(),
    };
    if let Err(e) = store.append_trace(trace).await {
        warn!(queued_event_id = %queued_event_id, stage, error = %e, "failed to persist processing trace");
    }
}

fn advisory_lock_key(tenant_id: Uuid, participant_id: &str) -> i64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    tenant_id.hash(&mut hasher);
    participant_id.hash(&mut hasher);
    hasher.finish() as i64
}

/// `Ok(None)` means the normalizer deliberately dropped the event (an echo
/// of the tenant's own outbound message) — that is not a failure.
fn normalize_from_payload(event: &QueuedEvent) -> Result<Option<NormalizedMessage>, AppError> {
    let result = match event.platform {
        Platform::Page | Platform::Any => normalize::normalize_page_event(&event.raw_payload),
        Platform::Photo => normalize::normalize_photo_event(&event.raw_payload),
    };

    result.map_err(|e| AppError::MalformedPayload(e.to_string()))
}

fn render_items(items: &[AIResponseItem]) -> (String, Vec<(String, serde_json::Value)>) {
    let mut text_parts = Vec::new();
    let mut pairs = Vec::new();

    for item in items {
        match item {
            AIResponseItem::Text { text } => {
                pairs.extend(ai_client::extract_inline_markers(text).into_iter().map(|(k, v)| (k, json!(v))));
                let cleaned = ai_client::strip_inline_markers(text);
                if !cleaned.is_empty() {
                    text_parts.push(cleaned);
                }
            }
            AIResponseItem::Choice { text, .. } => text_parts.push(text.clone()),
            AIResponseItem::Visual { caption, .. } => {
                if let Some(caption) = caption {
                    text_parts.push(caption.clone());
                }
            }
            AIResponseItem::SetVariables { variables } => {
                pairs.extend(variables.clone().into_iter());
            }
            AIResponseItem::Unsupported => {}
        }
    }

    (text_parts.join(" "), pairs)
}

fn build_outgoing_reply(reply_text: &str, items: &[AIResponseItem]) -> OutgoingReply {
    let quick_replies: Vec<QuickReply> = items
        .iter()
        .find_map(|item| match item {
            AIResponseItem::Choice { choices, .. } => Some(
                choices
                    .iter()
                    .map(|c| QuickReply {
                        title: c.clone(),
                        payload: c.clone(),
                    })
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default();

    let attachment = items.iter().find_map(|item| match item {
        AIResponseItem::Visual { url, .. } => Some(Attachment {
            kind: "image".to_string(),
            description: url.clone(),
        }),
        _ => None,
    });

    OutgoingReply {
        text: if reply_text.is_empty() { None } else { Some(reply_text.to_string()) },
        quick_replies,
        attachment,
    }
    .capped()
}

/// Build a [`NewQueuedEvent`] from a normalized event's raw source payload
/// (used by the webhook ingestion handler).
#[must_use]
pub fn build_new_queued_event(
    tenant_id: Uuid,
    platform: Platform,
    sender_id: String,
    recipient_id: String,
    raw_payload: serde_json::Value,
    event_ts: chrono::DateTime<Utc>,
) -> NewQueuedEvent {
    NewQueuedEvent {
        tenant_id,
        platform,
        sender_id,
        recipient_id,
        raw_payload,
        event_ts,
    }
}

pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_items_joins_text_and_collects_markers() {
        let items = vec![
            AIResponseItem::Text { text: "Sure.".into() },
            AIResponseItem::Text { text: "[[SET:tier=gold]] Done.".into() },
        ];
        let (text, pairs) = render_items(&items);
        assert_eq!(text, "Sure. Done.");
        assert_eq!(pairs, vec![("tier".to_string(), json!("gold"))]);
    }

    #[test]
    fn build_outgoing_reply_extracts_choices_as_quick_replies() {
        let items = vec![AIResponseItem::Choice {
            text: "pick one".into(),
            choices: vec!["yes".into(), "no".into()],
        }];
        let reply = build_outgoing_reply("pick one", &items);
        assert_eq!(reply.quick_replies.len(), 2);
        assert_eq!(reply.quick_replies[0].title, "yes");
    }

    #[test]
    fn advisory_lock_key_is_stable_for_same_inputs() {
        let tenant = Uuid::new_v4();
        let a = advisory_lock_key(tenant, "sender-1");
        let b = advisory_lock_key(tenant, "sender-1");
        assert_eq!(a, b);
    }

    #[test]
    fn advisory_lock_key_differs_across_senders() {
        let tenant = Uuid::new_v4();
        let a = advisory_lock_key(tenant, "sender-1");
        let b = advisory_lock_key(tenant, "sender-2");
        assert_ne!(a, b);
    }
}
