//! Webhook verification handshake and event ingestion.

use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::models::Platform;
use crate::worker::build_new_queued_event;

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// GET `/api/webhooks/{tenant}/{platform}/{nonce}` — subscription
/// verification handshake.
pub async fn verify(
    State(state): State<AppState>,
    Path((tenant, platform, _nonce)): Path<(String, String, String)>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    match verify_inner(state, tenant, platform, query).await {
        Ok(challenge) => ([("content-type", "text/plain")], challenge).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn verify_inner(state: AppState, tenant: String, platform: String, query: VerifyQuery) -> AppResult<String> {
    let tenant_id = Uuid::parse_str(&tenant).map_err(|_| AppError::UnknownTenant)?;
    let platform = Platform::from_str(&platform).map_err(|()| AppError::MalformedPayload("unknown platform".into()))?;

    if query.mode.as_deref() != Some("subscribe") {
        return Err(AppError::MalformedPayload("hub.mode must be `subscribe`".into()));
    }
    let verify_token = query.verify_token.ok_or_else(|| AppError::MalformedPayload("missing hub.verify_token".into()))?;
    let challenge = query.challenge.ok_or_else(|| AppError::MalformedPayload("missing hub.challenge".into()))?;

    let config = state
        .store
        .find_webhook_config(tenant_id, platform)
        .await?
        .ok_or(AppError::InvalidSignature)?;

    if config.verification_token != verify_token {
        return Err(AppError::InvalidSignature);
    }

    Ok(challenge)
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    status: &'static str,
    queued: usize,
    processed: usize,
}

/// POST `/api/webhooks/{tenant}/{platform}/{nonce}` — event ingestion.
/// Signature is computed over the raw body, before any JSON
/// parsing; the provider always gets a 200 once the event is durably
/// enqueued, regardless of what happens downstream.
pub async fn ingest(
    State(state): State<AppState>,
    Path((tenant, platform, _nonce)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match ingest_inner(state, tenant, platform, headers, body).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn ingest_inner(
    state: AppState,
    tenant: String,
    platform: String,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<IngestResponse> {
    let tenant_id = Uuid::parse_str(&tenant).map_err(|_| AppError::UnknownTenant)?;
    let platform = Platform::from_str(&platform).map_err(|()| AppError::MalformedPayload("unknown platform".into()))?;

    crate::signature::verify(&headers, &body, &state.config.app_secret, state.config.signature_check_disabled)?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::MalformedPayload(format!("request body is not valid JSON: {e}")))?;

    let events = extract_raw_events(platform, &payload)?;

    let mut queued = 0;
    for raw_event in events {
        let Some((sender_id, recipient_id, event_ts)) = event_indexing_fields(&raw_event) else {
            continue;
        };

        let new_event = build_new_queued_event(tenant_id, platform, sender_id, recipient_id, raw_event, event_ts);
        state.store.enqueue_with_trace(new_event).await?;
        queued += 1;
    }

    Ok(IngestResponse {
        status: "ok",
        queued,
        processed: 0,
    })
}

/// Splits a provider payload into one raw event object per inbound
/// message, matching what [`crate::normalize`] expects to receive later.
fn extract_raw_events(platform: Platform, payload: &Value) -> AppResult<Vec<Value>> {
    let mut events = Vec::new();

    match platform {
        Platform::Page | Platform::Any => {
            let entries = payload.get("entry").and_then(Value::as_array);
            if let Some(entries) = entries {
                for entry in entries {
                    if let Some(messaging) = entry.get("messaging").and_then(Value::as_array) {
                        events.extend(messaging.iter().cloned());
                    }
                }
            }
        }
        Platform::Photo => {
            let entries = payload.get("entry").and_then(Value::as_array);
            if let Some(entries) = entries {
                for entry in entries {
                    if let Some(changes) = entry.get("changes").and_then(Value::as_array) {
                        for change in changes {
                            if change.get("field").and_then(Value::as_str) == Some("messages") {
                                if let Some(value) = change.get("value") {
                                    events.push(value.clone());
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    Ok(events)
}

/// Pulls the fields the queue needs for indexing out of a raw event,
/// without fully normalizing it (normalization happens in the worker).
fn event_indexing_fields(raw_event: &Value) -> Option<(String, String, chrono::DateTime<Utc>)> {
    let sender_id = raw_event.pointer("/sender/id").and_then(Value::as_str)?.to_string();
    let recipient_id = raw_event.pointer("/recipient/id").and_then(Value::as_str)?.to_string();

    let event_ts = raw_event
        .get("timestamp")
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .or_else(|| {
            raw_event
                .pointer("/messages/0/timestamp")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        })
        .unwrap_or_else(Utc::now);

    Some((sender_id, recipient_id, event_ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_page_events_from_entry_messaging() {
        let payload = json!({
            "object": "page",
            "entry": [{"messaging": [
                {"sender": {"id": "P1"}, "recipient": {"id": "R1"}, "timestamp": 1, "message": {"text": "hi"}}
            ]}]
        });
        let events = extract_raw_events(Platform::Page, &payload).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn extract_photo_events_from_changes_value() {
        let payload = json!({
            "entry": [{"changes": [{"field": "messages", "value": {"sender": {"id": "P1"}, "recipient": {"id": "R1"}, "messages": []}}]}]
        });
        let events = extract_raw_events(Platform::Photo, &payload).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn photo_changes_with_other_field_are_ignored() {
        let payload = json!({
            "entry": [{"changes": [{"field": "other", "value": {}}]}]
        });
        let events = extract_raw_events(Platform::Photo, &payload).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn indexing_fields_extracts_sender_and_recipient() {
        let event = json!({"sender": {"id": "P1"}, "recipient": {"id": "R1"}, "timestamp": 1_700_000_000_000_i64});
        let (sender, recipient, _ts) = event_indexing_fields(&event).unwrap();
        assert_eq!(sender, "P1");
        assert_eq!(recipient, "R1");
    }

    #[test]
    fn indexing_fields_returns_none_without_sender() {
        let event = json!({"recipient": {"id": "R1"}});
        assert!(event_indexing_fields(&event).is_none());
    }
}
