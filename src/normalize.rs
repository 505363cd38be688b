//! Message normalization across the page-messaging and photo-sharing
//! webhook payload variants.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Postback,
    QuickReply,
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickReply {
    pub title: String,
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

/// Canonical inbound message, independent of which platform variant it
/// arrived as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub attachments: Vec<Attachment>,
    #[serde(rename = "quickReplies")]
    pub quick_replies: Vec<QuickReply>,
    pub metadata: NormalizedMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMetadata {
    pub sender_id: String,
    pub recipient_id: String,
    pub timestamp_ms: i64,
    pub provider_message_id: Option<String>,
}

/// Result of normalizing a single provider event. `None` means the event
/// should be silently dropped (e.g. a page-messaging echo).
pub type NormalizeResult = Result<Option<NormalizedMessage>, NormalizeError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum NormalizeError {
    #[error("payload did not match the expected shape for platform {0:?}: {1}")]
    UnrecognizedShape(Platform, String),
}

/// Normalize one page-messaging `messaging` array entry.
///
/// Echoes (`message.is_echo == true`) are dropped.
pub fn normalize_page_event(event: &Value) -> NormalizeResult {
    let sender_id = event
        .pointer("/sender/id")
        .and_then(Value::as_str)
        .ok_or_else(|| NormalizeError::UnrecognizedShape(Platform::Page, "missing sender.id".into()))?
        .to_string();
    let recipient_id = event
        .pointer("/recipient/id")
        .and_then(Value::as_str)
        .ok_or_else(|| NormalizeError::UnrecognizedShape(Platform::Page, "missing recipient.id".into()))?
        .to_string();
    let timestamp_ms = event.get("timestamp").and_then(Value::as_i64).unwrap_or(0);

    if let Some(message) = event.get("message") {
        if message.get("is_echo").and_then(Value::as_bool) == Some(true) {
            return Ok(None);
        }

        let provider_message_id = message.get("mid").and_then(Value::as_str).map(str::to_string);
        let attachments = extract_attachments(message.get("attachments"));
        let quick_reply_payload = message.pointer("/quick_reply/payload").and_then(Value::as_str);

        let metadata = NormalizedMetadata {
            sender_id,
            recipient_id,
            timestamp_ms,
            provider_message_id,
        };

        if let Some(payload) = quick_reply_payload {
            return Ok(Some(NormalizedMessage {
                text: payload.to_string(),
                kind: MessageType::QuickReply,
                attachments,
                quick_replies: vec![],
                metadata,
            }));
        }

        let text = message.get("text").and_then(Value::as_str).map(str::to_string);
        return Ok(Some(build_message(text, attachments, Platform::Page, metadata)));
    }

    if let Some(postback) = event.get("postback") {
        let text = postback
            .get("payload")
            .and_then(Value::as_str)
            .or_else(|| postback.get("title").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();

        return Ok(Some(NormalizedMessage {
            text,
            kind: MessageType::Postback,
            attachments: vec![],
            quick_replies: vec![],
            metadata: NormalizedMetadata {
                sender_id,
                recipient_id,
                timestamp_ms,
                provider_message_id: None,
            },
        }));
    }

    Err(NormalizeError::UnrecognizedShape(
        Platform::Page,
        "event has neither message nor postback".into(),
    ))
}

/// Normalize one photo-sharing `changes[].value` envelope (`field == "messages"`).
pub fn normalize_photo_event(value: &Value) -> NormalizeResult {
    let sender_id = value
        .pointer("/sender/id")
        .and_then(Value::as_str)
        .ok_or_else(|| NormalizeError::UnrecognizedShape(Platform::Photo, "missing sender.id".into()))?
        .to_string();
    let recipient_id = value
        .pointer("/recipient/id")
        .and_then(Value::as_str)
        .ok_or_else(|| NormalizeError::UnrecognizedShape(Platform::Photo, "missing recipient.id".into()))?
        .to_string();

    let message = value
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .ok_or_else(|| NormalizeError::UnrecognizedShape(Platform::Photo, "missing messages[0]".into()))?;

    let timestamp_ms = message
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<i64>().ok())
        .map(|secs| secs * 1000)
        .unwrap_or(0);
    let provider_message_id = message.get("id").and_then(Value::as_str).map(str::to_string);

    let attachments = extract_attachments(message.get("attachments"));
    let text = message
        .pointer("/message/text/body")
        .or_else(|| message.pointer("/text/body"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let metadata = NormalizedMetadata {
        sender_id,
        recipient_id,
        timestamp_ms,
        provider_message_id,
    };

    Ok(Some(build_message(text, attachments, Platform::Photo, metadata)))
}

fn build_message(
    text: Option<String>,
    attachments: Vec<Attachment>,
    platform: Platform,
    metadata: NormalizedMetadata,
) -> NormalizedMessage {
    match text {
        Some(text) if !text.is_empty() => NormalizedMessage {
            text,
            kind: MessageType::Text,
            attachments,
            quick_replies: vec![],
            metadata,
        },
        _ => {
            if let Some(first) = attachments.first() {
                NormalizedMessage {
                    text: first.description.clone(),
                    kind: MessageType::Text,
                    attachments,
                    quick_replies: vec![],
                    metadata,
                }
            } else {
                NormalizedMessage {
                    text: format!("[Unsupported {} message type]", platform.as_str()),
                    kind: MessageType::Unsupported,
                    attachments,
                    quick_replies: vec![],
                    metadata,
                }
            }
        }
    }
}

fn extract_attachments(attachments: Option<&Value>) -> Vec<Attachment> {
    let Some(attachments) = attachments.and_then(Value::as_array) else {
        return vec![];
    };

    attachments
        .iter()
        .map(|a| {
            let provider_type = a.get("type").and_then(Value::as_str).unwrap_or("unknown");
            match provider_type {
                "image" | "audio" | "video" | "file" => {
                    let url = a
                        .pointer("/payload/url")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    Attachment {
                        kind: provider_type.to_string(),
                        description: format!("[{}: {}]", capitalize(provider_type), url),
                    }
                }
                "location" => {
                    let lat = a.pointer("/payload/coordinates/lat").and_then(Value::as_f64).unwrap_or(0.0);
                    let long = a.pointer("/payload/coordinates/long").and_then(Value::as_f64).unwrap_or(0.0);
                    Attachment {
                        kind: "location".to_string(),
                        description: format!("[Location: {lat},{long}]"),
                    }
                }
                other => Attachment {
                    kind: "unsupported".to_string(),
                    description: format!("[Unsupported attachment: {other}]"),
                },
            }
        })
        .collect()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_text_message_normalizes() {
        let event = json!({
            "sender": {"id": "P1"},
            "recipient": {"id": "R1"},
            "timestamp": 1_700_000_000_000_i64,
            "message": {"mid": "m1", "text": "hello"}
        });

        let result = normalize_page_event(&event).unwrap().unwrap();
        assert_eq!(result.text, "hello");
        assert_eq!(result.kind, MessageType::Text);
        assert_eq!(result.metadata.sender_id, "P1");
        assert_eq!(result.metadata.provider_message_id.as_deref(), Some("m1"));
    }

    #[test]
    fn page_echo_is_dropped() {
        let event = json!({
            "sender": {"id": "P1"},
            "recipient": {"id": "R1"},
            "timestamp": 1,
            "message": {"mid": "m1", "text": "hello", "is_echo": true}
        });

        assert!(normalize_page_event(&event).unwrap().is_none());
    }

    #[test]
    fn page_postback_uses_payload() {
        let event = json!({
            "sender": {"id": "P1"},
            "recipient": {"id": "R1"},
            "timestamp": 1,
            "postback": {"payload": "GET_STARTED", "title": "Get Started"}
        });

        let result = normalize_page_event(&event).unwrap().unwrap();
        assert_eq!(result.text, "GET_STARTED");
        assert_eq!(result.kind, MessageType::Postback);
    }

    #[test]
    fn page_quick_reply_uses_payload() {
        let event = json!({
            "sender": {"id": "P1"},
            "recipient": {"id": "R1"},
            "timestamp": 1,
            "message": {"mid": "m1", "quick_reply": {"payload": "YES"}}
        });

        let result = normalize_page_event(&event).unwrap().unwrap();
        assert_eq!(result.text, "YES");
        assert_eq!(result.kind, MessageType::QuickReply);
    }

    #[test]
    fn page_image_attachment_without_text_uses_description() {
        let event = json!({
            "sender": {"id": "P1"},
            "recipient": {"id": "R1"},
            "timestamp": 1,
            "message": {
                "mid": "m1",
                "attachments": [{"type": "image", "payload": {"url": "https://img"}}]
            }
        });

        let result = normalize_page_event(&event).unwrap().unwrap();
        assert_eq!(result.text, "[Image: https://img]");
    }

    #[test]
    fn page_unsupported_message_falls_back() {
        let event = json!({
            "sender": {"id": "P1"},
            "recipient": {"id": "R1"},
            "timestamp": 1,
            "message": {"mid": "m1"}
        });

        let result = normalize_page_event(&event).unwrap().unwrap();
        assert_eq!(result.kind, MessageType::Unsupported);
        assert_eq!(result.text, "[Unsupported page message type]");
    }

    #[test]
    fn photo_text_message_normalizes() {
        let value = json!({
            "sender": {"id": "P1"},
            "recipient": {"id": "R1"},
            "messages": [{
                "id": "wamid.1",
                "timestamp": "1700000000",
                "message": {"text": {"body": "hi there"}}
            }]
        });

        let result = normalize_photo_event(&value).unwrap().unwrap();
        assert_eq!(result.text, "hi there");
        assert_eq!(result.metadata.timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn location_attachment_formats_coordinates() {
        let event = json!({
            "sender": {"id": "P1"},
            "recipient": {"id": "R1"},
            "timestamp": 1,
            "message": {
                "mid": "m1",
                "attachments": [{"type": "location", "payload": {"coordinates": {"lat": 1.5, "long": 2.5}}}]
            }
        });

        let result = normalize_page_event(&event).unwrap().unwrap();
        assert_eq!(result.text, "[Location: 1.5,2.5]");
    }

    #[test]
    fn normalizing_same_payload_twice_is_identical() {
        let event = json!({
            "sender": {"id": "P1"},
            "recipient": {"id": "R1"},
            "timestamp": 1,
            "message": {"mid": "m1", "text": "hello"}
        });

        let a = serde_json::to_string(&normalize_page_event(&event).unwrap()).unwrap();
        let b = serde_json::to_string(&normalize_page_event(&event).unwrap()).unwrap();
        assert_eq!(a, b);
    }
}
