//! Client for the conversational-AI runtime.
//!
//! `POST {base_url}/state/user/{tenant_id}/interact`, bearer-authenticated,
//! 15s timeout. The runtime replies with a list of tagged response items;
//! unrecognized variants are kept as `Unsupported` rather than failing the
//! whole call, since the runtime evolves independently of this bridge.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize)]
struct InteractRequest<'a> {
    participant_id: &'a str,
    message: &'a str,
    context: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct InteractResponse {
    items: Vec<AIResponseItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AIResponseItem {
    Text { text: String },
    Choice { text: String, choices: Vec<String> },
    Visual { url: String, caption: Option<String> },
    #[serde(rename = "set-variables")]
    SetVariables { variables: serde_json::Map<String, serde_json::Value> },
    #[serde(other)]
    Unsupported,
}

pub struct AiClient {
    http: Client,
    base_url: String,
}

impl AiClient {
    #[must_use]
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with a static TLS backend");
        Self { http, base_url }
    }

    /// Send the participant's message to the runtime and get back the
    /// response items to render. `api_key` is the tenant's override if one
    /// exists, otherwise the operator-wide default.
    pub async fn interact(
        &self,
        tenant_id: Uuid,
        api_key: &str,
        participant_id: &str,
        message: &str,
        context: serde_json::Value,
    ) -> Result<Vec<AIResponseItem>, AppError> {
        let url = format!("{}/state/user/{tenant_id}/interact", self.base_url);

        let response = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .json(&InteractRequest {
                participant_id,
                message,
                context,
            })
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            let body: InteractResponse = response.json().await.map_err(|e| {
                AppError::PermanentUpstream(format!("AI runtime returned an unparseable body: {e}"))
            })?;
            Ok(body.items)
        } else if crate::retry::is_transient_status(status.as_u16()) {
            Err(AppError::TransientUpstream(format!("AI runtime returned {status}")))
        } else {
            Err(AppError::PermanentUpstream(format!("AI runtime returned {status}")))
        }
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Timeout
    } else if err.is_connect() {
        AppError::TransientNetwork(err.to_string())
    } else if let Some(status) = err.status() {
        if crate::retry::is_transient_status(status.as_u16()) {
            AppError::TransientUpstream(err.to_string())
        } else {
            AppError::PermanentUpstream(err.to_string())
        }
    } else {
        AppError::TransientNetwork(err.to_string())
    }
}

/// Extracts `[[SET:key=value]]` markers embedded in AI text output, in
/// addition to explicit `set-variables` items.
#[must_use]
pub fn extract_inline_markers(text: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("[[SET:") {
        let after = &rest[start + "[[SET:".len()..];
        let Some(end) = after.find("]]") else { break };
        let body = &after[..end];
        if let Some((key, value)) = body.split_once('=') {
            pairs.push((key.trim().to_string(), value.trim().to_string()));
        }
        rest = &after[end + 2..];
    }
    pairs
}

/// Removes `[[SET:key=value]]` spans from AI text output so control syntax
/// never reaches a persisted message or the end user. Markers are extracted
/// into context, not rendered.
#[must_use]
pub fn strip_inline_markers(text: &str) -> String {
    let mut cleaned = String::new();
    let mut rest = text;
    loop {
        match rest.find("[[SET:") {
            Some(start) => {
                cleaned.push_str(&rest[..start]);
                let after = &rest[start + "[[SET:".len()..];
                match after.find("]]") {
                    Some(end) => rest = &after[end + 2..],
                    None => {
                        cleaned.push_str(&rest[start..]);
                        break;
                    }
                }
            }
            None => {
                cleaned.push_str(rest);
                break;
            }
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[must_use]
pub fn is_rate_limited(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_marker() {
        let text = "Sure thing. [[SET:tier=gold]] Anything else?";
        let pairs = extract_inline_markers(text);
        assert_eq!(pairs, vec![("tier".to_string(), "gold".to_string())]);
    }

    #[test]
    fn extracts_multiple_markers() {
        let text = "[[SET:a=1]] middle [[SET:b=2]]";
        let pairs = extract_inline_markers(text);
        assert_eq!(
            pairs,
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn text_without_markers_yields_empty() {
        assert!(extract_inline_markers("just a plain reply").is_empty());
    }

    #[test]
    fn strip_removes_marker_spans() {
        let text = "Sure thing. [[SET:tier=gold]] Anything else?";
        assert_eq!(strip_inline_markers(text), "Sure thing. Anything else?");
    }

    #[test]
    fn strip_handles_marker_only_text() {
        assert_eq!(strip_inline_markers("[[SET:tier=gold]]"), "");
    }

    #[test]
    fn strip_leaves_plain_text_untouched() {
        assert_eq!(strip_inline_markers("just a plain reply"), "just a plain reply");
    }

    #[test]
    fn unsupported_variant_deserializes_without_error() {
        let json = serde_json::json!({"type": "carousel", "items": []});
        let item: AIResponseItem = serde_json::from_value(json).unwrap();
        assert!(matches!(item, AIResponseItem::Unsupported));
    }

    #[test]
    fn text_variant_roundtrips() {
        let item = AIResponseItem::Text { text: "hi".into() };
        let json = serde_json::to_value(&item).unwrap();
        let back: AIResponseItem = serde_json::from_value(json).unwrap();
        assert!(matches!(back, AIResponseItem::Text { text } if text == "hi"));
    }
}
