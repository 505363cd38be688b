//! Client for sending replies back through the provider's messaging API.
//! Page-messaging and photo-sharing each have their own endpoint shape;
//! both take a 10s timeout.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

use crate::error::AppError;
use crate::models::Platform;
use crate::normalize::{Attachment, QuickReply};

/// Provider-side limit on quick reply buttons per message.
pub const MAX_QUICK_REPLIES: usize = 13;

#[derive(Debug, Clone, Default)]
pub struct OutgoingReply {
    pub text: Option<String>,
    pub quick_replies: Vec<QuickReply>,
    pub attachment: Option<Attachment>,
}

impl OutgoingReply {
    /// Enforces the provider's quick-reply cap and single-attachment rule
    /// for the "format reply" stage.
    #[must_use]
    pub fn capped(mut self) -> Self {
        self.quick_replies.truncate(MAX_QUICK_REPLIES);
        self
    }
}

#[derive(Debug, Serialize)]
struct SendEnvelope<'a> {
    recipient: Recipient<'a>,
    message: MessagePayload<'a>,
    messaging_type: &'static str,
}

#[derive(Debug, Serialize)]
struct Recipient<'a> {
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    quick_replies: Vec<QuickReplyPayload<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachment: Option<AttachmentPayload<'a>>,
}

#[derive(Debug, Serialize)]
struct QuickReplyPayload<'a> {
    content_type: &'static str,
    title: &'a str,
    payload: &'a str,
}

#[derive(Debug, Serialize)]
struct AttachmentPayload<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: AttachmentPayloadBody<'a>,
}

#[derive(Debug, Serialize)]
struct AttachmentPayloadBody<'a> {
    url: &'a str,
}

pub struct ProviderClient {
    http: Client,
    graph_base_url: String,
}

impl ProviderClient {
    #[must_use]
    pub fn new(graph_base_url: String, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with a static TLS backend");
        Self { http, graph_base_url }
    }

    fn endpoint(&self, platform: Platform, external_id: &str, access_token: &str) -> String {
        match platform {
            Platform::Page | Platform::Any => {
                format!("{}/me/messages?access_token={}", self.graph_base_url, access_token)
            }
            Platform::Photo => format!(
                "{}/{}/messages?access_token={}",
                self.graph_base_url, external_id, access_token
            ),
        }
    }

    /// Send a reply to `recipient_id` acting as `external_id` (the tenant's
    /// page or account). Returns `Ok(())` on any 2xx; non-2xx is classified
    /// transient/permanent the same way as the AI runtime client.
    pub async fn send(
        &self,
        platform: Platform,
        external_id: &str,
        access_token: &str,
        recipient_id: &str,
        reply: &OutgoingReply,
    ) -> Result<(), AppError> {
        let url = self.endpoint(platform, external_id, access_token);

        let envelope = SendEnvelope {
            recipient: Recipient { id: recipient_id },
            message: MessagePayload {
                text: reply.text.as_deref(),
                quick_replies: reply
                    .quick_replies
                    .iter()
                    .map(|q| QuickReplyPayload {
                        content_type: "text",
                        title: &q.title,
                        payload: &q.payload,
                    })
                    .collect(),
                attachment: reply.attachment.as_ref().map(|a| AttachmentPayload {
                    kind: &a.kind,
                    payload: AttachmentPayloadBody { url: &a.description },
                }),
            },
            messaging_type: "RESPONSE",
        };

        let response = self.http.post(url).json(&envelope).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout
            } else if e.is_connect() {
                AppError::TransientNetwork(e.to_string())
            } else {
                AppError::TransientNetwork(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if crate::retry::is_transient_status(status.as_u16()) {
            Err(AppError::TransientUpstream(format!("provider send returned {status}")))
        } else {
            Err(AppError::PermanentUpstream(format!("provider send returned {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_endpoint_omits_account_segment() {
        let client = ProviderClient::new("https://graph.provider.com/v18.0".to_string(), Duration::from_secs(10));
        let url = client.endpoint(Platform::Page, "page-1", "tok");
        assert_eq!(url, "https://graph.provider.com/v18.0/me/messages?access_token=tok");
    }

    #[test]
    fn photo_endpoint_includes_account_segment() {
        let client = ProviderClient::new("https://graph.provider.com/v18.0".to_string(), Duration::from_secs(10));
        let url = client.endpoint(Platform::Photo, "acct-1", "tok");
        assert_eq!(url, "https://graph.provider.com/v18.0/acct-1/messages?access_token=tok");
    }

    #[test]
    fn capped_truncates_to_provider_limit() {
        let quick_replies = (0..20)
            .map(|i| QuickReply {
                title: format!("opt-{i}"),
                payload: format!("p{i}"),
            })
            .collect();
        let reply = OutgoingReply {
            text: Some("pick one".into()),
            quick_replies,
            attachment: None,
        }
        .capped();
        assert_eq!(reply.quick_replies.len(), MAX_QUICK_REPLIES);
    }
}
