//! DingTalk outgoing-robot channel adapter.
//!
//! Inbound events come from an outgoing robot callback carrying
//! `timestamp` and `sign` headers; outbound notifications go through the
//! configured robot webhook URL.

use crate::traits::{is_sender_allowed, ChannelAdapter, ChannelError, ChannelResult, Inbound};
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use relay_common::config::DingTalkConfig;
use reqwest::Client;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted skew on the millisecond `timestamp` header. DingTalk
/// rejects callbacks older than one hour; so do we, since the signature
/// covers only the timestamp and a stale pair would authenticate any body.
const TIMESTAMP_TOLERANCE_MS: i64 = 3_600_000;

pub struct DingTalkAdapter {
    app_secret: Option<String>,
    robot_webhook: Option<String>,
    allowed_users: Vec<String>,
    allow_unverified: bool,
    client: Client,
}

impl DingTalkAdapter {
    pub fn new(config: &DingTalkConfig) -> Self {
        Self {
            app_secret: config.app_secret.clone(),
            robot_webhook: config.robot_webhook.clone(),
            allowed_users: config.allowed_users.clone(),
            allow_unverified: config.allow_unverified,
            client: Client::new(),
        }
    }

    /// Verify the outgoing-robot signature.
    ///
    /// DingTalk signs `{timestamp}\n{app_secret}` with the app secret and
    /// sends the base64 digest in the `sign` header. The timestamp is the
    /// only request-specific input, so staleness is checked here too.
    fn verify_signature(secret: &str, timestamp: &str, sign: &str) -> bool {
        let Ok(ts) = timestamp.parse::<i64>() else {
            return false;
        };
        if (chrono::Utc::now().timestamp_millis() - ts).abs() > TIMESTAMP_TOLERANCE_MS {
            return false;
        }

        let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(sign) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(format!("{timestamp}\n{secret}").as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
        headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[async_trait]
impl ChannelAdapter for DingTalkAdapter {
    fn name(&self) -> &'static str {
        "dingtalk"
    }

    fn authenticate(&self, headers: &HeaderMap, body: &[u8]) -> ChannelResult<Inbound> {
        if let Some(secret) = &self.app_secret {
            let timestamp = Self::header(headers, "timestamp")
                .ok_or_else(|| ChannelError::Auth("missing timestamp header".into()))?;
            let sign = Self::header(headers, "sign")
                .ok_or_else(|| ChannelError::Auth("missing sign header".into()))?;
            if !Self::verify_signature(secret, timestamp, sign) {
                return Err(ChannelError::Auth("signature mismatch".into()));
            }
        } else if !self.allow_unverified {
            return Err(ChannelError::Auth("no app_secret configured".into()));
        }

        let payload: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ChannelError::InvalidPayload(e.to_string()))?;

        if payload.get("msgtype").and_then(|t| t.as_str()) != Some("text") {
            return Ok(Inbound::Ignored);
        }

        let sender = payload
            .get("senderStaffId")
            .or_else(|| payload.get("senderId"))
            .and_then(|s| s.as_str())
            .ok_or_else(|| ChannelError::InvalidPayload("message without sender".into()))?;
        let text = payload
            .get("text")
            .and_then(|t| t.get("content"))
            .and_then(|c| c.as_str())
            .map(str::trim)
            .unwrap_or("");
        if text.is_empty() {
            return Ok(Inbound::Ignored);
        }

        if !is_sender_allowed(&self.allowed_users, sender) {
            return Err(ChannelError::Forbidden(sender.to_string()));
        }

        Ok(Inbound::Message {
            sender: sender.to_string(),
            text: text.to_string(),
        })
    }

    async fn send(&self, receiver: &str, text: &str) -> ChannelResult<()> {
        let webhook = self
            .robot_webhook
            .as_ref()
            .ok_or_else(|| ChannelError::NotReady("dingtalk robot_webhook not configured".into()))?;

        let message = serde_json::json!({
            "msgtype": "text",
            "text": { "content": text },
            "at": { "atUserIds": [receiver] },
        });

        let resp = self
            .client
            .post(webhook)
            .json(&message)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(format!("dingtalk send error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed(format!(
                "dingtalk webhook send failed ({status}): {err}"
            )));
        }

        tracing::debug!(receiver = %receiver, "dingtalk message sent");
        Ok(())
    }
}
