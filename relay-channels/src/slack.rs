//! Slack channel adapter (Events API webhook + Web API send).

use crate::traits::{is_sender_allowed, ChannelAdapter, ChannelError, ChannelResult, Inbound};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use relay_common::config::SlackConfig;
use reqwest::Client;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted skew on X-Slack-Request-Timestamp, in seconds.
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

pub struct SlackAdapter {
    bot_token: Option<String>,
    signing_secret: Option<String>,
    allowed_users: Vec<String>,
    allow_unverified: bool,
    client: Client,
}

impl SlackAdapter {
    pub fn new(config: &SlackConfig) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            signing_secret: config.signing_secret.clone(),
            allowed_users: config.allowed_users.clone(),
            allow_unverified: config.allow_unverified,
            client: Client::new(),
        }
    }

    /// Verify the v0 request signature.
    ///
    /// Slack signs `v0:{timestamp}:{body}` with the signing secret and
    /// sends the hex digest as `X-Slack-Signature: v0=<hex>`. Stale
    /// timestamps are rejected to close the replay window.
    fn verify_signature(
        secret: &str,
        timestamp: &str,
        signature_header: &str,
        body: &[u8],
    ) -> bool {
        let Ok(ts) = timestamp.parse::<i64>() else {
            return false;
        };
        if (chrono::Utc::now().timestamp() - ts).abs() > TIMESTAMP_TOLERANCE_SECS {
            return false;
        }

        let Some(hex_sig) = signature_header.strip_prefix("v0=") else {
            return false;
        };
        let Ok(expected) = hex::decode(hex_sig) else {
            return false;
        };

        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(format!("v0:{timestamp}:").as_bytes());
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }

    fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
        headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[async_trait]
impl ChannelAdapter for SlackAdapter {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn authenticate(&self, headers: &HeaderMap, body: &[u8]) -> ChannelResult<Inbound> {
        if let Some(secret) = &self.signing_secret {
            let timestamp = Self::header(headers, "x-slack-request-timestamp")
                .ok_or_else(|| ChannelError::Auth("missing timestamp header".into()))?;
            let signature = Self::header(headers, "x-slack-signature")
                .ok_or_else(|| ChannelError::Auth("missing signature header".into()))?;
            if !Self::verify_signature(secret, timestamp, signature, body) {
                return Err(ChannelError::Auth("signature mismatch".into()));
            }
        } else if !self.allow_unverified {
            return Err(ChannelError::Auth("no signing secret configured".into()));
        }

        let payload: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ChannelError::InvalidPayload(e.to_string()))?;

        // URL ownership verification happens before event delivery and is
        // answered with the challenge verbatim.
        if payload.get("type").and_then(|t| t.as_str()) == Some("url_verification") {
            let challenge = payload
                .get("challenge")
                .and_then(|c| c.as_str())
                .ok_or_else(|| ChannelError::InvalidPayload("missing challenge".into()))?;
            return Ok(Inbound::Challenge(challenge.to_string()));
        }

        let Some(event) = payload.get("event") else {
            return Ok(Inbound::Ignored);
        };
        if event.get("type").and_then(|t| t.as_str()) != Some("message") {
            return Ok(Inbound::Ignored);
        }
        // Bot echoes and message edits carry bot_id/subtype; relaying them
        // would loop our own acknowledgments back into the engine.
        if event.get("bot_id").is_some() || event.get("subtype").is_some() {
            return Ok(Inbound::Ignored);
        }

        let sender = event
            .get("user")
            .and_then(|u| u.as_str())
            .ok_or_else(|| ChannelError::InvalidPayload("message without user".into()))?;
        let text = event.get("text").and_then(|t| t.as_str()).unwrap_or("");
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
        let token = self
            .bot_token
            .as_ref()
            .ok_or_else(|| ChannelError::NotReady("slack bot_token not configured".into()))?;

        let body = serde_json::json!({
            "channel": receiver,
            "text": text,
        });

        let resp = self
            .client
            .post("https://slack.com/api/chat.postMessage")
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(format!("slack send error: {e}")))?;

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::SendFailed(format!("slack response parse: {e}")))?;

        if !data.get("ok").and_then(|o| o.as_bool()).unwrap_or(false) {
            let error = data
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown");
            return Err(ChannelError::SendFailed(format!("slack send failed: {error}")));
        }

        tracing::debug!(receiver = %receiver, "slack message sent");
        Ok(())
    }
}
