//! Telegram bot channel adapter (webhook mode).

use crate::traits::{
    constant_time_eq, is_sender_allowed, ChannelAdapter, ChannelError, ChannelResult, Inbound,
};
use async_trait::async_trait;
use http::HeaderMap;
use relay_common::config::TelegramConfig;
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Update {
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    from: Option<User>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    username: Option<String>,
    #[serde(default)]
    is_bot: bool,
}

pub struct TelegramAdapter {
    bot_token: Option<String>,
    webhook_secret: Option<String>,
    allowed_users: Vec<String>,
    allow_unverified: bool,
    client: Client,
}

impl TelegramAdapter {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            webhook_secret: config.webhook_secret.clone(),
            allowed_users: config.allowed_users.clone(),
            allow_unverified: config.allow_unverified,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn authenticate(&self, headers: &HeaderMap, body: &[u8]) -> ChannelResult<Inbound> {
        // Telegram echoes the secret registered with setWebhook; there is
        // no body signature, so header equality is the whole check.
        if let Some(secret) = &self.webhook_secret {
            let presented = headers
                .get("x-telegram-bot-api-secret-token")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| ChannelError::Auth("missing secret token header".into()))?;
            if !constant_time_eq(presented.as_bytes(), secret.as_bytes()) {
                return Err(ChannelError::Auth("secret token mismatch".into()));
            }
        } else if !self.allow_unverified {
            return Err(ChannelError::Auth("no webhook_secret configured".into()));
        }

        let update: Update = serde_json::from_slice(body)
            .map_err(|e| ChannelError::InvalidPayload(e.to_string()))?;

        let Some(message) = update.message else {
            return Ok(Inbound::Ignored);
        };
        let Some(text) = message.text.filter(|t| !t.trim().is_empty()) else {
            return Ok(Inbound::Ignored);
        };
        let Some(from) = message.from else {
            return Ok(Inbound::Ignored);
        };
        if from.is_bot {
            return Ok(Inbound::Ignored);
        }

        // Whitelist entries may be usernames or numeric IDs.
        let id = from.id.to_string();
        let authorized = is_sender_allowed(&self.allowed_users, &id)
            || from
                .username
                .as_deref()
                .is_some_and(|u| is_sender_allowed(&self.allowed_users, u));
        if !authorized {
            return Err(ChannelError::Forbidden(id));
        }

        // The chat ID doubles as the reply address, so token-less replies
        // in a private chat match the notification's receiver identity.
        Ok(Inbound::Message {
            sender: message.chat.id.to_string(),
            text: text.trim().to_string(),
        })
    }

    async fn send(&self, receiver: &str, text: &str) -> ChannelResult<()> {
        let token = self
            .bot_token
            .as_ref()
            .ok_or_else(|| ChannelError::NotReady("telegram bot_token not configured".into()))?;

        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let body = serde_json::json!({
            "chat_id": receiver,
            "text": text,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(format!("telegram send error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed(format!(
                "telegram send failed ({status}): {err}"
            )));
        }

        tracing::debug!(receiver = %receiver, "telegram message sent");
        Ok(())
    }
}
