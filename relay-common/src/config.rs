//! Configuration management for the relay services.
//!
//! All relay services share a unified configuration file at
//! `~/.termrelay/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Explicit config file values
//! 2. Environment variables (`RELAY_*` prefix, channel secrets)
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `RELAY_BIND` → network.bind
//! - `RELAY_PORT` → network.port
//! - `RELAY_DB_PATH` → relay.db_path
//! - `SLACK_BOT_TOKEN` / `SLACK_SIGNING_SECRET` → channels.slack.*
//! - `DINGTALK_APP_SECRET` → channels.dingtalk.app_secret
//! - `TELEGRAM_BOT_TOKEN` / `TELEGRAM_WEBHOOK_SECRET` → channels.telegram.*

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".termrelay"),
        |dirs| dirs.home_dir().join(".termrelay"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Network Configuration
// ============================================================================

/// Webhook listener network configuration.
///
/// Default bind is `127.0.0.1` (local only, behind a tunnel or reverse
/// proxy). Set to `0.0.0.0` to accept webhooks directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

const fn default_port() -> u16 {
    4500
}

// ============================================================================
// Observability Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Base log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Relay Engine Configuration
// ============================================================================

/// Session lifecycle settings for the relay engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Session database path. Defaults to `~/.termrelay/sessions.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Commands a single token may authorize before exhaustion.
    #[serde(default = "default_max_commands")]
    pub max_commands: u32,

    /// Hard session TTL in hours.
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,

    /// Timeout for delivering a command into the terminal session.
    #[serde(default = "default_inject_timeout_secs")]
    pub inject_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            max_commands: default_max_commands(),
            session_ttl_hours: default_session_ttl_hours(),
            inject_timeout_secs: default_inject_timeout_secs(),
        }
    }
}

impl RelayConfig {
    /// Resolve the session database path.
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| config_dir().join("sessions.db"))
    }
}

const fn default_max_commands() -> u32 {
    10
}

const fn default_session_ttl_hours() -> i64 {
    24
}

const fn default_inject_timeout_secs() -> u64 {
    5
}

// ============================================================================
// Channel Configuration
// ============================================================================

/// Slack channel configuration (Events API webhook + Web API send).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SlackConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Bot token (xoxb-...) for chat.postMessage.
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Signing secret for request signature verification.
    #[serde(default)]
    pub signing_secret: Option<String>,

    /// Sender whitelist (Slack user IDs). Empty means authorize-all:
    /// an explicit operator trust decision, not a safe default.
    #[serde(default)]
    pub allowed_users: Vec<String>,

    /// Accept unsigned webhooks. Must be set explicitly; the service
    /// refuses to start an enabled channel without a secret otherwise.
    #[serde(default)]
    pub allow_unverified: bool,
}

/// DingTalk outgoing-robot channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DingTalkConfig {
    #[serde(default)]
    pub enabled: bool,

    /// App secret used both for webhook signature verification and
    /// for signing robot webhook sends.
    #[serde(default)]
    pub app_secret: Option<String>,

    /// Fallback robot webhook URL for notifications when no session
    /// webhook is available.
    #[serde(default)]
    pub robot_webhook: Option<String>,

    /// Sender whitelist (staff IDs). Empty means authorize-all.
    #[serde(default)]
    pub allowed_users: Vec<String>,

    #[serde(default)]
    pub allow_unverified: bool,
}

/// Telegram bot channel configuration (webhook mode).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub bot_token: Option<String>,

    /// Secret token registered with setWebhook; Telegram echoes it in
    /// the X-Telegram-Bot-Api-Secret-Token header.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Sender whitelist (usernames or numeric IDs). Empty means authorize-all.
    #[serde(default)]
    pub allowed_users: Vec<String>,

    #[serde(default)]
    pub allow_unverified: bool,
}

/// Per-channel configuration blocks.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub slack: Option<SlackConfig>,

    #[serde(default)]
    pub dingtalk: Option<DingTalkConfig>,

    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

// ============================================================================
// Root Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl Config {
    /// Load configuration from the default path, applying environment
    /// overrides. A missing config file yields defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let mut config: Self = if path.exists() {
            let raw = fs::read_to_string(path)?;
            serde_json::from_str(&raw)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("RELAY_BIND") {
            self.network.bind = bind;
        }
        if let Ok(port) = std::env::var("RELAY_PORT") {
            if let Ok(port) = port.parse() {
                self.network.port = port;
            }
        }
        if let Ok(db_path) = std::env::var("RELAY_DB_PATH") {
            self.relay.db_path = Some(PathBuf::from(db_path));
        }

        if let Some(slack) = self.channels.slack.as_mut() {
            if let Ok(token) = std::env::var("SLACK_BOT_TOKEN") {
                slack.bot_token = Some(token);
            }
            if let Ok(secret) = std::env::var("SLACK_SIGNING_SECRET") {
                slack.signing_secret = Some(secret);
            }
        }
        if let Some(dingtalk) = self.channels.dingtalk.as_mut() {
            if let Ok(secret) = std::env::var("DINGTALK_APP_SECRET") {
                dingtalk.app_secret = Some(secret);
            }
        }
        if let Some(telegram) = self.channels.telegram.as_mut() {
            if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
                telegram.bot_token = Some(token);
            }
            if let Ok(secret) = std::env::var("TELEGRAM_WEBHOOK_SECRET") {
                telegram.webhook_secret = Some(secret);
            }
        }
    }

    /// Fail closed on channels enabled without verification material.
    ///
    /// An enabled webhook channel must carry its secret, or the operator
    /// must opt out explicitly with `allow_unverified: true`.
    fn validate(&self) -> Result<()> {
        if let Some(slack) = &self.channels.slack {
            if slack.enabled && slack.signing_secret.is_none() && !slack.allow_unverified {
                return Err(Error::Config(
                    "channels.slack: enabled without signing_secret (set allow_unverified to opt out)"
                        .into(),
                ));
            }
        }
        if let Some(dingtalk) = &self.channels.dingtalk {
            if dingtalk.enabled && dingtalk.app_secret.is_none() && !dingtalk.allow_unverified {
                return Err(Error::Config(
                    "channels.dingtalk: enabled without app_secret (set allow_unverified to opt out)"
                        .into(),
                ));
            }
        }
        if let Some(telegram) = &self.channels.telegram {
            if telegram.enabled && telegram.webhook_secret.is_none() && !telegram.allow_unverified {
                return Err(Error::Config(
                    "channels.telegram: enabled without webhook_secret (set allow_unverified to opt out)"
                        .into(),
                ));
            }
        }
        Ok(())
    }
}
