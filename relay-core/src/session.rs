//! Session record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Live; commands may be relayed.
    Active,
    /// Command budget spent.
    Exhausted,
    /// Past its TTL.
    Expired,
}

impl SessionStatus {
    /// Database column representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Exhausted => "exhausted",
            Self::Expired => "expired",
        }
    }

    /// Parse the database column representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "exhausted" => Self::Exhausted,
            _ => Self::Expired,
        }
    }
}

/// One session per outbound notification: binds a token to the terminal
/// session it may later command.
///
/// The token is never re-bindable; `terminal_target` is fixed for the
/// record's entire lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    /// 8-character `[A-Z0-9]` token, unique among live records.
    pub token: String,
    /// Originating channel name ("slack", "dingtalk", "telegram").
    pub channel: String,
    /// Channel-specific sender address the notification went to.
    pub receiver_identity: String,
    /// Terminal multiplexer session commands are injected into.
    pub terminal_target: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Commands relayed so far; never exceeds `max_commands`.
    pub command_count: u32,
    pub max_commands: u32,
    pub status: SessionStatus,
}

impl SessionRecord {
    /// Whether the record is past its TTL at the given instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether commands may still be relayed through this record.
    pub fn is_executable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && !self.is_expired_at(now)
    }
}
