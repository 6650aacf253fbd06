//! Channel adapter traits.

use async_trait::async_trait;
use http::HeaderMap;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Signature missing or invalid.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Sender not on the configured whitelist.
    #[error("sender not authorized: {0}")]
    Forbidden(String),

    /// Payload did not parse as this channel's event format.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Outbound delivery to the channel API failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Channel is not configured for this operation.
    #[error("channel not ready: {0}")]
    NotReady(String),
}

impl ChannelError {
    /// Machine-readable reason code for rejection logs and responses.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Auth(_) => "AuthenticationError",
            Self::Forbidden(_) => "AuthorizationError",
            Self::InvalidPayload(_) => "ParseError",
            Self::SendFailed(_) | Self::NotReady(_) => "SendFailure",
        }
    }
}

/// Outcome of authenticating an inbound webhook request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A verified, whitelisted message event.
    Message { sender: String, text: String },
    /// A URL ownership-verification handshake; echo the value verbatim.
    Challenge(String),
    /// A valid but irrelevant event (bot echo, non-text payload).
    Ignored,
}

/// One messaging platform: verifies inbound webhooks and delivers
/// outbound text.
///
/// `authenticate` is synchronous and side-effect free so forged requests
/// are rejected before any store or network activity.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Channel name as stored on session records.
    fn name(&self) -> &'static str;

    /// Verify an inbound webhook request and extract its message event.
    ///
    /// Verification covers the raw body bytes exactly as received; the
    /// whitelist check happens here too, so a `Message` result is fully
    /// authenticated and authorized.
    fn authenticate(&self, headers: &HeaderMap, body: &[u8]) -> ChannelResult<Inbound>;

    /// Send `text` to the channel-specific receiver address.
    async fn send(&self, receiver: &str, text: &str) -> ChannelResult<()>;
}

/// Whitelist check shared by all adapters.
///
/// An empty whitelist authorizes every sender; restricting access is the
/// operator's explicit opt-in via `allowed_users`.
pub fn is_sender_allowed(allowed: &[String], sender: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|u| u == sender)
}

/// Constant-time equality for short secrets carried in headers.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_whitelist_authorizes_everyone() {
        assert!(is_sender_allowed(&[], "anyone"));
    }

    #[test]
    fn whitelist_filters_senders() {
        let allowed = vec!["U111".to_string(), "U222".to_string()];
        assert!(is_sender_allowed(&allowed, "U111"));
        assert!(!is_sender_allowed(&allowed, "U333"));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secre"));
    }

    #[test]
    fn error_reasons() {
        assert_eq!(ChannelError::Auth("x".into()).reason(), "AuthenticationError");
        assert_eq!(
            ChannelError::Forbidden("x".into()).reason(),
            "AuthorizationError"
        );
    }
}
