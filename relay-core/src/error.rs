//! Error taxonomy for the relay engine.
//!
//! Engine failures are resolved locally into an acknowledgment by the
//! orchestrator; nothing here crosses the `handle_command` boundary as a
//! raw error except through [`RelayAck`](crate::engine::RelayAck).

use crate::inject::InjectError;
use thiserror::Error;

/// Result type for relay engine operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Relay engine error type.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Bad or missing webhook signature.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Sender not on the channel whitelist.
    #[error("Sender not authorized: {0}")]
    Authorization(String),

    /// No recognizable command syntax and no fallback session.
    #[error("No recognizable command in message")]
    Parse,

    /// Unknown or expired session token.
    #[error("Unknown or expired session token")]
    SessionNotFound,

    /// Command quota for the session is spent.
    #[error("Command budget exhausted")]
    BudgetExceeded,

    /// Target terminal session unreachable or delivery timed out.
    #[error("Injection failed: {0}")]
    Injection(#[from] InjectError),

    /// Persistence failure on create/lookup/update.
    #[error("Session store error: {0}")]
    Store(String),
}

impl RelayError {
    /// Short machine-readable reason code carried in acknowledgments.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AuthenticationError",
            Self::Authorization(_) => "AuthorizationError",
            Self::Parse => "ParseError",
            Self::SessionNotFound => "SessionNotFound",
            Self::BudgetExceeded => "BudgetExceeded",
            Self::Injection(_) => "InjectionFailure",
            Self::Store(_) => "StoreIOError",
        }
    }

    /// Short human-readable reason surfaced through the channel.
    ///
    /// Injection failures are worded so the user knows to retry rather
    /// than re-authenticate.
    pub fn user_message(&self) -> String {
        match self {
            Self::Authentication(_) => "request could not be authenticated".into(),
            Self::Authorization(_) => "you are not authorized to command this session".into(),
            Self::Parse => {
                "no command recognized; reply with `/cmd <TOKEN> <command>`".into()
            }
            Self::SessionNotFound => "invalid or expired session token".into(),
            Self::BudgetExceeded => "command limit reached for this session".into(),
            Self::Injection(e) => format!("command not delivered ({e}); please retry"),
            Self::Store(_) => "internal error, command not delivered".into(),
        }
    }
}

impl From<rusqlite::Error> for RelayError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_match_taxonomy() {
        assert_eq!(RelayError::Parse.reason(), "ParseError");
        assert_eq!(RelayError::SessionNotFound.reason(), "SessionNotFound");
        assert_eq!(RelayError::BudgetExceeded.reason(), "BudgetExceeded");
        assert_eq!(RelayError::Store("x".into()).reason(), "StoreIOError");
    }

    #[test]
    fn injection_message_tells_user_to_retry() {
        let err = RelayError::Injection(InjectError::Transport("tmux died".into()));
        assert!(err.user_message().contains("retry"));
        assert_eq!(err.reason(), "InjectionFailure");
    }
}
