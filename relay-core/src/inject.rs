//! Command delivery into the terminal multiplexer.
//!
//! The production implementation drives `tmux`: an existence check on the
//! target session, then the command text as a single literal keystroke
//! payload followed by a separate Enter. The `-l` flag keeps tmux from
//! interpreting key names inside the payload, so the relay's own control
//! characters never get re-interpreted.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Command injection error.
#[derive(Debug, Error)]
pub enum InjectError {
    /// No terminal session with the given name.
    #[error("terminal session '{0}' not found")]
    TargetNotFound(String),

    /// Delivery did not complete within the configured timeout.
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    /// The multiplexer invocation itself failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Delivers a validated command into the terminal session bound to a token.
///
/// Synchronous from the orchestrator's perspective: the call returns a
/// definitive success/failure so the channel can be acknowledged truthfully.
#[async_trait]
pub trait CommandInjector: Send + Sync {
    /// Inject `command` into the multiplexer session `target`.
    async fn inject(&self, target: &str, command: &str) -> Result<(), InjectError>;
}

/// tmux-backed injector.
pub struct TmuxInjector {
    tmux_bin: String,
    timeout: Duration,
}

impl TmuxInjector {
    /// Create an injector with the given delivery timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            tmux_bin: "tmux".to_string(),
            timeout,
        }
    }

    /// Override the tmux binary path (tests, unusual installs).
    pub fn with_binary(mut self, bin: impl Into<String>) -> Self {
        self.tmux_bin = bin.into();
        self
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, InjectError> {
        let fut = Command::new(&self.tmux_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(InjectError::Transport(format!("spawn tmux: {e}"))),
            Err(_) => Err(InjectError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl CommandInjector for TmuxInjector {
    async fn inject(&self, target: &str, command: &str) -> Result<(), InjectError> {
        let exists = self.run(&["has-session", "-t", target]).await?;
        if !exists.status.success() {
            return Err(InjectError::TargetNotFound(target.to_string()));
        }

        // Literal payload first, Enter as its own key event. `--` stops
        // option parsing so commands starting with '-' survive.
        let typed = self
            .run(&["send-keys", "-t", target, "-l", "--", command])
            .await?;
        if !typed.status.success() {
            return Err(InjectError::Transport(
                String::from_utf8_lossy(&typed.stderr).trim().to_string(),
            ));
        }

        let entered = self.run(&["send-keys", "-t", target, "Enter"]).await?;
        if !entered.status.success() {
            return Err(InjectError::Transport(
                String::from_utf8_lossy(&entered.stderr).trim().to_string(),
            ));
        }

        tracing::debug!(target = %target, "command injected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Driving a real tmux server is out of scope for unit tests; a missing
    // binary exercises the transport failure path deterministically.
    #[tokio::test]
    async fn missing_binary_is_transport_error() {
        let injector =
            TmuxInjector::new(Duration::from_secs(2)).with_binary("/nonexistent/tmux-bin");
        let err = injector.inject("term-1", "ls").await.unwrap_err();
        assert!(matches!(err, InjectError::Transport(_)));
    }

    #[tokio::test]
    async fn false_binary_reports_target_not_found() {
        // `false` exits non-zero for has-session, same as tmux for an
        // unknown target.
        let injector = TmuxInjector::new(Duration::from_secs(2)).with_binary("false");
        let err = injector.inject("term-1", "ls").await.unwrap_err();
        assert!(matches!(err, InjectError::TargetNotFound(_)));
    }

    #[test]
    fn errors_render_reasons() {
        assert!(InjectError::TargetNotFound("t".into())
            .to_string()
            .contains("not found"));
        assert!(InjectError::Timeout(Duration::from_secs(5))
            .to_string()
            .contains("timed out"));
    }
}
