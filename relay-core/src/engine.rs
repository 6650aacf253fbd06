//! Relay orchestrator.
//!
//! Composes the parser, session store and injector into the per-event
//! pipeline. Every failure is resolved locally into a [`RelayAck`]; the
//! calling channel adapter renders the acknowledgment for humans and never
//! sees a raw engine error.

use crate::error::{RelayError, RelayResult};
use crate::inject::CommandInjector;
use crate::parser;
use crate::session::{SessionRecord, SessionStatus};
use crate::store::{SessionStore, UsageOutcome};
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;

/// Structured result returned to the channel adapter for an inbound event.
#[derive(Debug, Clone, Serialize)]
pub struct RelayAck {
    pub ok: bool,
    /// Machine-readable reason code, present on rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Short human-readable text for the channel to render.
    pub message: String,
}

impl RelayAck {
    /// Acknowledge a delivered command.
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            reason: None,
            message: message.into(),
        }
    }

    /// Resolve an engine failure into a rejection acknowledgment.
    pub fn rejected(err: &RelayError) -> Self {
        Self {
            ok: false,
            reason: Some(err.reason().to_string()),
            message: err.user_message(),
        }
    }
}

/// The command relay engine.
///
/// Owns session lifecycle and command delivery; channel adapters call
/// [`create_session`](Self::create_session) when sending a notification and
/// [`handle_command`](Self::handle_command) for each authenticated inbound
/// message.
#[derive(Clone)]
pub struct RelayEngine {
    store: SessionStore,
    injector: Arc<dyn CommandInjector>,
    max_commands: u32,
    session_ttl: Duration,
}

impl RelayEngine {
    pub fn new(
        store: SessionStore,
        injector: Arc<dyn CommandInjector>,
        max_commands: u32,
        session_ttl: Duration,
    ) -> Self {
        Self {
            store,
            injector,
            max_commands,
            session_ttl,
        }
    }

    /// Read access to the session store for status/debug surfaces.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Allocate a session for an outbound notification.
    ///
    /// A store failure here must abort the notification: the adapter may
    /// not advertise a token that was never durably stored. If the
    /// notification send itself fails afterwards, the adapter rolls the
    /// session back via [`discard_session`](Self::discard_session).
    pub fn create_session(
        &self,
        channel: &str,
        receiver_identity: &str,
        terminal_target: &str,
    ) -> RelayResult<SessionRecord> {
        let record = self.store.create(
            channel,
            receiver_identity,
            terminal_target,
            self.max_commands,
            self.session_ttl,
        )?;
        tracing::info!(
            channel = %channel,
            receiver = %receiver_identity,
            target = %terminal_target,
            token = %record.token,
            "session created"
        );
        Ok(record)
    }

    /// Roll back a session whose notification was never delivered.
    pub fn discard_session(&self, token: &str) -> RelayResult<bool> {
        self.store.remove(token)
    }

    /// Handle an authenticated inbound message.
    ///
    /// The channel adapter has already verified the request signature and
    /// the sender whitelist; `sender` is the authenticated sender identity.
    pub async fn handle_command(&self, channel: &str, sender: &str, text: &str) -> RelayAck {
        let (record, command) = match self.resolve(channel, sender, text) {
            Ok(resolved) => resolved,
            Err(err) => return self.reject(channel, sender, err),
        };

        let updated = match self.store.record_usage(&record.token) {
            Ok(UsageOutcome::Updated(updated)) => updated,
            Ok(UsageOutcome::NotFound) => {
                return self.reject(channel, sender, RelayError::SessionNotFound)
            }
            Ok(UsageOutcome::BudgetExceeded) => {
                return self.reject(channel, sender, RelayError::BudgetExceeded)
            }
            Err(err) => return self.reject(channel, sender, err),
        };

        if let Err(err) = self
            .injector
            .inject(&updated.terminal_target, &command)
            .await
        {
            // No automatic retry; the channel adapter decides what to do
            // with a failure acknowledgment.
            return self.reject(channel, sender, RelayError::Injection(err));
        }

        if updated.status == SessionStatus::Exhausted {
            tracing::info!(token = %updated.token, "session budget exhausted");
        }

        tracing::info!(
            channel = %channel,
            sender = %sender,
            token = %updated.token,
            target = %updated.terminal_target,
            used = updated.command_count,
            budget = updated.max_commands,
            "command injected"
        );

        RelayAck::accepted(format!(
            "command sent to {} ({}/{} commands used)",
            updated.terminal_target, updated.command_count, updated.max_commands
        ))
    }

    /// Resolve inbound text to a live session and command string.
    ///
    /// Explicit-token replies authenticate by token possession. Replies
    /// without a recognizable token fall back to the sender's most recent
    /// active session on this channel; that reduced-trust path only ever
    /// matches records whose receiver identity equals the sender.
    fn resolve(
        &self,
        channel: &str,
        sender: &str,
        text: &str,
    ) -> RelayResult<(SessionRecord, String)> {
        if let Some(parsed) = parser::parse(text) {
            let record = self
                .store
                .lookup(&parsed.token)?
                .ok_or(RelayError::SessionNotFound)?;
            if record.channel != channel {
                // A token leaked across channels is not honored.
                tracing::warn!(
                    token = %parsed.token,
                    expected = %record.channel,
                    got = %channel,
                    "token presented on the wrong channel"
                );
                return Err(RelayError::SessionNotFound);
            }
            return Ok((record, parsed.command));
        }

        let command = text.trim();
        if command.is_empty() {
            return Err(RelayError::Parse);
        }
        let record = self
            .store
            .find_active_for_receiver(channel, sender)?
            .ok_or(RelayError::Parse)?;
        tracing::debug!(
            channel = %channel,
            sender = %sender,
            token = %record.token,
            "token-less reply matched sender's active session"
        );
        Ok((record, command.to_string()))
    }

    fn reject(&self, channel: &str, sender: &str, err: RelayError) -> RelayAck {
        tracing::warn!(
            channel = %channel,
            sender = %sender,
            reason = err.reason(),
            error = %err,
            "inbound command rejected"
        );
        RelayAck::rejected(&err)
    }
}
