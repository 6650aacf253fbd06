//! Inbound command parsing.
//!
//! Two accepted surface syntaxes, keyword case-insensitive:
//!
//! ```text
//! /cmd <TOKEN> <command text>
//! Token <TOKEN> <command text>
//! ```
//!
//! The token is exactly 8 alphanumeric characters and is normalized to
//! uppercase. Anything else is no-match; the orchestrator then falls back
//! to the sender's most recent active session.

use once_cell::sync::Lazy;
use regex::Regex;

static COMMAND_RE: Lazy<Regex> = Lazy::new(|| {
    // (?s) lets multi-line command text through; the token itself cannot
    // span lines. The fixed {8} plus mandatory whitespace rejects 7- and
    // 9-character token candidates outright.
    Regex::new(r"(?is)^\s*(?:/cmd|token)\s+([a-z0-9]{8})\s+(.+)$").expect("command regex compiles")
});

/// A token-addressed command extracted from message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Uppercase-normalized session token.
    pub token: String,
    /// Trimmed command text following the token.
    pub command: String,
}

/// Extract `(token, command)` from free-form inbound text.
pub fn parse(text: &str) -> Option<ParsedCommand> {
    let caps = COMMAND_RE.captures(text)?;
    let command = caps[2].trim();
    if command.is_empty() {
        return None;
    }
    Some(ParsedCommand {
        token: caps[1].to_ascii_uppercase(),
        command: command.to_string(),
    })
}
