//! Command relay engine.
//!
//! Turns chat replies into terminal keystrokes under strict session
//! control: each outbound notification mints a short-lived token bound to
//! one tmux session, and inbound replies carrying that token (or matched
//! to the sender's active session) are injected as commands until the
//! session's budget or TTL runs out.
//!
//! ```text
//! notification → session token ──┐
//!                                ▼
//! chat reply → parse → session lookup → budget → tmux send-keys → ack
//! ```
//!
//! Channel-side concerns (webhook verification, sender whitelists, reply
//! delivery) live in `relay-channels`; this crate is transport-agnostic.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod engine;
pub mod error;
pub mod inject;
pub mod parser;
pub mod session;
pub mod store;
pub mod token;

pub use engine::{RelayAck, RelayEngine};
pub use error::{RelayError, RelayResult};
pub use inject::{CommandInjector, InjectError, TmuxInjector};
pub use parser::ParsedCommand;
pub use session::{SessionRecord, SessionStatus};
pub use store::{SessionStore, UsageOutcome};
