//! Shared plumbing for the terminal command relay services.
//!
//! Provides the unified error type, configuration loading and logging
//! initialization used by `relay-core` and `relay-channels`.

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{ChannelsConfig, Config, RelayConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
