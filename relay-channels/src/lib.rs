//! Channel adapters and webhook service for the terminal command relay.
//!
//! Receives chat-platform webhooks (Slack, DingTalk, Telegram), verifies
//! them, and feeds authenticated messages into the relay engine. Also
//! exposes a local API for sending token-bearing notifications.
//!
//! ```text
//! chat platform → webhook → adapter.authenticate → RelayEngine → tmux
//!      ▲                                               │
//!      └──────────── adapter.send (ack / notify) ◄─────┘
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod dingtalk;
pub mod routes;
pub mod slack;
pub mod telegram;
pub mod traits;

pub use dingtalk::DingTalkAdapter;
pub use routes::{build_router, create_state, RelayState};
pub use slack::SlackAdapter;
pub use telegram::TelegramAdapter;
pub use traits::{ChannelAdapter, ChannelError, ChannelResult, Inbound};

use relay_common::config::Config;
use relay_core::{RelayEngine, SessionStore, TmuxInjector};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

/// Build the relay router from configuration.
pub fn build_relay_router(config: &Config) -> anyhow::Result<axum::Router> {
    let store = SessionStore::new(&config.relay.resolved_db_path())?;

    let injector = Arc::new(TmuxInjector::new(Duration::from_secs(
        config.relay.inject_timeout_secs,
    )));
    let engine = RelayEngine::new(
        store,
        injector,
        config.relay.max_commands,
        chrono::Duration::hours(config.relay.session_ttl_hours),
    );

    let slack = config
        .channels
        .slack
        .as_ref()
        .filter(|c| c.enabled)
        .map(|c| Arc::new(SlackAdapter::new(c)));
    let dingtalk = config
        .channels
        .dingtalk
        .as_ref()
        .filter(|c| c.enabled)
        .map(|c| Arc::new(DingTalkAdapter::new(c)));
    let telegram = config
        .channels
        .telegram
        .as_ref()
        .filter(|c| c.enabled)
        .map(|c| Arc::new(TelegramAdapter::new(c)));

    for (name, enabled) in [
        ("slack", slack.is_some()),
        ("dingtalk", dingtalk.is_some()),
        ("telegram", telegram.is_some()),
    ] {
        if enabled {
            tracing::info!(channel = name, "channel enabled");
        }
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = create_state(engine, slack, dingtalk, telegram);
    Ok(build_router(state).layer(cors))
}

/// Start the relay HTTP server.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.network.bind.parse::<std::net::IpAddr>()?,
        config.network.port,
    ));

    let router = build_relay_router(config)?;

    tracing::info!("Starting relay webhook service on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
