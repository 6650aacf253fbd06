//! HTTP routes for the relay webhook service.
//!
//! Push-based webhook endpoints for each channel plus a small local API
//! for emitting notifications and inspecting sessions.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::dingtalk::DingTalkAdapter;
use crate::slack::SlackAdapter;
use crate::telegram::TelegramAdapter;
use crate::traits::{ChannelAdapter, ChannelError, Inbound};
use relay_core::RelayEngine;

// ============================================================================
// State
// ============================================================================

/// Shared state for the relay HTTP server.
pub struct RelayState {
    pub engine: RelayEngine,
    /// Slack adapter (if configured)
    pub slack: Option<Arc<SlackAdapter>>,
    /// DingTalk adapter (if configured)
    pub dingtalk: Option<Arc<DingTalkAdapter>>,
    /// Telegram adapter (if configured)
    pub telegram: Option<Arc<TelegramAdapter>>,
}

impl RelayState {
    fn adapter_for(&self, channel: &str) -> Option<Arc<dyn ChannelAdapter>> {
        match channel {
            "slack" => self.slack.clone().map(|a| a as Arc<dyn ChannelAdapter>),
            "dingtalk" => self.dingtalk.clone().map(|a| a as Arc<dyn ChannelAdapter>),
            "telegram" => self.telegram.clone().map(|a| a as Arc<dyn ChannelAdapter>),
            _ => None,
        }
    }
}

/// Create the shared server state.
pub fn create_state(
    engine: RelayEngine,
    slack: Option<Arc<SlackAdapter>>,
    dingtalk: Option<Arc<DingTalkAdapter>>,
    telegram: Option<Arc<TelegramAdapter>>,
) -> Arc<RelayState> {
    Arc::new(RelayState {
        engine,
        slack,
        dingtalk,
        telegram,
    })
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct WebhookResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    challenge: Option<String>,
}

impl WebhookResponse {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
            challenge: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            challenge: None,
        }
    }
}

// ============================================================================
// Health Routes
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "relay-channels",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn ready(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    // The session store is the only hard dependency.
    match state.engine.store().len() {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ready",
                service: "relay-channels",
                version: env!("CARGO_PKG_VERSION"),
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "session store unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "not_ready",
                    service: "relay-channels",
                    version: env!("CARGO_PKG_VERSION"),
                }),
            )
        }
    }
}

// ============================================================================
// Webhook Handlers
// ============================================================================

async fn slack_webhook(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    match state.slack.clone() {
        Some(adapter) => process_inbound(&state, adapter, &headers, &body).await,
        None => not_configured("slack"),
    }
}

async fn dingtalk_webhook(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    match state.dingtalk.clone() {
        Some(adapter) => process_inbound(&state, adapter, &headers, &body).await,
        None => not_configured("dingtalk"),
    }
}

async fn telegram_webhook(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    match state.telegram.clone() {
        Some(adapter) => process_inbound(&state, adapter, &headers, &body).await,
        None => not_configured("telegram"),
    }
}

fn not_configured(channel: &str) -> (StatusCode, Json<WebhookResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(WebhookResponse::error(format!(
            "{channel} channel not configured"
        ))),
    )
}

/// Authenticate an inbound webhook and run it through the engine.
///
/// Authentication happens on the raw body bytes before any engine or
/// store activity; a forged request never touches a session.
async fn process_inbound(
    state: &RelayState,
    adapter: Arc<dyn ChannelAdapter>,
    headers: &HeaderMap,
    body: &[u8],
) -> (StatusCode, Json<WebhookResponse>) {
    match adapter.authenticate(headers, body) {
        Ok(Inbound::Challenge(challenge)) => (
            StatusCode::OK,
            Json(WebhookResponse {
                success: true,
                message: None,
                challenge: Some(challenge),
            }),
        ),
        Ok(Inbound::Ignored) => (StatusCode::OK, Json(WebhookResponse::ok())),
        Ok(Inbound::Message { sender, text }) => {
            let ack = state.engine.handle_command(adapter.name(), &sender, &text).await;

            // Best-effort reply so the human sees the outcome in chat; the
            // webhook response itself is only read by the platform.
            let reply = ack.message.clone();
            let reply_adapter = adapter.clone();
            tokio::spawn(async move {
                if let Err(e) = reply_adapter.send(&sender, &reply).await {
                    tracing::warn!(
                        channel = reply_adapter.name(),
                        error = %e,
                        "failed to deliver acknowledgment"
                    );
                }
            });

            (
                StatusCode::OK,
                Json(WebhookResponse {
                    success: ack.ok,
                    message: Some(ack.message),
                    challenge: None,
                }),
            )
        }
        Err(err) => {
            tracing::warn!(
                channel = adapter.name(),
                reason = err.reason(),
                error = %err,
                "webhook rejected"
            );
            let status = match &err {
                ChannelError::Auth(_) => StatusCode::UNAUTHORIZED,
                ChannelError::Forbidden(_) => StatusCode::FORBIDDEN,
                ChannelError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(WebhookResponse::error(err.to_string())))
        }
    }
}

// ============================================================================
// Notification API
// ============================================================================

#[derive(Debug, Deserialize)]
struct NotifyRequest {
    channel: String,
    /// Channel-specific receiver address (Slack channel/user ID,
    /// DingTalk staff ID, Telegram chat ID).
    receiver: String,
    /// tmux session commands will be injected into.
    terminal_target: String,
    /// Notification text preceding the reply instructions.
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct NotifyResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// POST /api/v1/notify
///
/// Mints a session, appends reply instructions to the notification text
/// and sends it out. A failed send rolls the session back so no live
/// token exists that was never advertised.
async fn notify(
    State(state): State<Arc<RelayState>>,
    Json(req): Json<NotifyRequest>,
) -> impl IntoResponse {
    let Some(adapter) = state.adapter_for(&req.channel) else {
        return (
            StatusCode::NOT_FOUND,
            Json(NotifyResponse {
                success: false,
                token: None,
                expires_at: None,
                message: Some(format!("{} channel not configured", req.channel)),
            }),
        );
    };

    let record = match state
        .engine
        .create_session(&req.channel, &req.receiver, &req.terminal_target)
    {
        Ok(record) => record,
        Err(e) => {
            tracing::error!(error = %e, "session creation failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(NotifyResponse {
                    success: false,
                    token: None,
                    expires_at: None,
                    message: Some(e.user_message()),
                }),
            );
        }
    };

    let text = format!(
        "{}\n\nSession token: {} ({} commands, expires {})\nReply with: /cmd {} <command>",
        req.message,
        record.token,
        record.max_commands,
        record.expires_at.format("%Y-%m-%d %H:%M UTC"),
        record.token,
    );

    if let Err(e) = adapter.send(&req.receiver, &text).await {
        tracing::error!(
            channel = %req.channel,
            receiver = %req.receiver,
            error = %e,
            "notification send failed; rolling session back"
        );
        if let Err(e) = state.engine.discard_session(&record.token) {
            tracing::error!(token = %record.token, error = %e, "session rollback failed");
        }
        return (
            StatusCode::BAD_GATEWAY,
            Json(NotifyResponse {
                success: false,
                token: None,
                expires_at: None,
                message: Some(e.to_string()),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(NotifyResponse {
            success: true,
            token: Some(record.token),
            expires_at: Some(record.expires_at),
            message: None,
        }),
    )
}

/// GET /api/v1/sessions/:token
async fn get_session(
    State(state): State<Arc<RelayState>>,
    Path(token): Path<String>,
) -> impl IntoResponse {
    if !relay_core::token::is_well_formed(&token) {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "session not found" })),
        );
    }
    match state.engine.store().lookup(&token.to_ascii_uppercase()) {
        Ok(Some(record)) => (StatusCode::OK, Json(serde_json::json!(record))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "session not found" })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "session lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.user_message() })),
            )
        }
    }
}

// ============================================================================
// Router Builder
// ============================================================================

/// Build the relay router.
pub fn build_router(state: Arc<RelayState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Webhook endpoints
        .route("/webhook/slack", post(slack_webhook))
        .route("/webhook/dingtalk", post(dingtalk_webhook))
        .route("/webhook/telegram", post(telegram_webhook))
        // Local API
        .route("/api/v1/notify", post(notify))
        .route("/api/v1/sessions/:token", get(get_session))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use hmac::{Hmac, Mac};
    use relay_common::config::SlackConfig;
    use relay_core::inject::{CommandInjector, InjectError};
    use relay_core::SessionStore;
    use sha2::Sha256;
    use std::sync::Mutex;
    use tower::ServiceExt;

    const SLACK_SECRET: &str = "test-signing-secret";

    struct RecordingInjector {
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl CommandInjector for RecordingInjector {
        async fn inject(&self, target: &str, command: &str) -> Result<(), InjectError> {
            self.calls
                .lock()
                .unwrap()
                .push((target.to_string(), command.to_string()));
            Ok(())
        }
    }

    fn test_state() -> (Arc<RelayState>, Arc<RecordingInjector>) {
        let injector = Arc::new(RecordingInjector {
            calls: Mutex::new(Vec::new()),
        });
        let engine = RelayEngine::new(
            SessionStore::in_memory().unwrap(),
            injector.clone(),
            10,
            chrono::Duration::hours(24),
        );
        let slack = Arc::new(SlackAdapter::new(&SlackConfig {
            enabled: true,
            bot_token: None,
            signing_secret: Some(SLACK_SECRET.to_string()),
            allowed_users: vec![],
            allow_unverified: false,
        }));
        (create_state(engine, Some(slack), None, None), injector)
    }

    fn slack_request(secret: &str, body: &str) -> Request<Body> {
        let ts = chrono::Utc::now().timestamp().to_string();
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("v0:{ts}:{body}").as_bytes());
        let sig = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

        Request::builder()
            .method("POST")
            .uri("/webhook/slack")
            .header("content-type", "application/json")
            .header("x-slack-request-timestamp", ts)
            .header("x-slack-signature", sig)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn slack_message(user: &str, text: &str) -> String {
        serde_json::json!({
            "type": "event_callback",
            "event": { "type": "message", "user": user, "text": text }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (state, _) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint() {
        let (state, _) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unconfigured_channel_is_404() {
        let (state, _) = test_state();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/telegram")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_forged_signature_is_401_and_touches_nothing() {
        let (state, injector) = test_state();
        let token = state
            .engine
            .create_session("slack", "U1", "term-1")
            .unwrap()
            .token;
        let app = build_router(state.clone());

        let body = slack_message("U1", &format!("/cmd {token} rm -rf /"));
        let response = app
            .oneshot(slack_request("wrong-secret", &body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(injector.calls.lock().unwrap().is_empty());

        let record = state.engine.store().lookup(&token).unwrap().unwrap();
        assert_eq!(record.command_count, 0);
    }

    #[tokio::test]
    async fn test_signed_command_is_injected() {
        let (state, injector) = test_state();
        let token = state
            .engine
            .create_session("slack", "U1", "term-1")
            .unwrap()
            .token;
        let app = build_router(state);

        let body = slack_message("U1", &format!("/cmd {token} git status"));
        let response = app.oneshot(slack_request(SLACK_SECRET, &body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            injector.calls.lock().unwrap().as_slice(),
            &[("term-1".to_string(), "git status".to_string())]
        );
    }

    #[tokio::test]
    async fn test_url_verification_challenge_is_echoed() {
        let (state, _) = test_state();
        let app = build_router(state);

        let body = serde_json::json!({ "type": "url_verification", "challenge": "ch-42" })
            .to_string();
        let response = app.oneshot(slack_request(SLACK_SECRET, &body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: WebhookResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.challenge.as_deref(), Some("ch-42"));
    }

    #[tokio::test]
    async fn test_unknown_token_reply_is_rejected_in_ack() {
        let (state, injector) = test_state();
        let app = build_router(state);

        let body = slack_message("U1", "/cmd ZZZZ9999 ls");
        let response = app.oneshot(slack_request(SLACK_SECRET, &body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: WebhookResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(!parsed.success);
        assert!(injector.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_session_endpoint() {
        let (state, _) = test_state();
        let token = state
            .engine
            .create_session("slack", "U1", "term-1")
            .unwrap()
            .token;
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/sessions/{token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/sessions/NOPE0000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notify_unconfigured_channel_is_404() {
        let (state, _) = test_state();
        let app = build_router(state.clone());

        let payload = serde_json::json!({
            "channel": "telegram",
            "receiver": "42",
            "terminal_target": "term-1",
            "message": "build finished"
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/notify")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(state.engine.store().len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_notify_send_rolls_session_back() {
        // Slack adapter without a bot token cannot send; the minted
        // session must not survive the failure.
        let (state, _) = test_state();
        let app = build_router(state.clone());

        let payload = serde_json::json!({
            "channel": "slack",
            "receiver": "U1",
            "terminal_target": "term-1",
            "message": "build finished"
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/notify")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(state.engine.store().len().unwrap(), 0);
    }
}
