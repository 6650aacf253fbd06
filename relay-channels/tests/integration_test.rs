//! Integration tests for the relay webhook service.
//!
//! Exercises the full HTTP surface with signed requests against a
//! file-backed session store: signature rejection, command relay and
//! the session inspection API.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use hmac::{Hmac, Mac};
use relay_channels::{build_router, create_state, SlackAdapter, TelegramAdapter};
use relay_common::config::{SlackConfig, TelegramConfig};
use relay_core::inject::{CommandInjector, InjectError};
use relay_core::{RelayEngine, SessionStore};
use sha2::Sha256;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

const SLACK_SECRET: &str = "integration-signing-secret";
const TELEGRAM_SECRET: &str = "integration-webhook-secret";

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

fn build_app(
    dir: &TempDir,
    slack_allowed: Vec<String>,
) -> (axum::Router, RelayEngine, Arc<RecordingInjector>) {
    let store = SessionStore::new(&dir.path().join("sessions.db")).unwrap();
    let injector = Arc::new(RecordingInjector {
        calls: Mutex::new(Vec::new()),
    });
    let engine = RelayEngine::new(store, injector.clone(), 10, chrono::Duration::hours(24));

    let slack = Arc::new(SlackAdapter::new(&SlackConfig {
        enabled: true,
        bot_token: None,
        signing_secret: Some(SLACK_SECRET.to_string()),
        allowed_users: slack_allowed,
        allow_unverified: false,
    }));
    let telegram = Arc::new(TelegramAdapter::new(&TelegramConfig {
        enabled: true,
        bot_token: None,
        webhook_secret: Some(TELEGRAM_SECRET.to_string()),
        allowed_users: vec![],
        allow_unverified: false,
    }));

    let state = create_state(engine.clone(), Some(slack), None, Some(telegram));
    (build_router(state), engine, injector)
}

fn signed_slack_request(secret: &str, body: &str) -> Request<Body> {
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
async fn slack_command_reaches_terminal() {
    let dir = TempDir::new().unwrap();
    let (app, engine, injector) = build_app(&dir, vec![]);

    let token = engine.create_session("slack", "U1", "work").unwrap().token;
    let body = slack_message("U1", &format!("/cmd {token} git pull"));

    let response = app
        .oneshot(signed_slack_request(SLACK_SECRET, &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        injector.calls.lock().unwrap().as_slice(),
        &[("work".to_string(), "git pull".to_string())]
    );

    let record = engine.store().lookup(&token).unwrap().unwrap();
    assert_eq!(record.command_count, 1);
}

#[tokio::test]
async fn forged_slack_request_never_reaches_the_engine() {
    let dir = TempDir::new().unwrap();
    let (app, engine, injector) = build_app(&dir, vec![]);

    let token = engine.create_session("slack", "U1", "work").unwrap().token;
    let body = slack_message("U1", &format!("/cmd {token} rm -rf /"));

    let response = app
        .oneshot(signed_slack_request("attacker-guess", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(injector.calls.lock().unwrap().is_empty());
    assert_eq!(
        engine.store().lookup(&token).unwrap().unwrap().command_count,
        0
    );
}

#[tokio::test]
async fn unwhitelisted_slack_sender_is_403() {
    let dir = TempDir::new().unwrap();
    let (app, engine, injector) = build_app(&dir, vec!["U1".to_string()]);

    let token = engine.create_session("slack", "U1", "work").unwrap().token;
    let body = slack_message("U9", &format!("/cmd {token} whoami"));

    let response = app
        .oneshot(signed_slack_request(SLACK_SECRET, &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(injector.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn telegram_command_with_secret_token() {
    let dir = TempDir::new().unwrap();
    let (app, engine, injector) = build_app(&dir, vec![]);

    let token = engine.create_session("telegram", "42", "work").unwrap().token;
    let payload = serde_json::json!({
        "update_id": 1,
        "message": {
            "message_id": 1,
            "chat": { "id": 42 },
            "from": { "id": 42, "username": "operator" },
            "text": format!("Token {token} docker ps")
        }
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/telegram")
                .header("content-type", "application/json")
                .header("x-telegram-bot-api-secret-token", TELEGRAM_SECRET)
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        injector.calls.lock().unwrap().as_slice(),
        &[("work".to_string(), "docker ps".to_string())]
    );
}

#[tokio::test]
async fn telegram_without_secret_header_is_401() {
    let dir = TempDir::new().unwrap();
    let (app, _, injector) = build_app(&dir, vec![]);

    let payload = serde_json::json!({
        "update_id": 1,
        "message": {
            "message_id": 1,
            "chat": { "id": 42 },
            "from": { "id": 42 },
            "text": "ls"
        }
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/telegram")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(injector.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn session_api_reflects_usage() {
    let dir = TempDir::new().unwrap();
    let (app, engine, _) = build_app(&dir, vec![]);

    let token = engine.create_session("slack", "U1", "work").unwrap().token;
    let body = slack_message("U1", &format!("/cmd {token} uptime"));
    app.clone()
        .oneshot(signed_slack_request(SLACK_SECRET, &body))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/sessions/{token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let record: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(record["command_count"], 1);
    assert_eq!(record["terminal_target"], "work");
    assert_eq!(record["status"], "active");
}
