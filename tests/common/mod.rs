// Shared test helpers; not all items are used by every test binary.
#![allow(unused)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use std::sync::Arc;
use switchboard::app::Components;
use switchboard::config::Config;
use switchboard::gateway::{CORRELATION_HEADER, TENANT_HEADER, build_router};
use switchboard::security::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER, sign};
use switchboard::storage::Database;
use tower::ServiceExt;
use wiremock::{MockServer, ResponseTemplate};

pub const SECRET: &str = "integration-secret";
pub const TENANT: &str = "acme";
pub const DOMAIN: &str = "acme.example.com";
pub const SENDER: &str = "5511999990000";

/// Config wired to the two mock servers, with zero in-process backoff.
pub fn config(generation: &MockServer, delivery: &MockServer) -> Config {
    let mut config: Config = serde_json::from_value(json!({
        "security": {"sharedSecret": SECRET},
        "generation": {
            "apiKey": "gemini-key",
            "baseUrl": generation.uri(),
            "retryBackoffMs": [0]
        },
        "delivery": {
            "apiUrl": format!("{}/api/messages/send", delivery.uri()),
            "bearerToken": "wt-token",
            "retryBackoffMs": [0]
        },
        "queue": {"retryScheduleSecs": [0]},
        "tenants": {TENANT: {"domain": DOMAIN, "label": "Acme"}}
    }))
    .unwrap();
    config.validate().unwrap();
    config
}

pub fn components(config: &Config) -> Components {
    Components::build(
        config,
        Arc::new(Database::open_in_memory().unwrap()),
        None,
    )
}

pub fn router(components: &Components) -> Router {
    build_router(components.gateway.clone())
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn webhook(body: &str, timestamp: i64, correlation_id: &str) -> Request<Body> {
    let ts = timestamp.to_string();
    Request::builder()
        .method("POST")
        .uri("/api/webhook")
        .header("content-type", "application/json")
        .header(TENANT_HEADER, DOMAIN)
        .header(TIMESTAMP_HEADER, ts.as_str())
        .header(SIGNATURE_HEADER, sign(SECRET, &ts, body.as_bytes()))
        .header(CORRELATION_HEADER, correlation_id)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn post(router: &Router, request: Request<Body>) -> StatusCode {
    router.clone().oneshot(request).await.unwrap().status()
}

pub fn text_message(text: &str) -> String {
    json!({"from": SENDER, "body": text}).to_string()
}

pub fn gemini_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP"
        }]
    }))
}

pub fn gemini_path(config: &Config) -> String {
    format!("/models/{}:generateContent", config.generation.model)
}
