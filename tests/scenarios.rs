mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::json;
use switchboard::breaker::BreakerMode;
use switchboard::pipeline::TaskOutcome;
use switchboard::providers::{DeliveryStatus, idempotency_key};
use switchboard::queue::QueueName;
use switchboard::worker::drain;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_signed_message_is_answered_and_recorded() {
    let generation = MockServer::start().await;
    let delivery = MockServer::start().await;
    let config = config(&generation, &delivery);

    Mock::given(method("POST"))
        .and(path(gemini_path(&config)))
        .and(body_partial_json(json!({
            "contents": [{"role": "user", "parts": [{"text": "Hello"}]}]
        })))
        .respond_with(gemini_reply("Hi! How can I help?"))
        .expect(1)
        .mount(&generation)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/messages/send"))
        .and(header("authorization", "Bearer wt-token"))
        .and(body_partial_json(json!({
            "number": SENDER,
            "body": "Hi! How can I help?"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg-1"})))
        .expect(1)
        .mount(&delivery)
        .await;

    let app = components(&config);
    let status = post(
        &router(&app),
        webhook(&text_message("Hello"), unix_now(), "scenario-a"),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let outcomes = drain(&app.pipeline, QueueName::Primary).await.unwrap();
    assert_eq!(outcomes, [TaskOutcome::Completed]);

    let key = idempotency_key(TENANT, SENDER, "scenario-a");
    let sent = app.delivery.log().find_sent(&key).unwrap().unwrap();
    assert_eq!(sent.status, DeliveryStatus::Sent);
    assert_eq!(sent.external_id.as_deref(), Some("msg-1"));
    assert_eq!(sent.recipient, SENDER);

    let history = app.context.load(TENANT, SENDER).unwrap();
    assert_eq!(history.messages.len(), 2);
    assert_eq!(history.messages[1].body, "Hi! How can I help?");
}

#[tokio::test]
async fn test_stale_webhook_is_rejected_without_a_task() {
    let generation = MockServer::start().await;
    let delivery = MockServer::start().await;
    let config = config(&generation, &delivery);
    Mock::given(method("POST"))
        .respond_with(gemini_reply("unused"))
        .expect(0)
        .mount(&generation)
        .await;

    let app = components(&config);
    let status = post(
        &router(&app),
        webhook(&text_message("Hello"), unix_now() - 600, "scenario-b"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.queue.depth(QueueName::Primary).unwrap(), 0);
    assert!(drain(&app.pipeline, QueueName::Primary).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_generation_outage_opens_breaker_and_falls_back() {
    let generation = MockServer::start().await;
    let delivery = MockServer::start().await;
    let mut config = config(&generation, &delivery);
    config.generation.retry_attempts = 4;
    config.breaker.generation.failure_threshold = 4;
    config.templates.insert(
        "technical_issue".into(),
        "We are having trouble, please try again shortly.".into(),
    );

    Mock::given(method("POST"))
        .and(path(gemini_path(&config)))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": {"code": 503, "message": "overloaded", "status": "UNAVAILABLE"}
        })))
        .expect(4)
        .mount(&generation)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/messages/send"))
        .and(body_partial_json(json!({
            "body": "We are having trouble, please try again shortly."
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 7})))
        .expect(2)
        .mount(&delivery)
        .await;

    let app = components(&config);
    let router = router(&app);
    for correlation in ["scenario-c-1", "scenario-c-2"] {
        let status = post(
            &router,
            webhook(&text_message("Hello"), unix_now(), correlation),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let outcomes = drain(&app.pipeline, QueueName::Primary).await.unwrap();
    assert_eq!(outcomes, [TaskOutcome::Completed, TaskOutcome::Completed]);
    assert_eq!(
        app.generation_breaker.snapshot(TENANT).unwrap().mode,
        BreakerMode::Open
    );
    for correlation in ["scenario-c-1", "scenario-c-2"] {
        let key = idempotency_key(TENANT, SENDER, correlation);
        assert!(app.delivery.log().find_sent(&key).unwrap().is_some());
    }
}

#[tokio::test]
async fn test_delivery_outage_ends_in_dead_letter() {
    let generation = MockServer::start().await;
    let delivery = MockServer::start().await;
    let mut config = config(&generation, &delivery);
    config.delivery.retry_attempts = 1;
    config.breaker.delivery.failure_threshold = 100;

    Mock::given(method("POST"))
        .respond_with(gemini_reply("Hi!"))
        .expect(6)
        .mount(&generation)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/messages/send"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(6)
        .mount(&delivery)
        .await;

    let app = components(&config);
    let status = post(
        &router(&app),
        webhook(&text_message("Hello"), unix_now(), "scenario-d"),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let outcomes = drain(&app.pipeline, QueueName::Primary).await.unwrap();
    assert_eq!(outcomes.len(), 6);
    assert_eq!(outcomes.last(), Some(&TaskOutcome::DeadLettered));

    let entries = app.queue.list_dead_letters(None).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].classification, "delivery-exhausted");
    assert_eq!(entries[0].attempts, 6);
    assert_eq!(entries[0].correlation_id, "scenario-d");

    let records = app.delivery.log().for_task(entries[0].task_id).unwrap();
    assert_eq!(records.len(), 6);
    assert!(
        records
            .iter()
            .all(|r| r.status == DeliveryStatus::FailedTemporary)
    );
    assert!(
        app.delivery
            .log()
            .find_sent(&idempotency_key(TENANT, SENDER, "scenario-d"))
            .unwrap()
            .is_none()
    );
}
