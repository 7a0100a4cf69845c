mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use telemetry_service::config::AckPolicy;
use telemetry_service::{
    AlertCondition, DispatchResult, HttpNotifier, IdStrategy, Notifier, Outcome,
};
use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TRIGGER_PATH: &str = "/v1/events/trigger";

async fn notifier_for(server: &MockServer) -> HttpNotifier {
    let config = notification_config(format!("{}{}", server.uri(), TRIGGER_PATH));
    HttpNotifier::new(&config).expect("valid notifier config")
}

#[tokio::test]
async fn alert_triggers_workflow_event() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TRIGGER_PATH))
        .and(header("authorization", "ApiKey test-api-key"))
        .and(header("accept", "application/json"))
        .and(body_partial_json(json!({
            "name": "emailerworkflow",
            "to": { "email": "ops@example.com" },
            "payload": { "Message": "Alert for High temperature!" }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "data": { "acknowledged": true } })))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = notifier_for(&server).await;
    let result = notifier.dispatch(AlertCondition::HighTemperature).await;

    assert_eq!(result, DispatchResult::Delivered { status: 201 });
}

#[tokio::test]
async fn subscriber_id_is_always_sent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TRIGGER_PATH))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;

    let notifier = notifier_for(&server).await;
    notifier.dispatch(AlertCondition::ShockDetected).await;
    notifier.dispatch(AlertCondition::ShockDetected).await;

    let requests = server.received_requests().await.expect("recording enabled");
    let ids: Vec<String> = requests
        .iter()
        .map(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
            body["to"]["subscriberId"].as_str().unwrap().to_string()
        })
        .collect();

    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn rejected_event_is_reported_not_raised() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TRIGGER_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream unavailable"))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = notifier_for(&server).await;
    let result = notifier.dispatch(AlertCondition::FlameDetected).await;

    match result {
        DispatchResult::Failed { reason } => {
            assert!(reason.contains("500"), "unexpected reason: {}", reason);
            assert!(reason.contains("upstream unavailable"));
        }
        other => panic!("Expected Failed, got {:?}", other),
    }
}

#[tokio::test]
async fn unreachable_service_is_reported_not_raised() {
    // Bind then drop a listener so the port is closed
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = notification_config(format!("http://127.0.0.1:{}{}", port, TRIGGER_PATH));
    let notifier = HttpNotifier::new(&config).expect("valid notifier config");

    match notifier.dispatch(AlertCondition::FlameDetected).await {
        DispatchResult::Failed { reason } => {
            assert!(reason.starts_with("Notification request failed"), "unexpected reason: {}", reason);
        }
        other => panic!("Expected Failed, got {:?}", other),
    }
}

#[tokio::test]
async fn no_alert_sends_nothing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let notifier = notifier_for(&server).await;

    assert_eq!(
        notifier.dispatch(AlertCondition::NoAlert).await,
        DispatchResult::Skipped
    );
}

#[tokio::test]
async fn failing_notification_service_does_not_stop_the_pipeline() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TRIGGER_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let queue = Arc::new(InMemoryQueue::new());
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(notifier_for(&server).await);
    let pipeline = build_pipeline(
        queue.clone(),
        store.clone(),
        notifier,
        pipeline_config(AckPolicy::AckAfterPersist, IdStrategy::Random),
    );

    let message = queue.push(FLAME_READING);
    let outcome = pipeline.handle(message.clone()).await;

    assert!(matches!(
        outcome,
        Outcome::Done {
            alert: AlertCondition::FlameDetected,
            dispatch: DispatchResult::Failed { .. },
            ..
        }
    ));
    assert_eq!(store.len(), 1);
    assert_eq!(queue.deleted(), vec![message.id()]);
}
