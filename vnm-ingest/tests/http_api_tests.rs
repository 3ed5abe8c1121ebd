//! HTTP routing integration tests
//!
//! Drives the router with `oneshot` over in-memory stores and scripted
//! collaborators.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use vnm_common::events::EventBus;
use vnm_ingest::models::Protocol;
use vnm_ingest::services::{ImportPolicy, Importer, NetworkProbe, ProbeOrchestrator, ServiceActivator};
use vnm_ingest::store::Stores;
use vnm_ingest::{build_router, AppState};

use helpers::{fast_policy, MockActivator, MockProbe};

fn test_app_state() -> AppState {
    let stores = Stores::in_memory();
    let events = EventBus::new(64);
    let probe = MockProbe::new();
    probe.unreachable("10.9.9.9");
    let orchestrator = ProbeOrchestrator::new(
        stores.nodes.clone(),
        Arc::new(probe) as Arc<dyn NetworkProbe>,
        Arc::new(MockActivator::granting()) as Arc<dyn ServiceActivator>,
        events.clone(),
        fast_policy(),
    );
    let importer = Importer::new(stores.clone(), events.clone(), ImportPolicy::default())
        .with_in_flight(orchestrator.in_flight());
    AppState::new(stores, importer, orchestrator, events, Protocol::Pptp)
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_reports_module() {
    let app = build_router(test_app_state());
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "vnm-ingest");
}

#[tokio::test]
async fn test_import_then_list_and_fetch() {
    let app = build_router(test_app_state());

    let (status, report) = send(
        &app,
        "POST",
        "/nodes/import",
        Some(json!({ "text": "76.178.64.46 admin admin CA\nnonsense\n", "protocol": "socks" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["added"], 1);
    assert_eq!(report["format_errors"], 1);
    assert_eq!(report["total_processed"], 2);

    let (status, nodes) = send(&app, "GET", "/nodes?status=not_tested", None).await;
    assert_eq!(status, StatusCode::OK);
    let nodes = nodes.as_array().unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["state"], "California");
    assert_eq!(nodes[0]["protocol"], "socks");

    let id = nodes[0]["id"].as_i64().unwrap();
    let (status, node) = send(&app, "GET", &format!("/nodes/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(node["ip"], "76.178.64.46");

    let (status, errors) = send(&app, "GET", "/format-errors", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(errors.as_array().unwrap().len(), 1);

    let (status, cleared) = send(&app, "DELETE", "/format-errors", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["cleared"], 1);
}

#[tokio::test]
async fn test_unknown_node_is_404() {
    let app = build_router(test_app_state());
    let (status, body) = send(&app, "GET", "/nodes/77", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = send(&app, "POST", "/nodes/77/test", Some(json!({ "kind": "ping" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bad_status_filter_is_400() {
    let app = build_router(test_app_state());
    let (status, body) = send(&app, "GET", "/nodes?status=checking", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_single_and_batch_tests() {
    let app = build_router(test_app_state());
    send(
        &app,
        "POST",
        "/nodes/import",
        Some(json!({ "text": "10.0.0.1 a b\n10.9.9.9 c d\n" })),
    )
    .await;

    // Speed before ping: refused with the required status named
    let (status, result) = send(&app, "POST", "/nodes/1/test", Some(json!({ "kind": "speed" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["outcome"], "rejected");
    assert!(result["message"].as_str().unwrap().contains("ping_ok"));

    let (status, batch) = send(
        &app,
        "POST",
        "/nodes/test",
        Some(json!({ "ids": [2, 1, 2], "kind": "ping_speed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(batch["requested"], 3);
    assert_eq!(batch["passed"], 1);
    let results = batch["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["node_id"], 2);
    assert_eq!(results[0]["status"], "ping_failed");
    assert_eq!(results[1]["status"], "speed_ok");

    let (status, stats) = send(&app, "GET", "/nodes/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["by_status"]["speed_ok"], 1);
    assert_eq!(stats["checking"], 0);
}

#[tokio::test]
async fn test_verification_review_flow() {
    let app = build_router(test_app_state());
    send(
        &app,
        "POST",
        "/nodes/import",
        Some(json!({ "text": "3.3.3.3 first one\n3.3.3.3 second two\n" })),
    )
    .await;

    let (status, queue) = send(&app, "GET", "/verification-queue", None).await;
    assert_eq!(status, StatusCode::OK);
    let queue = queue.as_array().unwrap();
    assert_eq!(queue.len(), 1);
    let entry_id = queue[0]["id"].as_i64().unwrap();

    let uri = format!("/verification-queue/{}/resolve", entry_id);
    let (status, outcome) = send(&app, "POST", &uri, Some(json!({ "action": "reject" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["entry"]["status"], "resolved");

    let (status, body) = send(&app, "POST", &uri, Some(json!({ "action": "accept" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, resolved) = send(&app, "GET", "/verification-queue?status=resolved", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved.as_array().unwrap().len(), 1);
}
