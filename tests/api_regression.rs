//! API Regression Tests
//!
//! In-process tests that build the Axum app via `create_app()` and exercise
//! the /api/v1/* endpoints using `tower::ServiceExt::oneshot()`.
//! In-memory store and the built-in reference classifiers; no network port.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use wafer_sentinel::api::{create_app, ApiState};
use wafer_sentinel::config::{InspectionConfig, ServerConfig};
use wafer_sentinel::ingestion::npy::encode_u8_grid;
use wafer_sentinel::storage::{InMemoryWaferStore, WaferRepository};
use wafer_sentinel::{ClassifierSet, InspectionCoordinator, NotificationService};

const BOUNDARY: &str = "wafer-test-boundary";

fn test_app() -> (Router, Arc<InMemoryWaferStore>) {
    let cfg = InspectionConfig::default();
    let store = Arc::new(InMemoryWaferStore::new());
    let notifier = Arc::new(NotificationService::new(cfg.notifications.clone(), store.clone()).unwrap());
    let coordinator = Arc::new(InspectionCoordinator::new(
        &cfg,
        ClassifierSet::reference().unwrap(),
        store.clone(),
        notifier.clone(),
    ));
    let state = ApiState::new(&cfg, coordinator, notifier, CancellationToken::new());
    (create_app(state, &ServerConfig::default()), store)
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, Vec<u8>),
}

fn multipart(parts: Vec<Part<'_>>) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes());
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(file_name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body_request("POST", "/api/v1/analyze", body, &format!("multipart/form-data; boundary={BOUNDARY}"))
}

fn body_request(method: &str, uri: &str, body: Vec<u8>, content_type: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, value: Value) -> Request<Body> {
    body_request(method, uri, serde_json::to_vec(&value).unwrap(), "application/json")
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn grid_bytes() -> Vec<u8> {
    let size = 56;
    let cells: Vec<u8> = (0..size * size).map(|i| if i % 7 == 0 { 2 } else { 1 }).collect();
    encode_u8_grid(size, &cells)
}

fn with_uri(mut req: Request<Body>, uri: &str) -> Request<Body> {
    *req.uri_mut() = uri.parse().unwrap();
    req
}

/// Read-only GET endpoints answer 200 on an empty store.
#[tokio::test]
async fn test_v1_get_endpoints_return_200() {
    let (app, _) = test_app();
    for endpoint in [
        "/api/v1/health",
        "/api/v1/wafers",
        "/api/v1/spc",
        "/api/v1/spc?days=7&tool_id=TOOL-1",
        "/api/v1/rca",
        "/api/v1/notifications/config",
    ] {
        let (status, body) = send(&app, get(endpoint)).await;
        assert_eq!(status, StatusCode::OK, "GET {endpoint}");
        assert!(body.get("data").is_some(), "GET {endpoint} missing envelope");
        assert_eq!(body["meta"]["version"], "1");
    }
}

#[tokio::test]
async fn test_health_reports_storage() {
    let (app, _) = test_app();
    let (_, body) = send(&app, get("/api/v1/health")).await;
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["storage_backend"], "memory");
    assert_eq!(body["data"]["records"], 0);
    assert_eq!(body["data"]["notifications_enabled"], false);
}

#[tokio::test]
async fn test_analyze_persists_record() {
    let (app, store) = test_app();
    let req = multipart(vec![
        Part::Text("wafer_id", "W-API-1"),
        Part::Text("lot_id", "LOT-A"),
        Part::Text("tool_id", "TOOL-2"),
        Part::File("w1.npy", grid_bytes()),
    ]);
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["wafer_id"], "W-API-1");
    assert_eq!(body["data"]["tool_id"], "TOOL-2");
    assert!(body["data"]["failure"].is_null());
    let verdict = body["data"]["verdict"].as_str().unwrap();
    assert!(verdict == "PASS" || verdict == "FAIL");
    assert_eq!(store.count().unwrap(), 1);

    let (status, body) = send(&app, get("/api/v1/wafers/W-API-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["lot_id"], "LOT-A");

    let (_, body) = send(&app, get("/api/v1/wafers?tool_id=TOOL-2")).await;
    assert_eq!(body["data"]["count"], 1);
}

#[tokio::test]
async fn test_analyze_corrupt_payload_is_fail_record_not_error() {
    let (app, _) = test_app();
    let req = multipart(vec![Part::Text("kind", "grid"), Part::File("broken.bin", b"garbage".to_vec())]);
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["verdict"], "FAIL");
    assert_eq!(body["data"]["confidence"], 0.0);
    assert_eq!(body["data"]["failure"]["kind"], "UnsupportedFormat");
}

#[tokio::test]
async fn test_analyze_rejects_bad_requests() {
    let (app, _) = test_app();

    let (status, body) = send(&app, multipart(vec![Part::Text("lot_id", "LOT-A")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    // No kind, an extension that says nothing and no recognizable magic
    let (status, _) = send(&app, multipart(vec![Part::File("wafer.dat", b"plain text".to_vec())])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        multipart(vec![Part::Text("kind", "xray"), Part::File("w.npy", grid_bytes())]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_returns_lot_summary() {
    let (app, store) = test_app();
    let req = with_uri(
        multipart(vec![
            Part::Text("lot_id", "LOT-B"),
            Part::File("a.npy", grid_bytes()),
            Part::File("b.npy", grid_bytes()),
            Part::File("c.npy", grid_bytes()),
        ]),
        "/api/v1/analyze/batch",
    );
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["data"]["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["file_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a.npy", "b.npy", "c.npy"]);
    assert_eq!(body["data"]["lot"]["lot_id"], "LOT-B");
    assert_eq!(body["data"]["lot"]["total_wafers"], 3);
    assert_eq!(body["data"]["cancelled"], false);
    assert!(body["data"]["narrative"].as_str().is_some());
    assert_eq!(store.count().unwrap(), 3);
}

#[tokio::test]
async fn test_analyze_sniffs_kind_when_extension_is_unknown() {
    let (app, _) = test_app();
    let (status, body) = send(&app, multipart(vec![Part::File("wafer.dat", grid_bytes())])).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["failure"].is_null());
    assert_eq!(body["data"]["stages"]["ingestion"]["kind"], "grid");
}

#[tokio::test]
async fn test_batch_unidentifiable_file_fails_alone() {
    let (app, store) = test_app();
    let req = with_uri(
        multipart(vec![
            Part::Text("lot_id", "LOT-C"),
            Part::File("good.npy", grid_bytes()),
            Part::File("scan.dat", grid_bytes()),
            Part::File("notes.dat", b"operator notes".to_vec()),
            Part::File("last.npy", grid_bytes()),
        ]),
        "/api/v1/analyze/batch",
    );
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let records = body["data"]["records"].as_array().unwrap();
    let names: Vec<&str> = records.iter().map(|r| r["file_name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["good.npy", "scan.dat", "notes.dat", "last.npy"]);
    // Sniffed as a grid from its magic bytes
    assert!(records[1]["failure"].is_null());
    assert_eq!(records[2]["verdict"], "FAIL");
    assert_eq!(records[2]["failure"]["kind"], "UnsupportedFormat");
    assert!(records[3]["failure"].is_null());
    assert_eq!(body["data"]["lot"]["total_wafers"], 4);
    assert_eq!(store.count().unwrap(), 4);
}

#[tokio::test]
async fn test_history_errors() {
    let (app, _) = test_app();
    let (status, body) = send(&app, get("/api/v1/wafers/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = send(
        &app,
        get("/api/v1/wafers?from=2025-03-02T00:00:00Z&to=2025-03-01T00:00:00Z"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_copilot_answers() {
    let (app, _) = test_app();
    let (status, body) = send(&app, json_request("POST", "/api/v1/copilot", json!({ "query": "" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["response"], "Please ask a question about your wafer data.");

    let (_, body) = send(
        &app,
        json_request("POST", "/api/v1/copilot", json!({ "query": "what is our yield?" })),
    )
    .await;
    assert_eq!(body["data"]["intent"], "yield");
    assert!(body["data"]["response"].as_str().unwrap().starts_with("No wafer data available"));
}

#[tokio::test]
async fn test_notification_config_roundtrip() {
    let (app, _) = test_app();

    let bad = json!({ "enabled": true, "transport": { "kind": "webhook", "url": "not-a-url" } });
    let (status, body) = send(&app, json_request("PUT", "/api/v1/notifications/config", bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let good = json!({ "enabled": true, "alert_severity": "High", "recipients": ["qa@fab.example"] });
    let (status, body) = send(&app, json_request("PUT", "/api/v1/notifications/config", good)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["alert_severity"], "High");

    let (_, body) = send(&app, get("/api/v1/notifications/config")).await;
    assert_eq!(body["data"]["enabled"], true);
    assert_eq!(body["data"]["recipients"][0], "qa@fab.example");
}

#[tokio::test]
async fn test_notification_test_uses_live_config_without_body() {
    let (app, _) = test_app();
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/notifications/test")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["kind"], "test");
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (app, _) = test_app();
    let resp = app.oneshot(get("/api/v1/does-not-exist")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
