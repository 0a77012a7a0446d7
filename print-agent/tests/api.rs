use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use print_agent::api::build_app;
use print_agent::core::{AgentDeps, AgentState, Config};
use print_agent::printing::JobExecutor;
use print_agent::usb::{UsbDeviceInfo, UsbEnumerator};
use printer_driver::PrintError;
use shared::models::{ConnectionType, DiscoveryMethod, PrintJob, PrinterRecord};

struct NoUsb;

#[async_trait]
impl UsbEnumerator for NoUsb {
    async fn enumerate(&self) -> std::io::Result<Vec<UsbDeviceInfo>> {
        Ok(Vec::new())
    }
}

/// Accepts every job instantly
struct Accepting;

#[async_trait]
impl JobExecutor for Accepting {
    async fn execute(&self, printer: &PrinterRecord, job: &PrintJob) -> Result<String, PrintError> {
        Ok(format!("{} -> {}", job.id, printer.name))
    }
}

fn state_with(dir: &std::path::Path, tweak: impl FnOnce(&mut Config)) -> AgentState {
    let mut config = Config::for_data_root(dir);
    tweak(&mut config);
    let deps = AgentDeps {
        enumerator: Arc::new(NoUsb),
        ..AgentDeps::system(&config)
    }
    .with_scanners(Vec::new())
    .with_executor(Arc::new(Accepting));
    let state = AgentState::initialize(config, deps).unwrap().state;
    state.registry.replace(vec![PrinterRecord::new(
        "Bar Printer",
        ConnectionType::System,
        DiscoveryMethod::System,
    )]);
    state
}

fn state(dir: &std::path::Path) -> AgentState {
    state_with(dir, |_| {})
}

async fn call(state: &AgentState, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_app(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_ready_reports_initializing_then_ready() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path());

    let (status, body) = call(&state, get("/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Agent is still initializing");
    assert!(body["timestamp"].is_string());

    state.health.mark_initialized();
    let (status, body) = call(&state, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ready"], true);
}

#[tokio::test]
async fn test_health_answers_with_report() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path());

    let (status, body) = call(&state, get("/health")).await;
    assert!(status == StatusCode::OK || status == StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["timestamp"].is_string());
    let checks = body["data"]["checks"].as_array().unwrap();
    assert_eq!(checks.len(), 5);
}

#[tokio::test]
async fn test_printers_lists_current_set() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path());

    let (status, body) = call(&state, get("/printers")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["count"], 1);
    assert_eq!(body["data"]["printers"][0]["name"], "Bar Printer");
}

#[tokio::test]
async fn test_print_queues_and_waits() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path());
    let job = json!({
        "printerName": "bar printer",
        "payload": { "format": "text", "content": "hello" }
    });

    let (status, body) = call(&state, post_json("/print", job.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["status"], "queued");
    assert!(body["data"]["jobId"].is_string());

    let (status, body) = call(&state, post_json("/print?wait=true", job)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["success"], true);
}

#[tokio::test]
async fn test_print_to_unknown_printer_carries_suggestions() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path());
    let job = json!({
        "printerId": "usb-dead-beef",
        "payload": { "format": "text", "content": "hello" }
    });

    let (status, body) = call(&state, post_json("/print", job)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("usb-dead-beef"));
    assert!(!body["suggestions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_printer_test_page_runs_through_dispatcher() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path());
    let id = state.registry.snapshot().printers[0].id.clone();

    let (status, body) = call(&state, post_json(&format!("/printers/{}/test", id), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["success"], true);
    assert_eq!(state.dispatcher.stats().completed, 1);

    let (status, _) = call(&state, post_json("/printers/missing/test", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rate_limit_rejects_excess_but_spares_health() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(dir.path(), |c| {
        c.rate_limit.max_requests = 2;
        c.rate_limit.window = Duration::from_secs(60);
    });
    let from = |uri: &str| {
        Request::get(uri)
            .header("x-forwarded-for", "10.1.1.7")
            .body(Body::empty())
            .unwrap()
    };

    assert_eq!(call(&state, from("/printers")).await.0, StatusCode::OK);
    assert_eq!(call(&state, from("/printers")).await.0, StatusCode::OK);
    let response = build_app(state.clone()).oneshot(from("/printers")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));

    let (status, _) = call(&state, from("/ready")).await;
    assert_ne!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_restart_requests_graceful_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path());

    let (status, body) = call(&state, post_json("/service/restart", json!({}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["reason"], "restart");
    assert_eq!(state.lifecycle.current().unwrap().reason, "restart");
}

#[tokio::test]
async fn test_service_info_and_empty_log_tail() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path());

    let (status, body) = call(&state, get("/service/info")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "print-agent");
    assert_eq!(body["data"]["syncStatus"], "disabled");
    assert_eq!(body["data"]["printerCount"], 1);

    let (status, body) = call(&state, get("/service/logs?lines=20")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 0);
}
