//! Health routes
//!
//! | Path | Method | Description | Rate limited |
//! |------|--------|-------------|--------------|
//! | /health | GET | latest health report | no |
//! | /ready | GET | readiness (initialized, no critical failure) | no |
//! | /metrics | GET | breakers, jobs, sync, pool counters | yes |
//!
//! `/health` answers 200 while healthy or degraded and 503 when unhealthy.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde::Serialize;

use shared::ApiResponse;
use shared::message::{DiscoveryStatusReport, QueueStatus};

use crate::core::AgentState;
use crate::health::{CheckStatus, HealthReport, OverallStatus};
use crate::printing::DispatchStats;
use crate::resilience::{BreakerSnapshot, PoolStats};
use crate::sync::SyncStats;

pub fn router() -> Router<AgentState> {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
}

/// Latest report, or a fresh run before the first scheduled one
pub async fn health(State(state): State<AgentState>) -> impl IntoResponse {
    let report = match state.health.latest() {
        Some(report) => report,
        None => state.health.run_checks().await,
    };

    if report.status == OverallStatus::Unhealthy {
        let failing: Vec<&str> = report
            .checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .map(|c| c.name.as_str())
            .collect();
        let mut body = ApiResponse::success(report.clone());
        body.success = false;
        body.error = Some(format!("Agent is unhealthy: {}", failing.join(", ")));
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body));
    }
    (StatusCode::OK, Json(ApiResponse::success(report)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    pub ready: bool,
    pub initialized: bool,
    pub stopping: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OverallStatus>,
}

pub async fn ready(State(state): State<AgentState>) -> impl IntoResponse {
    let stopping = state.lifecycle.is_stopping();
    let readiness = Readiness {
        ready: state.health.ready() && !stopping,
        initialized: state.health.is_initialized(),
        stopping,
        status: state.health.latest().map(|r| r.status),
    };

    if readiness.ready {
        return (StatusCode::OK, Json(ApiResponse::success(readiness)));
    }
    let reason = if stopping {
        "Agent is shutting down"
    } else if !readiness.initialized {
        "Agent is still initializing"
    } else {
        "A critical health check is failing"
    };
    let mut body = ApiResponse::success(readiness);
    body.success = false;
    body.error = Some(reason.to_string());
    (StatusCode::SERVICE_UNAVAILABLE, Json(body))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub uptime_secs: u64,
    pub breakers: Vec<BreakerSnapshot>,
    pub jobs: DispatchStats,
    pub queue: QueueStatus,
    pub discovery: DiscoveryStatusReport,
    pub sync: SyncStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_pool: Option<PoolStats>,
    pub rate_limited_clients: usize,
    pub usb_devices: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthReport>,
}

pub async fn metrics(State(state): State<AgentState>) -> Json<ApiResponse<Metrics>> {
    Json(ApiResponse::success(Metrics {
        uptime_secs: state.uptime().as_secs(),
        breakers: state.breakers.snapshots(),
        jobs: state.dispatcher.stats(),
        queue: state.dispatcher.queue_status(),
        discovery: state.discovery.status(),
        sync: state.sync.stats(),
        backend_pool: state.backend.as_ref().map(|b| b.pool_stats()),
        rate_limited_clients: state.rate_limiter.tracked_clients(),
        usb_devices: state.usb.connected().len(),
        health: state.health.latest(),
    }))
}
