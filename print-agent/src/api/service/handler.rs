//! Service API Handlers

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use sysinfo::System;

use shared::{ApiResponse, AppError, AppResult};

use crate::core::AgentState;
use crate::sync::ChannelStatus;
use crate::utils::logger::{self, DEFAULT_TAIL_LINES};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub kernel: Option<String>,
    pub arch: String,
}

impl HostInfo {
    fn current() -> Self {
        Self {
            hostname: System::host_name(),
            os: System::name(),
            os_version: System::os_version(),
            kernel: System::kernel_version(),
            arch: System::cpu_arch(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub device_id: String,
    pub branch_id: String,
    pub environment: String,
    pub uptime_secs: u64,
    pub started_at: i64,
    pub pid: u32,
    pub data_root: String,
    pub http_addr: String,
    pub sync_status: ChannelStatus,
    pub printer_count: usize,
    pub host: HostInfo,
}

/// GET /service/info
pub async fn info(State(state): State<AgentState>) -> Json<ApiResponse<ServiceInfo>> {
    let config = &state.config;
    Json(ApiResponse::success(ServiceInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        device_id: config.sync.device_id.clone(),
        branch_id: config.sync.branch_id.clone(),
        environment: config.environment.clone(),
        uptime_secs: state.uptime().as_secs(),
        started_at: state.started_at,
        pid: std::process::id(),
        data_root: config.data_root.display().to_string(),
        http_addr: config.http_addr(),
        sync_status: state.sync.status(),
        printer_count: state.registry.len(),
        host: HostInfo::current(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartAccepted {
    pub reason: &'static str,
    pub message: &'static str,
}

/// POST /service/restart
pub async fn restart(
    State(state): State<AgentState>,
) -> (StatusCode, Json<ApiResponse<RestartAccepted>>) {
    tracing::warn!("Restart requested over HTTP");
    state.lifecycle.request_shutdown("restart");
    (
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(RestartAccepted {
            reason: "restart",
            message: "Graceful shutdown started, the service manager will restart the agent",
        })),
    )
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogTail {
    pub count: usize,
    pub lines: Vec<String>,
}

/// GET /service/logs?lines=N
pub async fn logs(
    State(state): State<AgentState>,
    Query(query): Query<LogsQuery>,
) -> AppResult<Json<ApiResponse<LogTail>>> {
    let dir = state.config.logs_dir();
    let requested = query.lines.unwrap_or(DEFAULT_TAIL_LINES);
    let lines = tokio::task::spawn_blocking(move || logger::tail_log(&dir, requested))
        .await
        .map_err(|e| AppError::internal(format!("Log reader failed: {}", e)))?
        .map_err(|e| AppError::internal(format!("Failed to read logs: {}", e)))?;

    Ok(Json(ApiResponse::success(LogTail {
        count: lines.len(),
        lines,
    })))
}
