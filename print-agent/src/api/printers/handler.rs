//! Printer API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use std::time::Duration;

use shared::models::{JobOutcome, JobSource, PrinterRecord, PrinterStatusReport};
use shared::{ApiResponse, AppError, AppResult};

use crate::core::AgentState;
use crate::core::error::{job_failure_to_app, with_remediation};
use crate::discovery::{apply_reports, probe_printers};
use crate::printing::test_job_request;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterList {
    pub printers: Vec<PrinterRecord>,
    pub count: usize,
    /// Unix millis of the last discovery replacement
    pub updated_at: i64,
    pub generation: u64,
}

/// GET /printers
pub async fn list(State(state): State<AgentState>) -> Json<ApiResponse<PrinterList>> {
    let snapshot = state.registry.snapshot();
    Json(ApiResponse::success(PrinterList {
        count: snapshot.printers.len(),
        printers: snapshot.printers.clone(),
        updated_at: snapshot.updated_at,
        generation: snapshot.generation,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub total: usize,
    pub reachable: usize,
    pub printers: Vec<PrinterStatusReport>,
}

/// GET /printers/status
pub async fn status(State(state): State<AgentState>) -> Json<ApiResponse<StatusSummary>> {
    let snapshot = state.registry.snapshot();
    let reports = probe_printers(&snapshot.printers, Some(state.usb.as_ref()), PROBE_TIMEOUT).await;
    apply_reports(&state.registry, &reports);

    Json(ApiResponse::success(StatusSummary {
        total: reports.len(),
        reachable: reports.iter().filter(|r| r.reachable).count(),
        printers: reports,
    }))
}

/// POST /printers/{id}/test
pub async fn test(
    State(state): State<AgentState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<JobOutcome>>> {
    let printer = state
        .registry
        .find(&id)
        .ok_or_else(|| AppError::printer_not_found(&id))?;

    let request = test_job_request(&printer, state.config.dispatch.paper_width);
    let job_id = state
        .dispatcher
        .enqueue(request, JobSource::Test)
        .map_err(with_remediation)?;
    tracing::info!(printer_id = %printer.id, job_id = %job_id, "Test page queued");

    let outcome = state
        .dispatcher
        .await_completion(&job_id, state.config.dispatch.job_timeout + Duration::from_secs(1))
        .await?;
    if !outcome.success {
        return Err(job_failure_to_app(&outcome));
    }
    Ok(Json(ApiResponse::success(outcome)))
}
