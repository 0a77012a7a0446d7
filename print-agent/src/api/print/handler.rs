//! Print API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use shared::models::{JobSource, JobStatus, PrintJob, PrintJobRequest};
use shared::{ApiResponse, AppError, AppResult};

use crate::core::AgentState;
use crate::core::error::{job_failure_to_app, with_remediation};

#[derive(Debug, Default, Deserialize)]
pub struct SubmitQuery {
    /// Block until the job reaches a terminal state
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub job_id: String,
    pub status: JobStatus,
}

/// POST /print
///
/// Answers 202 with the job id, or the terminal outcome with `?wait=true`.
pub async fn submit(
    State(state): State<AgentState>,
    Query(query): Query<SubmitQuery>,
    Json(request): Json<PrintJobRequest>,
) -> AppResult<Response> {
    let job_id = state
        .dispatcher
        .enqueue(request, JobSource::Http)
        .map_err(with_remediation)?;

    if !query.wait {
        let body = ApiResponse::success(Accepted {
            job_id,
            status: JobStatus::Queued,
        });
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let deadline = state.config.dispatch.job_timeout + Duration::from_secs(1);
    let outcome = state.dispatcher.await_completion(&job_id, deadline).await?;
    if !outcome.success {
        return Err(job_failure_to_app(&outcome));
    }
    Ok(Json(ApiResponse::success(outcome)).into_response())
}

/// GET /print/jobs/{id}
pub async fn job(
    State(state): State<AgentState>,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<PrintJob>>> {
    let job = state
        .dispatcher
        .get_job(&id)
        .ok_or_else(|| AppError::not_found(format!("Print job {}", id)))?;
    Ok(Json(ApiResponse::success(job)))
}
