//! Error types and API response structures

use super::codes::ErrorCode;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Application error with structured error code, details and remediation hints
///
/// Every HTTP error response and every failed command result carries one of
/// these, so the operator always sees a message and, where it helps, a list
/// of things to try ("check printer power", "verify drivers").
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AppError {
    /// The error code identifying the type of error
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details (context, ids, raw error text)
    pub details: Option<HashMap<String, Value>>,
    /// Remediation suggestions, most useful first
    pub suggestions: Vec<String>,
}

impl AppError {
    /// Create a new error with the default message for the error code
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.message().to_string(),
            code,
            details: None,
            suggestions: Vec::new(),
        }
    }

    /// Create a new error with a custom message
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            suggestions: Vec::new(),
        }
    }

    /// Add a detail entry to this error
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Append a remediation suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Append several remediation suggestions
    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions
            .extend(suggestions.into_iter().map(Into::into));
        self
    }

    /// Get the HTTP status code for this error
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    // ==================== Convenience constructors ====================

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::ValidationFailed, msg)
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        let r = resource.into();
        Self::with_message(ErrorCode::NotFound, format!("{} not found", r))
            .with_detail("resource", r)
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InternalError, msg)
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::StorageError, msg)
    }

    /// No printer matches the given id or name
    pub fn printer_not_found(printer: impl Into<String>) -> Self {
        let p = printer.into();
        Self::with_message(ErrorCode::PrinterNotFound, format!("Printer '{}' not found", p))
            .with_detail("printer", p)
            .with_suggestions([
                "Check that the printer is powered on and connected",
                "Run printer discovery again",
            ])
    }

    /// A job ran out of time
    pub fn job_timeout(job_id: impl Into<String>, timeout_ms: u64) -> Self {
        let id = job_id.into();
        Self::with_message(
            ErrorCode::JobTimeout,
            format!("Job {} timed out after {}ms", id, timeout_ms),
        )
        .with_detail("jobId", id)
        .with_detail("timeoutMs", timeout_ms)
    }

    /// Create a too-many-requests error
    pub fn too_many_requests(retry_after_secs: u64) -> Self {
        Self::new(ErrorCode::TooManyRequests).with_detail("retryAfter", retry_after_secs)
    }

    /// Agent is shutting down and refuses new work
    pub fn shutting_down() -> Self {
        Self::new(ErrorCode::ShuttingDown)
    }
}

/// Unified API response structure
///
/// Every JSON body served by the agent has this shape:
/// - `success`: whether the request succeeded
/// - `timestamp`: RFC 3339 time the response was produced
/// - `data`: response payload (on success)
/// - `error`, `code`, `suggestions`, `details`: failure information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Human-readable error message (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error code (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Value>>,
}

impl<T> ApiResponse<T> {
    /// Create a success response with data
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            timestamp: crate::util::now_rfc3339(),
            data: Some(data),
            error: None,
            code: None,
            suggestions: Vec::new(),
            details: None,
        }
    }
}

impl ApiResponse<()> {
    /// Create a success response without data
    pub fn ok() -> Self {
        Self {
            success: true,
            timestamp: crate::util::now_rfc3339(),
            data: None,
            error: None,
            code: None,
            suggestions: Vec::new(),
            details: None,
        }
    }

    /// Create an error response from an AppError
    pub fn error(err: &AppError) -> Self {
        Self {
            success: false,
            timestamp: crate::util::now_rfc3339(),
            data: None,
            error: Some(err.message.clone()),
            code: Some(err.code.code()),
            suggestions: err.suggestions.clone(),
            details: err.details.clone(),
        }
    }
}

impl<T> From<AppError> for ApiResponse<T> {
    fn from(err: AppError) -> Self {
        Self {
            success: false,
            timestamp: crate::util::now_rfc3339(),
            data: None,
            error: Some(err.message),
            code: Some(err.code.code()),
            suggestions: err.suggestions,
            details: err.details,
        }
    }
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

// ===== Axum Integration =====

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;

        let status = self.http_status();
        let body = ApiResponse::<()>::error(&self);

        // Log system errors
        if matches!(self.code.category(), super::category::ErrorCategory::System) {
            tracing::error!(
                code = %self.code,
                message = %self.message,
                "System error occurred"
            );
        }

        (status, Json(body)).into_response()
    }
}

impl<T: Serialize> axum::response::IntoResponse for ApiResponse<T> {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;

        let status = match self.code {
            None => StatusCode::OK,
            Some(code) => ErrorCode::try_from(code)
                .map(|c| c.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        };

        (status, Json(self)).into_response()
    }
}
