//! Agent-level errors and failure taxonomy
//!
//! Failures are sorted into four kinds by inspecting their message, not
//! their type, so errors that crossed a process or wire boundary (command
//! stderr, backend replies) classify the same way as local ones:
//!
//! | Kind | Examples | Handling |
//! |------|----------|----------|
//! | Network | refused, unreachable, timeout | retryable |
//! | Hardware | no device, printer busy, paper out | surfaced with hints |
//! | Fatal | out of memory, permission denied | emergency shutdown |
//! | Recoverable | anything else | logged, operation fails |

use serde::Serialize;
use shared::error::{AppError, ErrorCode};
use shared::models::JobOutcome;
use thiserror::Error;

use printer_driver::PrintError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Server(#[source] std::io::Error),

    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),

    #[error("fatal fault: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    Hardware,
    Fatal,
    Recoverable,
}

const FATAL_MARKERS: &[&str] = &[
    "out of memory",
    "cannot allocate memory",
    "memory allocation",
    "too many open files",
    "no space left on device",
    "permission denied",
    "operation not permitted",
    "eacces",
    "eperm",
    "emfile",
    "enomem",
    "enospc",
];

const NETWORK_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection failed",
    "network is unreachable",
    "host is unreachable",
    "no route to host",
    "not found: dns",
    "dns",
    "timed out",
    "timeout",
    "econnrefused",
    "enotfound",
    "etimedout",
    "broken pipe",
];

const HARDWARE_MARKERS: &[&str] = &[
    "printer",
    "device",
    "usb",
    "busy",
    "paper",
    "offline",
    "does not exist",
    "not connected",
    "ebusy",
    "enodev",
];

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Network)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::Fatal)
    }

    /// Remediation hints shown to the operator
    pub fn suggestions(&self) -> &'static [&'static str] {
        match self {
            FailureKind::Network => &[
                "Check the network cable or Wi-Fi connection",
                "Verify the printer IP address and port",
                "Retry the operation",
            ],
            FailureKind::Hardware => &[
                "Check printer power and paper",
                "Check the USB or network cable",
                "Verify printer drivers are installed",
            ],
            FailureKind::Fatal => &[
                "Restart the print agent",
                "Check free memory, disk space and file permissions",
            ],
            FailureKind::Recoverable => &["Retry the operation", "Check the agent logs for details"],
        }
    }
}

/// Classify a failure from its message
pub fn classify_failure(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));
    if has(FATAL_MARKERS) {
        FailureKind::Fatal
    } else if has(NETWORK_MARKERS) {
        FailureKind::Network
    } else if has(HARDWARE_MARKERS) {
        FailureKind::Hardware
    } else {
        FailureKind::Recoverable
    }
}

/// Convert a driver error into the API error for a given printer
pub fn print_error_to_app(err: &PrintError, printer: &str) -> AppError {
    let message = err.to_string();
    let kind = classify_failure(&message);
    let code = match err {
        PrintError::Offline(_) | PrintError::Connection(_) => ErrorCode::PrinterOffline,
        PrintError::Timeout(_) => ErrorCode::TimeoutError,
        PrintError::InvalidConfig(_) => ErrorCode::ConfigError,
        PrintError::Spawn { .. } => ErrorCode::SpoolUnavailable,
        PrintError::Io(_) | PrintError::CommandFailed { .. } => ErrorCode::PrintFailed,
    };
    AppError::with_message(code, message)
        .with_detail("printer", printer)
        .with_detail("failureKind", serde_json::json!(kind))
        .with_suggestions(kind.suggestions().iter().copied())
}

/// Attach taxonomy hints to an error that has none yet
pub fn with_remediation(err: AppError) -> AppError {
    if !err.suggestions.is_empty() {
        return err;
    }
    let kind = classify_failure(&err.message);
    err.with_suggestions(kind.suggestions().iter().copied())
}

/// API error for a job that reached `failed`
pub fn job_failure_to_app(outcome: &JobOutcome) -> AppError {
    let message = outcome.error.clone().unwrap_or_else(|| outcome.message.clone());
    let kind = classify_failure(&message);
    let code = if message.starts_with("timeout") {
        ErrorCode::JobTimeout
    } else if message.starts_with("cancelled") {
        ErrorCode::JobCancelled
    } else {
        ErrorCode::PrintFailed
    };
    let mut err = AppError::with_message(code, message)
        .with_detail("jobId", outcome.job_id.clone())
        .with_detail("failureKind", serde_json::json!(kind))
        .with_suggestions(kind.suggestions().iter().copied());
    if let Some(printer) = &outcome.printer_id {
        err = err.with_detail("printer", printer.clone());
    }
    err
}
