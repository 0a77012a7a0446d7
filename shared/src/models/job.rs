//! Print Job Model

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    #[default]
    Receipt,
    KitchenOrder,
    Test,
    Raw,
}

/// Lifecycle: queued -> started -> (completed | failed), each exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Started,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Where a job came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    #[default]
    Sync,
    Http,
    Test,
}

/// Job content
///
/// Text is rendered by the executor (ESC/POS for thermal printers, plain
/// otherwise); raw bytes are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum JobPayload {
    Text { content: String },
    /// Base64-encoded bytes
    Raw { data: String },
}

impl JobPayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn raw(bytes: &[u8]) -> Self {
        Self::Raw {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw { .. })
    }

    /// Decode a raw payload; text payloads return their UTF-8 bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        match self {
            Self::Text { content } => Ok(content.as_bytes().to_vec()),
            Self::Raw { data } => base64::engine::general_purpose::STANDARD.decode(data.trim()),
        }
    }
}

/// Job submission as it arrives over the sync channel or `POST /print`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintJobRequest {
    /// Caller-assigned id; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub job_type: JobType,
    #[serde(default)]
    pub printer_id: Option<String>,
    #[serde(default)]
    pub printer_name: Option<String>,
    pub payload: JobPayload,
    /// Lower number runs first
    #[serde(default = "default_priority")]
    pub priority: u8,
}

pub const DEFAULT_PRIORITY: u8 = 5;

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl PrintJobRequest {
    /// Key used to resolve the target printer: id first, then name
    pub fn printer_key(&self) -> Option<&str> {
        self.printer_id
            .as_deref()
            .or(self.printer_name.as_deref())
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid job transition: {from:?} -> {to:?}")]
pub struct JobTransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// A job owned by the dispatcher until it reaches a terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintJob {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub printer_id: Option<String>,
    pub printer_name: Option<String>,
    pub payload: JobPayload,
    pub priority: u8,
    pub status: JobStatus,
    pub source: JobSource,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub last_error: Option<String>,
}

impl PrintJob {
    pub fn from_request(req: PrintJobRequest, source: JobSource) -> Self {
        Self {
            id: req
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(crate::util::new_id),
            job_type: req.job_type,
            printer_id: req.printer_id,
            printer_name: req.printer_name,
            payload: req.payload,
            priority: req.priority,
            status: JobStatus::Queued,
            source,
            created_at: crate::util::now_millis(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            last_error: None,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<i64, JobTransitionError> {
        let allowed = matches!(
            (self.status, to),
            (JobStatus::Queued, JobStatus::Started)
                | (JobStatus::Started, JobStatus::Completed)
                | (JobStatus::Started, JobStatus::Failed)
                // Rejected before it ever ran (printer vanished, shutdown)
                | (JobStatus::Queued, JobStatus::Failed)
        );
        if !allowed {
            return Err(JobTransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(crate::util::now_millis())
    }

    pub fn mark_started(&mut self) -> Result<(), JobTransitionError> {
        self.started_at = Some(self.transition(JobStatus::Started)?);
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), JobTransitionError> {
        self.completed_at = Some(self.transition(JobStatus::Completed)?);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), JobTransitionError> {
        self.failed_at = Some(self.transition(JobStatus::Failed)?);
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Execution time, once terminal
    pub fn duration_ms(&self) -> Option<i64> {
        let end = self.completed_at.or(self.failed_at)?;
        Some(end - self.started_at.unwrap_or(self.created_at))
    }
}

/// Terminal result of a job, returned to pollers and relayed to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub printer_id: Option<String>,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub timestamp: i64,
}

impl JobOutcome {
    /// Build from a terminal job
    pub fn from_job(job: &PrintJob, printer_id: Option<String>) -> Self {
        let success = job.status == JobStatus::Completed;
        Self {
            job_id: job.id.clone(),
            printer_id,
            success,
            message: if success {
                "Print job completed".to_string()
            } else {
                job.last_error
                    .clone()
                    .unwrap_or_else(|| "Print job failed".to_string())
            },
            error: job.last_error.clone(),
            duration_ms: job.duration_ms(),
            timestamp: crate::util::now_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PrintJobRequest {
        PrintJobRequest {
            id: None,
            job_type: JobType::Receipt,
            printer_id: Some("usb-04b8-0001".into()),
            printer_name: None,
            payload: JobPayload::text("hello"),
            priority: DEFAULT_PRIORITY,
        }
    }

    #[test]
    fn lifecycle_transitions_exactly_once() {
        let mut job = PrintJob::from_request(request(), JobSource::Http);
        assert_eq!(job.status, JobStatus::Queued);
        assert!(!job.id.is_empty());

        job.mark_started().unwrap();
        assert!(job.mark_started().is_err());
        job.mark_completed().unwrap();
        assert!(job.mark_failed("late").is_err());
        assert!(job.mark_completed().is_err());
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.last_error.is_none());
        assert!(job.duration_ms().is_some());
    }

    #[test]
    fn queued_job_can_fail_without_starting() {
        let mut job = PrintJob::from_request(request(), JobSource::Sync);
        job.mark_failed("printer vanished").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.started_at.is_none());
        assert!(job.mark_started().is_err());
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let json = r#"{"printerName":"Kitchen","payload":{"format":"text","content":"x"}}"#;
        let req: PrintJobRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.job_type, JobType::Receipt);
        assert_eq!(req.priority, DEFAULT_PRIORITY);
        assert_eq!(req.printer_key(), Some("Kitchen"));
    }

    #[test]
    fn raw_payload_decodes() {
        let payload = JobPayload::raw(&[0x1b, 0x40, b'A']);
        assert!(payload.is_raw());
        assert_eq!(payload.to_bytes().unwrap(), vec![0x1b, 0x40, b'A']);

        let bad = JobPayload::Raw { data: "%%%".into() };
        assert!(bad.to_bytes().is_err());
    }

    #[test]
    fn outcome_carries_error_message() {
        let mut job = PrintJob::from_request(request(), JobSource::Sync);
        job.mark_started().unwrap();
        job.mark_failed("lp: printer not found").unwrap();

        let outcome = JobOutcome::from_job(&job, Some("usb-04b8-0001".into()));
        assert!(!outcome.success);
        assert_eq!(outcome.message, "lp: printer not found");
        assert_eq!(outcome.error.as_deref(), Some("lp: printer not found"));
    }
}
