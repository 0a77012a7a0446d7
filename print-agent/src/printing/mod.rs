//! Print job queue and dispatcher
//!
//! - [`JobQueue`] - per-printer priority queue
//! - [`Dispatcher`] - one serialized lane per printer, completion signaling
//! - [`JobExecutor`] - delivery to hardware (raw socket or OS spool)

pub mod dispatcher;
pub mod executor;
pub mod queue;

use serde::Serialize;
use std::time::Duration;

use shared::models::{JobOutcome, PrintJob};

pub use dispatcher::{DispatchStats, Dispatcher, DrainReport};
pub use executor::{DeliveryPath, HardwareExecutor, JobExecutor, render_job, test_job_request};
pub use queue::JobQueue;

use crate::core::error::FailureKind;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Bound on a single job's execution
    pub job_timeout: Duration,
    /// OS print command
    pub print_command: String,
    /// Characters per line for rendered text
    pub paper_width: usize,
    /// Finished jobs kept for status queries
    pub history_limit: usize,
    /// Connect timeout for raw-socket printers
    pub socket_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(30),
            print_command: "lp".to_string(),
            paper_width: 48,
            history_limit: 500,
            socket_timeout: Duration::from_secs(5),
        }
    }
}

/// Job lifecycle notification
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEvent {
    Started { job: PrintJob },
    Completed { outcome: JobOutcome },
    Failed {
        outcome: JobOutcome,
        failure: FailureKind,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Started { job } => &job.id,
            JobEvent::Completed { outcome } | JobEvent::Failed { outcome, .. } => &outcome.job_id,
        }
    }
}
