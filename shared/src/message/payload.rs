use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::AppError;
use crate::models::{DEFAULT_PRIORITY, JobPayload, JobType, PrintJobRequest, PrinterRecord};

// ==================== Handshake ====================

/// Credentials presented when the sync channel connects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    pub license_key: String,
    pub branch_id: String,
    pub device_id: String,
    pub role: String,
    pub app_version: String,
}

impl AgentIdentity {
    /// Room the agent joins on every (re)connect
    pub fn room(&self) -> String {
        format!("branch:{}", self.branch_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOnline {
    pub branch_id: String,
    pub device_id: String,
    pub app_version: String,
    pub printer_count: usize,
    pub timestamp: i64,
}

// ==================== Printer announcements ====================

/// `printer:discovered` payload: the record plus the owning branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterAnnouncement {
    #[serde(flatten)]
    pub printer: PrinterRecord,
    pub branch_id: String,
}

/// `printer:sync:batch-completed` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSyncSummary {
    pub branch_id: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Whether the REST bulk registration path also succeeded
    pub registered: bool,
    pub timestamp: i64,
}

// ==================== Command results ====================

/// Structured error attached to a failed command result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl From<&AppError> for CommandError {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code.code(),
            message: err.message.clone(),
            suggestions: err.suggestions.clone(),
        }
    }
}

/// Result event for any inbound command that can fail
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: i64,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details,
            error: None,
            request_id: None,
            timestamp: crate::util::now_millis(),
        }
    }

    pub fn failed(err: &AppError) -> Self {
        Self {
            success: false,
            message: err.message.clone(),
            details: err
                .details
                .as_ref()
                .and_then(|d| serde_json::to_value(d).ok()),
            error: Some(CommandError::from(err)),
            request_id: None,
            timestamp: crate::util::now_millis(),
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

// ==================== Discovery control ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryAction {
    Start,
    Stop,
    ClearCache,
    ForceNow,
    Reconfigure,
}

impl fmt::Display for DiscoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::ClearCache => "clear-cache",
            Self::ForceNow => "force-now",
            Self::Reconfigure => "reconfigure",
        };
        f.write_str(s)
    }
}

/// `discovery:control` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryControlCommand {
    pub action: DiscoveryAction,
    #[serde(default)]
    pub config: Option<DiscoveryConfigPatch>,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Partial discovery configuration; absent fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_system: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_usb: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_network: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_bluetooth: Option<bool>,
    /// CIDR, e.g. `192.168.1.0/24`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_filter: Option<bool>,
}

/// Which sub-scans contributed to a discovery run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodFlags {
    pub system: bool,
    pub usb: bool,
    pub network: bool,
    pub bluetooth: bool,
}

/// Aggregate result of one discovery run (`discovery:completed`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySummary {
    pub total: usize,
    pub duration_ms: u64,
    pub methods: MethodFlags,
    pub run_count: u64,
    pub timestamp: i64,
}

/// `discovery:status:result` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryStatusReport {
    pub enabled: bool,
    pub running: bool,
    pub run_count: u64,
    pub cached_printers: usize,
    pub last_run_at: Option<i64>,
    pub last_duration_ms: Option<u64>,
    pub last_methods: MethodFlags,
    pub interval_secs: u64,
    pub config: Value,
}

// ==================== Printer test ====================

/// `printer:test` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterTestRequest {
    #[serde(default)]
    pub printer_id: Option<String>,
    #[serde(default)]
    pub printer_name: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl PrinterTestRequest {
    pub fn printer_key(&self) -> Option<&str> {
        self.printer_id
            .as_deref()
            .or(self.printer_name.as_deref())
            .filter(|k| !k.trim().is_empty())
    }
}

/// `printer:test:ack` payload, sent before the test runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterTestAck {
    pub printer_id: Option<String>,
    pub test_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: i64,
}

// ==================== Print commands ====================

/// `print:job` and `print:physical` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintCommand {
    #[serde(flatten)]
    pub job: PrintJobRequest,
    #[serde(default)]
    pub request_id: Option<String>,
    /// Completion wait for commands that answer with a result
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// `print:raw` payload: base64 bytes sent to the printer untouched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPrintCommand {
    #[serde(default)]
    pub printer_id: Option<String>,
    #[serde(default)]
    pub printer_name: Option<String>,
    pub data: String,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RawPrintCommand {
    pub fn to_request(&self) -> PrintJobRequest {
        PrintJobRequest {
            id: None,
            job_type: JobType::Raw,
            printer_id: self.printer_id.clone(),
            printer_name: self.printer_name.clone(),
            payload: JobPayload::Raw {
                data: self.data.clone(),
            },
            priority: self.priority.unwrap_or(DEFAULT_PRIORITY),
        }
    }
}

// ==================== Queue status ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterQueueStatus {
    pub printer_id: String,
    pub queued: usize,
    pub active_job_id: Option<String>,
    pub completed: u64,
    pub failed: u64,
}

/// `print:queue:status:result` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub printers: Vec<PrinterQueueStatus>,
    pub total_queued: usize,
    pub total_active: usize,
    pub timestamp: i64,
}
