//! Built-in health checks

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Disks, System};

use super::{CheckResult, CheckStatus, HealthCheck, RecoveryAction};
use crate::core::tasks::TaskMonitor;
use crate::discovery::{PrinterRegistry, apply_reports, probe_printers};
use crate::sync::{ChannelStatus, SyncHandle};
use crate::usb::UsbManager;

/// Map a usage percentage onto pass/warn/fail
pub fn usage_status(percent: f64, warn: f64, fail: f64) -> CheckStatus {
    if percent >= fail {
        CheckStatus::Fail
    } else if percent >= warn {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

// ==================== memory ====================

/// System memory pressure
///
/// Sustained failure escalates to the emergency path.
pub struct MemoryCheck {
    system: Mutex<System>,
    warn_percent: f64,
    fail_percent: f64,
}

impl MemoryCheck {
    pub fn new(warn_percent: f64, fail_percent: f64) -> Self {
        Self {
            system: Mutex::new(System::new()),
            warn_percent,
            fail_percent,
        }
    }
}

#[async_trait]
impl HealthCheck for MemoryCheck {
    fn name(&self) -> &str {
        "memory"
    }

    async fn check(&self) -> CheckResult {
        let (used, total) = {
            let mut system = self.system.lock();
            system.refresh_memory();
            (system.used_memory(), system.total_memory())
        };
        if total == 0 {
            return CheckResult::warn("memory", "Unable to determine system memory");
        }

        let pct = percent(used, total);
        let status = usage_status(pct, self.warn_percent, self.fail_percent);
        let message = format!("{:.1}% of system memory in use", pct);
        let details = json!({ "usedBytes": used, "totalBytes": total, "percent": pct });
        match status {
            CheckStatus::Pass => CheckResult::pass("memory", message),
            CheckStatus::Warn => CheckResult::warn("memory", message),
            CheckStatus::Fail => CheckResult::fail("memory", message),
        }
        .with_details(details)
    }

    fn recovery(&self) -> Option<RecoveryAction> {
        Some(RecoveryAction::ClearDiscoveryCache)
    }

    fn escalates(&self) -> bool {
        true
    }
}

// ==================== disk ====================

/// Free space on the volume holding the data root
pub struct DiskCheck {
    path: PathBuf,
    warn_percent: f64,
    fail_percent: f64,
}

impl DiskCheck {
    pub fn new(path: impl Into<PathBuf>, warn_percent: f64, fail_percent: f64) -> Self {
        Self {
            path: path.into(),
            warn_percent,
            fail_percent,
        }
    }
}

/// (available, total) bytes of the disk whose mount point is the longest
/// prefix of `path`
fn space_for_path(path: &Path) -> Option<(u64, u64)> {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    disks
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| (d.available_space(), d.total_space()))
}

#[async_trait]
impl HealthCheck for DiskCheck {
    fn name(&self) -> &str {
        "disk"
    }

    async fn check(&self) -> CheckResult {
        let path = self.path.clone();
        let space = tokio::task::spawn_blocking(move || space_for_path(&path))
            .await
            .ok()
            .flatten();

        let Some((available, total)) = space else {
            return CheckResult::warn(
                "disk",
                format!("Unable to determine disk space for {}", self.path.display()),
            );
        };

        let pct = percent(total.saturating_sub(available), total);
        let message = format!(
            "{:.1}% used on volume holding {} ({} MB free)",
            pct,
            self.path.display(),
            available / (1024 * 1024)
        );
        let details = json!({ "availableBytes": available, "totalBytes": total, "percent": pct });
        match usage_status(pct, self.warn_percent, self.fail_percent) {
            CheckStatus::Pass => CheckResult::pass("disk", message),
            CheckStatus::Warn => CheckResult::warn("disk", message),
            CheckStatus::Fail => CheckResult::fail("disk", message),
        }
        .with_details(details)
    }
}

// ==================== sync channel ====================

/// Backend connectivity; losing it degrades to local-only operation
pub struct SyncChannelCheck {
    sync: SyncHandle,
}

impl SyncChannelCheck {
    pub fn new(sync: SyncHandle) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl HealthCheck for SyncChannelCheck {
    fn name(&self) -> &str {
        "sync_channel"
    }

    async fn check(&self) -> CheckResult {
        match self.sync.status() {
            ChannelStatus::Disabled => {
                CheckResult::pass("sync_channel", "Sync disabled (no backend configured)")
            }
            ChannelStatus::Connected => CheckResult::pass("sync_channel", "Connected to backend"),
            ChannelStatus::Connecting => CheckResult::warn("sync_channel", "Connecting to backend"),
            ChannelStatus::Disconnected => {
                CheckResult::fail("sync_channel", "Disconnected from backend")
            }
        }
    }

    fn recovery(&self) -> Option<RecoveryAction> {
        Some(RecoveryAction::ReconnectSyncChannel)
    }

    fn critical(&self) -> bool {
        false
    }
}

// ==================== printers ====================

/// Fraction of known printers that are reachable
///
/// Reachability results are written back to the registry.
pub struct PrinterCheck {
    registry: PrinterRegistry,
    usb: Option<Arc<UsbManager>>,
    timeout: Duration,
}

impl PrinterCheck {
    pub fn new(registry: PrinterRegistry, usb: Option<Arc<UsbManager>>, timeout: Duration) -> Self {
        Self {
            registry,
            usb,
            timeout,
        }
    }
}

#[async_trait]
impl HealthCheck for PrinterCheck {
    fn name(&self) -> &str {
        "printers"
    }

    async fn check(&self) -> CheckResult {
        let snapshot = self.registry.snapshot();
        if snapshot.is_empty() {
            return CheckResult::warn("printers", "No printers discovered");
        }

        let reports = probe_printers(&snapshot.printers, self.usb.as_deref(), self.timeout).await;
        apply_reports(&self.registry, &reports);

        let total = reports.len();
        let reachable = reports.iter().filter(|r| r.reachable).count();
        let unreachable: Vec<&str> = reports
            .iter()
            .filter(|r| !r.reachable)
            .map(|r| r.name.as_str())
            .collect();
        let details = json!({ "total": total, "reachable": reachable, "unreachable": unreachable });
        let message = format!("{reachable}/{total} printers reachable");

        if reachable == total {
            CheckResult::pass("printers", message)
        } else if reachable > 0 {
            CheckResult::warn("printers", message)
        } else {
            CheckResult::fail("printers", message)
        }
        .with_details(details)
    }

    fn recovery(&self) -> Option<RecoveryAction> {
        Some(RecoveryAction::RescanPrinters)
    }

    fn critical(&self) -> bool {
        false
    }
}

// ==================== background tasks ====================

/// No background task may end while the agent is running
pub struct TaskCheck {
    monitor: TaskMonitor,
}

impl TaskCheck {
    pub fn new(monitor: TaskMonitor) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl HealthCheck for TaskCheck {
    fn name(&self) -> &str {
        "background_tasks"
    }

    async fn check(&self) -> CheckResult {
        let failures = self.monitor.failures();
        let registered = self.monitor.registered();
        if failures.is_empty() {
            return CheckResult::pass(
                "background_tasks",
                format!("{registered} background tasks running"),
            );
        }

        let names: Vec<&str> = failures.iter().map(|f| f.name).collect();
        CheckResult::fail(
            "background_tasks",
            format!("{} of {} background tasks stopped: {}", failures.len(), registered, names.join(", ")),
        )
        .with_details(json!({ "failures": failures }))
    }

    fn critical(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{ConnectionType, DiscoveryMethod, PrinterRecord, PrinterStatus};
    use tokio::net::TcpListener;

    #[test]
    fn test_usage_thresholds() {
        assert_eq!(usage_status(50.0, 85.0, 95.0), CheckStatus::Pass);
        assert_eq!(usage_status(85.0, 85.0, 95.0), CheckStatus::Warn);
        assert_eq!(usage_status(99.9, 85.0, 95.0), CheckStatus::Fail);
        assert_eq!(percent(5, 0), 0.0);
    }

    #[tokio::test]
    async fn test_sync_check_maps_channel_status() {
        let check = SyncChannelCheck::new(SyncHandle::disabled());
        let result = check.check().await;
        assert_eq!(result.status, CheckStatus::Pass);
        assert!(!check.critical());
        assert_eq!(check.recovery(), Some(RecoveryAction::ReconnectSyncChannel));
    }

    #[tokio::test]
    async fn test_printer_check_without_printers_warns() {
        let check = PrinterCheck::new(PrinterRegistry::new(), None, Duration::from_millis(100));
        assert_eq!(check.check().await.status, CheckStatus::Warn);
    }

    #[tokio::test]
    async fn test_printer_check_marks_unreachable_offline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };

        let registry = PrinterRegistry::new();
        registry.replace(vec![
            PrinterRecord::new("Bar", ConnectionType::Network, DiscoveryMethod::Network)
                .with_network("127.0.0.1", open),
            PrinterRecord::new("Grill", ConnectionType::Network, DiscoveryMethod::Network)
                .with_network("127.0.0.1", closed),
        ]);

        let check = PrinterCheck::new(registry.clone(), None, Duration::from_millis(300));
        let result = check.check().await;
        assert_eq!(result.status, CheckStatus::Warn);
        assert_eq!(result.message, "1/2 printers reachable");

        let grill = registry.find("Grill").unwrap();
        assert_eq!(grill.status, PrinterStatus::Offline);
    }

    #[tokio::test]
    async fn test_task_check_reports_stopped_tasks() {
        let mut tasks = crate::core::tasks::BackgroundTasks::new(crate::core::lifecycle::Lifecycle::new());
        let check = TaskCheck::new(tasks.monitor());
        assert_eq!(check.check().await.status, CheckStatus::Pass);

        tasks.spawn("quitter", crate::core::tasks::TaskKind::Worker, async {});
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = check.check().await;
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.message.contains("quitter"));
    }
}
