//! Health monitor
//!
//! A fixed battery of [`HealthCheck`]s runs on a timer. Each yields
//! pass/warn/fail; the overall status is the worst of them. Failing checks
//! may name a [`RecoveryAction`] which is executed through the
//! [`RecoveryHandler`] instead of only being reported.
//!
//! Readiness is separate from liveness: the agent is ready only once
//! initialization has completed and no critical check is failing.

pub mod checks;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shared::AppError;

use crate::core::lifecycle::Lifecycle;
use crate::storage::{StateFile, StateStore};

pub use checks::{DiskCheck, MemoryCheck, PrinterCheck, SyncChannelCheck, TaskCheck};

#[derive(Debug, Clone, PartialEq)]
pub struct HealthConfig {
    pub interval: Duration,
    pub memory_warn_percent: f64,
    pub memory_fail_percent: f64,
    pub disk_warn_percent: f64,
    pub disk_fail_percent: f64,
    /// Consecutive failures of an escalating check before emergency stop
    pub memory_escalation_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            memory_warn_percent: 85.0,
            memory_fail_percent: 95.0,
            disk_warn_percent: 85.0,
            disk_fail_percent: 95.0,
            memory_escalation_threshold: 3,
        }
    }
}

/// Outcome of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub duration_ms: u64,
    /// A failing critical check makes the agent not ready
    pub critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CheckResult {
    fn new(name: impl Into<String>, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            duration_ms: 0,
            critical: true,
            details: None,
        }
    }

    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Pass, message)
    }

    pub fn warn(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warn, message)
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Fail, message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Named recovery actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    ClearDiscoveryCache,
    ReconnectSyncChannel,
    RescanPrinters,
}

impl RecoveryAction {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ClearDiscoveryCache => "clear_discovery_cache",
            Self::ReconnectSyncChannel => "reconnect_sync_channel",
            Self::RescanPrinters => "rescan_printers",
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> CheckResult;

    /// Action to run when this check fails
    fn recovery(&self) -> Option<RecoveryAction> {
        None
    }

    fn critical(&self) -> bool {
        true
    }

    /// Sustained failure routes to the emergency path
    fn escalates(&self) -> bool {
        false
    }
}

/// Executes recovery actions against the live agent
#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    async fn recover(&self, action: RecoveryAction) -> Result<String, AppError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOutcome {
    pub check: String,
    pub action: RecoveryAction,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl OverallStatus {
    /// Worst of all checks: any fail is unhealthy, any warn is degraded
    pub fn aggregate(results: &[CheckResult]) -> Self {
        match results.iter().map(|r| r.status).max() {
            Some(CheckStatus::Fail) => Self::Unhealthy,
            Some(CheckStatus::Warn) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: OverallStatus,
    pub ready: bool,
    pub checks: Vec<CheckResult>,
    #[serde(default)]
    pub recoveries: Vec<RecoveryOutcome>,
    pub uptime_secs: u64,
    pub timestamp: i64,
}

/// Upper bound on a single check
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HealthMonitor {
    config: HealthConfig,
    checks: Vec<Arc<dyn HealthCheck>>,
    recovery: Option<Arc<dyn RecoveryHandler>>,
    store: Option<StateStore>,
    lifecycle: Option<Lifecycle>,
    started_at: Instant,
    initialized: AtomicBool,
    consecutive_failures: Mutex<HashMap<String, u32>>,
    latest: RwLock<Option<HealthReport>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            checks: Vec::new(),
            recovery: None,
            store: None,
            lifecycle: None,
            started_at: Instant::now(),
            initialized: AtomicBool::new(false),
            consecutive_failures: Mutex::new(HashMap::new()),
            latest: RwLock::new(None),
        }
    }

    pub fn with_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_recovery(mut self, handler: Arc<dyn RecoveryHandler>) -> Self {
        self.recovery = Some(handler);
        self
    }

    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn check_names(&self) -> Vec<String> {
        self.checks.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Last completed report, if any cycle has run
    pub fn latest(&self) -> Option<HealthReport> {
        self.latest.read().clone()
    }

    /// Readiness from the last cycle
    ///
    /// Before the first cycle only initialization counts.
    pub fn ready(&self) -> bool {
        match &*self.latest.read() {
            Some(report) => self.is_initialized() && !has_critical_failure(&report.checks),
            None => self.is_initialized(),
        }
    }

    /// Run every check concurrently and aggregate
    pub async fn run_checks(&self) -> HealthReport {
        let results = join_all(self.checks.iter().map(|c| run_check(c.as_ref()))).await;

        let mut recoveries = Vec::new();
        for (check, result) in self.checks.iter().zip(&results) {
            let failures = self.track(check.name(), result.status);
            if result.status != CheckStatus::Fail {
                continue;
            }

            warn!(
                check = %result.name,
                consecutive = failures,
                message = %result.message,
                "Health check failed"
            );

            if let Some(action) = check.recovery() {
                recoveries.push(self.recover(check.name(), action).await);
            }

            if check.escalates()
                && failures >= self.config.memory_escalation_threshold
                && let Some(lifecycle) = &self.lifecycle
            {
                lifecycle.emergency(format!(
                    "health check '{}' failed {} consecutive times: {}",
                    result.name, failures, result.message
                ));
            }
        }

        let status = OverallStatus::aggregate(&results);
        let report = HealthReport {
            status,
            ready: self.is_initialized() && !has_critical_failure(&results),
            checks: results,
            recoveries,
            uptime_secs: self.uptime().as_secs(),
            timestamp: shared::util::now_millis(),
        };

        let previous = self.latest.write().replace(report.clone());
        match previous {
            Some(prev) if prev.status != status => {
                info!(from = %prev.status, to = %status, "Health status changed");
            }
            None => info!(status = %status, "Initial health status"),
            _ => debug!(status = %status, "Health cycle complete"),
        }

        if let Some(store) = &self.store
            && let Err(e) = store.save(StateFile::Health, &report).await
        {
            warn!(error = %e, "Failed to persist health snapshot");
        }

        report
    }

    fn track(&self, name: &str, status: CheckStatus) -> u32 {
        let mut counts = self.consecutive_failures.lock();
        if status == CheckStatus::Fail {
            let count = counts.entry(name.to_string()).or_insert(0);
            *count += 1;
            *count
        } else {
            counts.remove(name);
            0
        }
    }

    async fn recover(&self, check: &str, action: RecoveryAction) -> RecoveryOutcome {
        let Some(handler) = &self.recovery else {
            return RecoveryOutcome {
                check: check.to_string(),
                action,
                success: false,
                message: "no recovery handler installed".into(),
            };
        };

        info!(check = %check, action = %action, "Running recovery action");
        match handler.recover(action).await {
            Ok(message) => RecoveryOutcome {
                check: check.to_string(),
                action,
                success: true,
                message,
            },
            Err(e) => {
                warn!(check = %check, action = %action, error = %e, "Recovery action failed");
                RecoveryOutcome {
                    check: check.to_string(),
                    action,
                    success: false,
                    message: e.message,
                }
            }
        }
    }

    /// Periodic loop until shutdown
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_checks().await;
                }
            }
        }
        debug!("Health monitor stopped");
    }
}

async fn run_check(check: &dyn HealthCheck) -> CheckResult {
    let started = Instant::now();
    let mut result = match tokio::time::timeout(CHECK_TIMEOUT, check.check()).await {
        Ok(result) => result,
        Err(_) => CheckResult::fail(
            check.name(),
            format!("check timed out after {}s", CHECK_TIMEOUT.as_secs()),
        ),
    };
    result.critical = check.critical();
    result.duration_ms = started.elapsed().as_millis() as u64;
    result
}

fn has_critical_failure(results: &[CheckResult]) -> bool {
    results
        .iter()
        .any(|r| r.critical && r.status == CheckStatus::Fail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lifecycle::StopKind;
    use std::sync::atomic::AtomicUsize;

    struct Fixed {
        name: &'static str,
        status: CheckStatus,
        recovery: Option<RecoveryAction>,
        escalates: bool,
    }

    impl Fixed {
        fn new(name: &'static str, status: CheckStatus) -> Self {
            Self {
                name,
                status,
                recovery: None,
                escalates: false,
            }
        }
    }

    #[async_trait]
    impl HealthCheck for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn check(&self) -> CheckResult {
            CheckResult::new(self.name, self.status, "fixed")
        }

        fn recovery(&self) -> Option<RecoveryAction> {
            self.recovery
        }

        fn escalates(&self) -> bool {
            self.escalates
        }
    }

    #[derive(Default)]
    struct CountingRecovery {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecoveryHandler for CountingRecovery {
        async fn recover(&self, action: RecoveryAction) -> Result<String, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{action} done"))
        }
    }

    fn monitor(statuses: &[CheckStatus]) -> HealthMonitor {
        let names = ["a", "b", "c", "d"];
        statuses
            .iter()
            .zip(names)
            .fold(HealthMonitor::new(HealthConfig::default()), |m, (s, n)| {
                m.with_check(Arc::new(Fixed::new(n, *s)))
            })
    }

    #[tokio::test]
    async fn test_one_fail_two_pass_is_unhealthy() {
        let m = monitor(&[CheckStatus::Fail, CheckStatus::Pass, CheckStatus::Pass]);
        let report = m.run_checks().await;
        assert_eq!(report.status, OverallStatus::Unhealthy);
        assert_eq!(report.checks.len(), 3);
    }

    #[tokio::test]
    async fn test_one_warn_is_degraded() {
        let m = monitor(&[CheckStatus::Pass, CheckStatus::Warn, CheckStatus::Pass]);
        assert_eq!(m.run_checks().await.status, OverallStatus::Degraded);
    }

    #[tokio::test]
    async fn test_all_pass_is_healthy() {
        let m = monitor(&[CheckStatus::Pass, CheckStatus::Pass]);
        assert_eq!(m.run_checks().await.status, OverallStatus::Healthy);
    }

    #[tokio::test]
    async fn test_ready_requires_initialization() {
        let m = monitor(&[CheckStatus::Pass]);
        assert!(!m.ready());
        assert!(!m.run_checks().await.ready);

        m.mark_initialized();
        assert!(m.run_checks().await.ready);
        assert!(m.ready());
    }

    #[tokio::test]
    async fn test_critical_failure_blocks_readiness() {
        let m = monitor(&[CheckStatus::Fail]);
        m.mark_initialized();
        let report = m.run_checks().await;
        assert!(!report.ready);
        assert!(!m.ready());
    }

    #[tokio::test]
    async fn test_failure_runs_recovery_action() {
        let handler = Arc::new(CountingRecovery::default());
        let mut check = Fixed::new("sync_channel", CheckStatus::Fail);
        check.recovery = Some(RecoveryAction::ReconnectSyncChannel);
        let m = HealthMonitor::new(HealthConfig::default())
            .with_check(Arc::new(check))
            .with_recovery(handler.clone());

        let report = m.run_checks().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.recoveries.len(), 1);
        assert!(report.recoveries[0].success);
        assert_eq!(report.recoveries[0].action, RecoveryAction::ReconnectSyncChannel);
    }

    #[tokio::test]
    async fn test_sustained_failure_escalates_to_emergency() {
        let lifecycle = Lifecycle::new();
        let mut check = Fixed::new("memory", CheckStatus::Fail);
        check.escalates = true;
        let m = HealthMonitor::new(HealthConfig::default())
            .with_check(Arc::new(check))
            .with_lifecycle(lifecycle.clone());

        m.run_checks().await;
        m.run_checks().await;
        assert!(!lifecycle.is_stopping());

        m.run_checks().await;
        let req = lifecycle.current().unwrap();
        assert_eq!(req.kind, StopKind::Emergency);
        assert!(req.reason.contains("memory"));
    }

    #[tokio::test]
    async fn test_snapshot_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let m = monitor(&[CheckStatus::Warn]).with_store(store.clone());
        m.run_checks().await;

        let saved: HealthReport = store.load(StateFile::Health).await.unwrap().unwrap();
        assert_eq!(saved.status, OverallStatus::Degraded);
    }
}
