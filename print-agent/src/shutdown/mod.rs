//! Shutdown orchestration
//!
//! # Graceful path
//!
//! Strictly ordered phases, all under one overall deadline:
//!
//! | # | Phase | Action |
//! |---|-------|--------|
//! | 1 | `stop_http` | stop accepting local HTTP requests |
//! | 2 | `drain_jobs` | let in-flight jobs finish, cancel stragglers |
//! | 3 | `persist_state` | printer set and USB device map to disk |
//! | 4 | `close_sync` | close the sync channel cleanly |
//! | 5 | `release_resources` | stop every background task |
//!
//! When the deadline passes the remaining phases are abandoned and the
//! run is reported as forced. Statistics are written either way.
//!
//! # Emergency path
//!
//! [`emergency_snapshot`] writes a best-effort dump synchronously and
//! nothing else; the caller exits right after.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use shared::models::{PrintJob, PrinterRecord};

use crate::core::lifecycle::StopKind;
use crate::core::tasks::BackgroundTasks;
use crate::discovery::PrinterRegistry;
use crate::printing::{DispatchStats, Dispatcher, DrainReport};
use crate::storage::{StateFile, StateStore, StorageResult};
use crate::sync::ChannelStatus;
use crate::sync::channel::wait_closed;
use crate::usb::UsbManager;

#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownConfig {
    /// Hard deadline for the whole phased sequence
    pub overall_timeout: Duration,
    /// Sub-deadline for in-flight jobs
    pub drain_timeout: Duration,
    pub sync_close_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            overall_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(10),
            sync_close_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    pub name: &'static str,
    pub ok: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Written to `shutdown-stats.json` at the end of every graceful run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownStats {
    pub reason: String,
    pub kind: StopKind,
    pub started_at: i64,
    pub finished_at: i64,
    pub phases: Vec<PhaseReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drain: Option<DrainReport>,
    pub jobs: DispatchStats,
    /// Deadline hit before every phase ran
    pub forced: bool,
}

impl ShutdownStats {
    fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
            kind: StopKind::Graceful,
            started_at: shared::util::now_millis(),
            finished_at: 0,
            phases: Vec::new(),
            drain: None,
            jobs: DispatchStats::default(),
            forced: false,
        }
    }

    pub fn phase_names(&self) -> Vec<&'static str> {
        self.phases.iter().map(|p| p.name).collect()
    }
}

/// Contents of `emergency-dump.json`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyDump<'a> {
    pub reason: &'a str,
    pub timestamp: i64,
    pub printers: &'a [PrinterRecord],
    pub queue: Vec<PrintJob>,
    pub jobs: DispatchStats,
}

/// Best-effort synchronous state dump for the emergency path
///
/// Blocking I/O on purpose: the runtime may be the thing that is broken.
pub fn emergency_snapshot(
    store: &StateStore,
    registry: &PrinterRegistry,
    dispatcher: &Dispatcher,
    reason: &str,
) -> StorageResult<()> {
    let snapshot = registry.snapshot();
    let dump = EmergencyDump {
        reason,
        timestamp: shared::util::now_millis(),
        printers: &snapshot.printers,
        queue: dispatcher.queue_snapshot(),
        jobs: dispatcher.stats(),
    };
    store.save_blocking(StateFile::EmergencyDump, &dump)?;
    error!(
        reason,
        printers = snapshot.printers.len(),
        queued = dump.queue.len(),
        "Emergency state dump written"
    );
    Ok(())
}

/// Everything the phased shutdown touches
pub struct ShutdownOrchestrator {
    config: ShutdownConfig,
    http: CancellationToken,
    dispatcher: Dispatcher,
    registry: PrinterRegistry,
    usb: Option<Arc<UsbManager>>,
    store: StateStore,
    sync_token: CancellationToken,
    sync_status: watch::Receiver<ChannelStatus>,
}

impl ShutdownOrchestrator {
    pub fn new(
        config: ShutdownConfig,
        dispatcher: Dispatcher,
        registry: PrinterRegistry,
        store: StateStore,
    ) -> Self {
        let (_, sync_status) = watch::channel(ChannelStatus::Disabled);
        Self {
            config,
            http: CancellationToken::new(),
            dispatcher,
            registry,
            usb: None,
            store,
            sync_token: CancellationToken::new(),
            sync_status,
        }
    }

    /// Token the HTTP server's graceful shutdown waits on
    pub fn with_http(mut self, token: CancellationToken) -> Self {
        self.http = token;
        self
    }

    pub fn with_usb_manager(mut self, usb: Arc<UsbManager>) -> Self {
        self.usb = Some(usb);
        self
    }

    /// Token the sync channel runs under, and its status feed
    pub fn with_sync(mut self, token: CancellationToken, status: watch::Receiver<ChannelStatus>) -> Self {
        self.sync_token = token;
        self.sync_status = status;
        self
    }

    /// Run the phased sequence and persist its statistics
    pub async fn run(self, tasks: BackgroundTasks, reason: &str) -> ShutdownStats {
        info!(reason, timeout_secs = self.config.overall_timeout.as_secs(), "Graceful shutdown started");
        let started = Instant::now();
        let deadline = started + self.config.overall_timeout;
        let mut stats = ShutdownStats::new(reason);

        let completed = tokio::time::timeout(
            self.config.overall_timeout,
            self.run_phases(&mut stats, tasks, deadline),
        )
        .await;
        if completed.is_err() {
            stats.forced = true;
            warn!(
                phases_done = stats.phases.len(),
                "Shutdown deadline reached, forcing exit"
            );
        }

        stats.jobs = self.dispatcher.stats();
        stats.finished_at = shared::util::now_millis();
        if let Err(e) = self.store.save(StateFile::ShutdownStats, &stats).await {
            warn!(error = %e, "Failed to persist shutdown statistics");
        }

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            forced = stats.forced,
            "Shutdown complete"
        );
        stats
    }

    async fn run_phases(&self, stats: &mut ShutdownStats, tasks: BackgroundTasks, deadline: Instant) {
        phase(stats, "stop_http", async {
            self.http.cancel();
            Ok(())
        })
        .await;

        let drain_budget = self.config.drain_timeout.min(remaining(deadline));
        let mut drain = None;
        phase(stats, "drain_jobs", async {
            let report = self.dispatcher.drain(drain_budget).await;
            let result = if report.deadline_hit {
                Err(format!("{} jobs cancelled at drain deadline", report.cancelled))
            } else {
                Ok(())
            };
            drain = Some(report);
            result
        })
        .await;
        stats.drain = drain;

        phase(stats, "persist_state", self.persist_state()).await;

        phase(stats, "close_sync", async {
            self.sync_token.cancel();
            if wait_closed(self.sync_status.clone(), self.config.sync_close_timeout).await {
                Ok(())
            } else {
                Err("sync channel did not close in time".to_string())
            }
        })
        .await;

        let task_budget = remaining(deadline);
        phase(stats, "release_resources", async move {
            match tasks.shutdown(task_budget).await {
                0 => Ok(()),
                aborted => Err(format!("{aborted} tasks aborted")),
            }
        })
        .await;
    }

    async fn persist_state(&self) -> Result<(), String> {
        let snapshot = self.registry.snapshot();
        if let Some(usb) = &self.usb {
            usb.persist().await;
        }
        self.store
            .save(StateFile::Printers, &snapshot.printers)
            .await
            .map_err(|e| e.to_string())
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

async fn phase<F>(stats: &mut ShutdownStats, name: &'static str, fut: F)
where
    F: Future<Output = Result<(), String>>,
{
    let start = Instant::now();
    let result = fut.await;
    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(()) => info!(phase = name, duration_ms, "Shutdown phase complete"),
        Err(e) => warn!(phase = name, duration_ms, error = %e, "Shutdown phase finished with errors"),
    }
    stats.phases.push(PhaseReport {
        name,
        ok: result.is_ok(),
        duration_ms,
        error: result.err(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lifecycle::Lifecycle;
    use crate::core::tasks::TaskKind;
    use crate::printing::{DispatchConfig, JobExecutor};
    use async_trait::async_trait;
    use printer_driver::PrintError;
    use shared::models::{ConnectionType, DiscoveryMethod, JobPayload, JobSource, PrintJobRequest};

    struct SlowExecutor(Duration);

    #[async_trait]
    impl JobExecutor for SlowExecutor {
        async fn execute(&self, _printer: &PrinterRecord, _job: &PrintJob) -> Result<String, PrintError> {
            tokio::time::sleep(self.0).await;
            Ok("sent".into())
        }
    }

    fn setup(job_time: Duration) -> (tempfile::TempDir, StateStore, PrinterRegistry, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let registry = PrinterRegistry::new();
        registry.replace(vec![PrinterRecord::new(
            "Bar",
            ConnectionType::System,
            DiscoveryMethod::System,
        )]);
        let dispatcher = Dispatcher::new(
            DispatchConfig::default(),
            registry.clone(),
            Arc::new(SlowExecutor(job_time)),
        );
        (dir, store, registry, dispatcher)
    }

    fn request() -> PrintJobRequest {
        PrintJobRequest {
            id: None,
            job_type: Default::default(),
            printer_id: None,
            printer_name: Some("Bar".into()),
            payload: JobPayload::text("receipt"),
            priority: 5,
        }
    }

    #[tokio::test]
    async fn test_phases_run_in_order_and_stats_are_written() {
        let (_dir, store, registry, dispatcher) = setup(Duration::from_millis(100));
        let job_id = dispatcher.enqueue(request(), JobSource::Http).unwrap();

        let mut tasks = BackgroundTasks::new(Lifecycle::new());
        let token = tasks.shutdown_token();
        tasks.spawn("ticker", TaskKind::Periodic, async move { token.cancelled().await });

        let http = CancellationToken::new();
        let orchestrator = ShutdownOrchestrator::new(
            ShutdownConfig::default(),
            dispatcher.clone(),
            registry,
            store.clone(),
        )
        .with_http(http.clone());

        let stats = orchestrator.run(tasks, "test").await;
        assert_eq!(
            stats.phase_names(),
            vec!["stop_http", "drain_jobs", "persist_state", "close_sync", "release_resources"]
        );
        assert!(stats.phases.iter().all(|p| p.ok), "{:?}", stats.phases);
        assert!(!stats.forced);
        assert!(http.is_cancelled());
        assert!(!dispatcher.is_accepting());
        assert_eq!(stats.drain.as_ref().unwrap().cancelled, 0);
        assert!(dispatcher.get_job(&job_id).unwrap().status.is_terminal());

        let saved: serde_json::Value = store.load(StateFile::ShutdownStats).await.unwrap().unwrap();
        assert_eq!(saved["reason"], "test");
        assert_eq!(saved["phases"].as_array().unwrap().len(), 5);
        let printers: Vec<PrinterRecord> = store.load(StateFile::Printers).await.unwrap().unwrap();
        assert_eq!(printers.len(), 1);
    }

    #[tokio::test]
    async fn test_overall_deadline_forces_exit() {
        let (_dir, store, registry, dispatcher) = setup(Duration::from_secs(30));
        dispatcher.enqueue(request(), JobSource::Http).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let config = ShutdownConfig {
            overall_timeout: Duration::from_millis(100),
            drain_timeout: Duration::from_secs(10),
            sync_close_timeout: Duration::from_millis(50),
        };
        let orchestrator = ShutdownOrchestrator::new(config, dispatcher, registry, store.clone());
        let stats = orchestrator
            .run(BackgroundTasks::new(Lifecycle::new()), "deadline")
            .await;

        assert!(stats.forced);
        assert!(stats.phases.len() < 5);
        let saved: serde_json::Value = store.load(StateFile::ShutdownStats).await.unwrap().unwrap();
        assert_eq!(saved["forced"], true);
    }

    #[tokio::test]
    async fn test_emergency_snapshot_dumps_printers_and_queue() {
        let (_dir, store, registry, dispatcher) = setup(Duration::from_secs(30));
        dispatcher.enqueue(request(), JobSource::Http).unwrap();
        dispatcher.enqueue(request(), JobSource::Http).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        emergency_snapshot(&store, &registry, &dispatcher, "out of memory").unwrap();

        let dump: serde_json::Value = store.load(StateFile::EmergencyDump).await.unwrap().unwrap();
        assert_eq!(dump["reason"], "out of memory");
        assert_eq!(dump["printers"][0]["name"], "Bar");
        assert!(!dump["queue"].as_array().unwrap().is_empty());
    }
}
