//! Print job dispatcher
//!
//! One lane per printer. Each lane owns a [`JobQueue`] and a worker task
//! that runs one job at a time, so a printer never sees two jobs at once
//! while different printers print concurrently.
//!
//! Every job is tracked in a watch slot from enqueue until it is pruned
//! from history; [`Dispatcher::await_completion`] waits on that slot and
//! lifecycle events go out on a broadcast channel for the sync channel.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use printer_driver::PrintError;
use shared::error::{AppError, AppResult, ErrorCode};
use shared::message::payload::{PrinterQueueStatus, QueueStatus};
use shared::models::{JobOutcome, JobSource, PrintJob, PrintJobRequest};

use super::{DispatchConfig, JobEvent, JobExecutor, JobQueue};
use crate::core::error::{FailureKind, classify_failure};
use crate::discovery::PrinterRegistry;

#[derive(Debug, Clone)]
struct JobSlot {
    job: PrintJob,
    outcome: Option<JobOutcome>,
}

struct Lane {
    printer_id: String,
    queue: Mutex<JobQueue>,
    notify: Notify,
    active: Mutex<Option<String>>,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Lane {
    fn new(printer_id: String) -> Self {
        Self {
            printer_id,
            queue: Mutex::new(JobQueue::new()),
            notify: Notify::new(),
            active: Mutex::new(None),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    fn pending(&self) -> usize {
        self.queue.lock().len() + usize::from(self.active.lock().is_some())
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub queued: usize,
    pub active: usize,
    pub accepting: bool,
}

/// Result of draining the dispatcher at shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub pending_at_start: usize,
    pub finished: usize,
    pub cancelled: usize,
    pub deadline_hit: bool,
}

enum Failure {
    Print(PrintError),
    Timeout(Duration),
    Cancelled,
}

struct Inner {
    config: DispatchConfig,
    registry: PrinterRegistry,
    executor: Arc<dyn JobExecutor>,
    lanes: DashMap<String, Arc<Lane>>,
    jobs: DashMap<String, watch::Sender<JobSlot>>,
    finished: Mutex<VecDeque<String>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    events: broadcast::Sender<JobEvent>,
    accepting: AtomicBool,
    cancel: CancellationToken,
    counters: Counters,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig, registry: PrinterRegistry, executor: Arc<dyn JobExecutor>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                executor,
                lanes: DashMap::new(),
                jobs: DashMap::new(),
                finished: Mutex::new(VecDeque::new()),
                workers: Mutex::new(Vec::new()),
                events,
                accepting: AtomicBool::new(true),
                cancel: CancellationToken::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    pub fn stop_accepting(&self) {
        if self.inner.accepting.swap(false, Ordering::SeqCst) {
            info!("Dispatcher stopped accepting jobs");
        }
    }

    /// Validate, resolve the printer and queue the job; returns its id
    pub fn enqueue(&self, req: PrintJobRequest, source: JobSource) -> AppResult<String> {
        if !self.is_accepting() {
            return Err(AppError::shutting_down());
        }
        let key = req.printer_key().map(str::to_string).ok_or_else(|| {
            AppError::with_message(ErrorCode::RequiredField, "printerId or printerName is required")
        })?;
        let printer = self
            .inner
            .registry
            .find(&key)
            .ok_or_else(|| AppError::printer_not_found(&key))?;
        req.payload.to_bytes().map_err(|e| {
            AppError::with_message(ErrorCode::InvalidPayload, format!("Invalid raw payload: {e}"))
                .with_suggestion("Send raw data as standard base64")
        })?;

        let mut job = PrintJob::from_request(req, source);
        job.printer_id = Some(printer.id.clone());
        job.printer_name = Some(printer.name.clone());
        let id = job.id.clone();

        match self.inner.jobs.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(AppError::with_message(
                    ErrorCode::AlreadyExists,
                    format!("Job {} already exists", id),
                ));
            }
            Entry::Vacant(slot) => {
                let (tx, _) = watch::channel(JobSlot {
                    job: job.clone(),
                    outcome: None,
                });
                slot.insert(tx);
            }
        }

        let lane = self.lane(&printer.id);
        lane.queue.lock().push(job);
        lane.notify.notify_one();
        self.inner.counters.enqueued.fetch_add(1, Ordering::Relaxed);

        info!(job_id = %id, printer_id = %printer.id, ?source, "Job queued");
        Ok(id)
    }

    /// Wait for a job to finish, up to `timeout`
    pub async fn await_completion(&self, job_id: &str, timeout: Duration) -> AppResult<JobOutcome> {
        let mut rx = self
            .inner
            .jobs
            .get(job_id)
            .map(|slot| slot.subscribe())
            .ok_or_else(|| AppError::with_message(ErrorCode::JobNotFound, format!("Job {} not found", job_id)))?;

        let wait = async {
            rx.wait_for(|slot| slot.outcome.is_some())
                .await
                .map(|slot| slot.outcome.clone())
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(Some(outcome))) => Ok(outcome),
            Ok(_) => Err(AppError::internal(format!("Tracking for job {} was dropped", job_id))),
            Err(_) => Err(AppError::job_timeout(job_id, timeout.as_millis() as u64)),
        }
    }

    pub fn get_job(&self, job_id: &str) -> Option<PrintJob> {
        self.inner.jobs.get(job_id).map(|slot| slot.borrow().job.clone())
    }

    /// Jobs that have not reached a terminal state
    pub fn queue_snapshot(&self) -> Vec<PrintJob> {
        let mut jobs: Vec<PrintJob> = self
            .inner
            .jobs
            .iter()
            .map(|slot| slot.borrow().job.clone())
            .filter(|job| !job.status.is_terminal())
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    pub fn queue_status(&self) -> QueueStatus {
        let mut printers: Vec<PrinterQueueStatus> = self
            .inner
            .lanes
            .iter()
            .map(|lane| PrinterQueueStatus {
                printer_id: lane.printer_id.clone(),
                queued: lane.queue.lock().len(),
                active_job_id: lane.active.lock().clone(),
                completed: lane.completed.load(Ordering::Relaxed),
                failed: lane.failed.load(Ordering::Relaxed),
            })
            .collect();
        printers.sort_by(|a, b| a.printer_id.cmp(&b.printer_id));
        QueueStatus {
            total_queued: printers.iter().map(|p| p.queued).sum(),
            total_active: printers.iter().filter(|p| p.active_job_id.is_some()).count(),
            printers,
            timestamp: shared::util::now_millis(),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.inner.counters;
        let status = self.queue_status();
        DispatchStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            queued: status.total_queued,
            active: status.total_active,
            accepting: self.is_accepting(),
        }
    }

    /// Queued plus running jobs
    pub fn pending(&self) -> usize {
        self.inner.lanes.iter().map(|lane| lane.pending()).sum()
    }

    /// Stop intake, let in-flight work finish up to `deadline`, then cancel
    /// whatever is left
    pub async fn drain(&self, deadline: Duration) -> DrainReport {
        self.stop_accepting();
        let pending_at_start = self.pending();
        let cancelled_before = self.inner.counters.cancelled.load(Ordering::Relaxed);

        let settled = async {
            while self.pending() > 0 {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        };
        let deadline_hit = tokio::time::timeout(deadline, settled).await.is_err();
        if deadline_hit {
            warn!(remaining = self.pending(), "Drain deadline reached, cancelling jobs");
        }

        self.inner.cancel.cancel();
        for lane in self.inner.lanes.iter() {
            let stragglers = lane.queue.lock().drain_ordered();
            for job in stragglers {
                self.finish(&lane, job, Err(Failure::Cancelled), None);
            }
        }

        let workers: Vec<_> = std::mem::take(&mut *self.inner.workers.lock());
        let _ = tokio::time::timeout(Duration::from_secs(1), futures::future::join_all(workers)).await;

        let cancelled =
            (self.inner.counters.cancelled.load(Ordering::Relaxed) - cancelled_before) as usize;
        let report = DrainReport {
            pending_at_start,
            finished: pending_at_start.saturating_sub(cancelled),
            cancelled,
            deadline_hit,
        };
        info!(?report, "Dispatcher drained");
        report
    }

    fn lane(&self, printer_id: &str) -> Arc<Lane> {
        if let Some(lane) = self.inner.lanes.get(printer_id) {
            return lane.clone();
        }
        let lane = self
            .inner
            .lanes
            .entry(printer_id.to_string())
            .or_insert_with(|| {
                let lane = Arc::new(Lane::new(printer_id.to_string()));
                let worker = tokio::spawn(self.clone().run_lane(lane.clone()));
                self.inner.workers.lock().push(worker);
                debug!(printer_id, "Printer lane created");
                lane
            })
            .clone();
        lane
    }

    async fn run_lane(self, lane: Arc<Lane>) {
        loop {
            let next = {
                let mut queue = lane.queue.lock();
                let job = queue.pop();
                if let Some(job) = &job {
                    *lane.active.lock() = Some(job.id.clone());
                }
                job
            };
            match next {
                Some(job) => self.run_job(&lane, job).await,
                None => {
                    tokio::select! {
                        _ = self.inner.cancel.cancelled() => break,
                        _ = lane.notify.notified() => {}
                    }
                }
            }
        }
        debug!(printer_id = %lane.printer_id, "Printer lane stopped");
    }

    async fn run_job(&self, lane: &Lane, mut job: PrintJob) {
        let Some(printer) = self.inner.registry.find(&lane.printer_id) else {
            let err = PrintError::Offline(format!("printer {} is no longer available", lane.printer_id));
            *lane.active.lock() = None;
            self.finish(lane, job, Err(Failure::Print(err)), None);
            return;
        };

        if let Err(e) = job.mark_started() {
            error!(job_id = %job.id, error = %e, "Job could not start");
            *lane.active.lock() = None;
            return;
        }
        self.publish(&job, None);
        let _ = self.inner.events.send(JobEvent::Started { job: job.clone() });
        debug!(job_id = %job.id, printer_id = %printer.id, "Job started");

        let timeout = self.inner.config.job_timeout;
        let result = tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(Failure::Cancelled),
            r = tokio::time::timeout(timeout, self.inner.executor.execute(&printer, &job)) => match r {
                Ok(Ok(note)) => Ok(note),
                Ok(Err(e)) => Err(Failure::Print(e)),
                Err(_) => Err(Failure::Timeout(timeout)),
            },
        };

        *lane.active.lock() = None;
        match result {
            Ok(note) => self.finish(lane, job, Ok(()), Some(note)),
            Err(failure) => self.finish(lane, job, Err(failure), None),
        }
    }

    fn finish(
        &self,
        lane: &Lane,
        mut job: PrintJob,
        result: Result<(), Failure>,
        note: Option<String>,
    ) {
        let counters = &self.inner.counters;
        let event = match result {
            Ok(()) => {
                if let Err(e) = job.mark_completed() {
                    error!(job_id = %job.id, error = %e, "Invalid completion");
                    return;
                }
                counters.completed.fetch_add(1, Ordering::Relaxed);
                lane.completed.fetch_add(1, Ordering::Relaxed);
                let mut outcome = JobOutcome::from_job(&job, job.printer_id.clone());
                if let Some(note) = note {
                    outcome.message = note;
                }
                info!(job_id = %job.id, printer_id = %lane.printer_id, duration_ms = ?outcome.duration_ms, "Job completed");
                JobEvent::Completed { outcome }
            }
            Err(failure) => {
                let reason = match &failure {
                    Failure::Print(e) => e.to_string(),
                    Failure::Timeout(d) => {
                        counters.timed_out.fetch_add(1, Ordering::Relaxed);
                        format!("timeout: job exceeded {}ms", d.as_millis())
                    }
                    Failure::Cancelled => {
                        counters.cancelled.fetch_add(1, Ordering::Relaxed);
                        "cancelled: agent shutting down".to_string()
                    }
                };
                let kind = match &failure {
                    Failure::Print(_) => classify_failure(&reason),
                    Failure::Timeout(_) => FailureKind::Network,
                    Failure::Cancelled => FailureKind::Recoverable,
                };
                if let Err(e) = job.mark_failed(&reason) {
                    error!(job_id = %job.id, error = %e, "Invalid failure transition");
                    return;
                }
                counters.failed.fetch_add(1, Ordering::Relaxed);
                lane.failed.fetch_add(1, Ordering::Relaxed);
                warn!(job_id = %job.id, printer_id = %lane.printer_id, failure = ?kind, reason = %reason, "Job failed");
                JobEvent::Failed {
                    outcome: JobOutcome::from_job(&job, job.printer_id.clone()),
                    failure: kind,
                }
            }
        };

        let outcome = match &event {
            JobEvent::Completed { outcome } | JobEvent::Failed { outcome, .. } => Some(outcome.clone()),
            JobEvent::Started { .. } => None,
        };
        self.publish(&job, outcome);
        let _ = self.inner.events.send(event);
        self.remember(job.id);
    }

    fn publish(&self, job: &PrintJob, outcome: Option<JobOutcome>) {
        if let Some(tx) = self.inner.jobs.get(&job.id) {
            tx.send_replace(JobSlot {
                job: job.clone(),
                outcome,
            });
        }
    }

    /// Keep at most `history_limit` finished jobs
    fn remember(&self, job_id: String) {
        let mut finished = self.inner.finished.lock();
        finished.push_back(job_id);
        while finished.len() > self.inner.config.history_limit {
            if let Some(old) = finished.pop_front() {
                self.inner.jobs.remove(&old);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shared::models::{
        ConnectionType, DiscoveryMethod, JobPayload, JobStatus, JobType, PrinterRecord,
    };

    /// Records execution order; fails or stalls on request
    #[derive(Default)]
    struct ScriptedExecutor {
        order: Mutex<Vec<String>>,
        delay: Duration,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl JobExecutor for ScriptedExecutor {
        async fn execute(&self, _printer: &PrinterRecord, job: &PrintJob) -> Result<String, PrintError> {
            self.order.lock().push(job.id.clone());
            tokio::time::sleep(self.delay).await;
            match &self.fail_with {
                Some(stderr) => Err(PrintError::CommandFailed {
                    code: Some(1),
                    stderr: stderr.clone(),
                }),
                None => Ok(format!("printed {}", job.id)),
            }
        }
    }

    fn registry() -> PrinterRegistry {
        let registry = PrinterRegistry::new();
        registry.replace(vec![
            PrinterRecord::new("Kitchen", ConnectionType::System, DiscoveryMethod::System),
            PrinterRecord::new("Bar", ConnectionType::System, DiscoveryMethod::System),
        ]);
        registry
    }

    fn request(id: &str, printer: &str, priority: u8) -> PrintJobRequest {
        PrintJobRequest {
            id: Some(id.into()),
            job_type: JobType::Receipt,
            printer_id: None,
            printer_name: Some(printer.into()),
            payload: JobPayload::text("hello"),
            priority,
        }
    }

    fn dispatcher(executor: ScriptedExecutor, job_timeout: Duration) -> (Dispatcher, Arc<ScriptedExecutor>) {
        let executor = Arc::new(executor);
        let config = DispatchConfig {
            job_timeout,
            ..Default::default()
        };
        (Dispatcher::new(config, registry(), executor.clone()), executor)
    }

    #[tokio::test]
    async fn test_job_completes_and_emits_events() {
        let (d, _) = dispatcher(ScriptedExecutor::default(), Duration::from_secs(5));
        let mut events = d.subscribe();

        let id = d.enqueue(request("j1", "kitchen", 5), JobSource::Http).unwrap();
        let outcome = d.await_completion(&id, Duration::from_secs(2)).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.message, "printed j1");
        assert_eq!(outcome.printer_id.as_deref(), Some("name-kitchen"));

        assert!(matches!(events.recv().await.unwrap(), JobEvent::Started { .. }));
        assert!(matches!(events.recv().await.unwrap(), JobEvent::Completed { .. }));
        assert_eq!(d.get_job(&id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_lane_runs_by_priority_then_fifo() {
        let (d, exec) = dispatcher(
            ScriptedExecutor {
                delay: Duration::from_millis(30),
                ..Default::default()
            },
            Duration::from_secs(5),
        );
        // First job occupies the lane while the rest queue up
        d.enqueue(request("first", "kitchen", 5), JobSource::Http).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        d.enqueue(request("low", "kitchen", 9), JobSource::Http).unwrap();
        d.enqueue(request("high-a", "kitchen", 1), JobSource::Http).unwrap();
        d.enqueue(request("high-b", "kitchen", 1), JobSource::Http).unwrap();

        d.await_completion("low", Duration::from_secs(2)).await.unwrap();
        assert_eq!(*exec.order.lock(), vec!["first", "high-a", "high-b", "low"]);
    }

    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let (d, _) = dispatcher(
            ScriptedExecutor {
                fail_with: Some("lp: printer jammed".into()),
                ..Default::default()
            },
            Duration::from_secs(5),
        );
        let id = d.enqueue(request("j", "bar", 5), JobSource::Sync).unwrap();
        let outcome = d.await_completion(&id, Duration::from_secs(2)).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("lp: printer jammed"));
        assert_eq!(d.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_timeout_fails_job_without_retry() {
        let (d, exec) = dispatcher(
            ScriptedExecutor {
                delay: Duration::from_secs(5),
                ..Default::default()
            },
            Duration::from_millis(50),
        );
        let id = d.enqueue(request("slow", "bar", 5), JobSource::Http).unwrap();
        let outcome = d.await_completion(&id, Duration::from_secs(2)).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("timeout"));
        assert_eq!(exec.order.lock().len(), 1);
        assert_eq!(d.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn test_await_never_returns_early() {
        let (d, _) = dispatcher(
            ScriptedExecutor {
                delay: Duration::from_millis(300),
                ..Default::default()
            },
            Duration::from_secs(5),
        );
        let id = d.enqueue(request("j", "bar", 5), JobSource::Http).unwrap();
        let err = d.await_completion(&id, Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::JobTimeout);
        assert!(!d.get_job(&id).unwrap().status.is_terminal());
    }

    #[tokio::test]
    async fn test_rejections() {
        let (d, _) = dispatcher(ScriptedExecutor::default(), Duration::from_secs(5));
        let err = d.enqueue(request("x", "nowhere", 5), JobSource::Http).unwrap_err();
        assert_eq!(err.code, ErrorCode::PrinterNotFound);
        assert!(!err.suggestions.is_empty());

        let mut bad = request("y", "bar", 5);
        bad.payload = JobPayload::Raw { data: "%%%".into() };
        assert_eq!(d.enqueue(bad, JobSource::Http).unwrap_err().code, ErrorCode::InvalidPayload);

        d.stop_accepting();
        let err = d.enqueue(request("z", "bar", 5), JobSource::Http).unwrap_err();
        assert_eq!(err.code, ErrorCode::ShuttingDown);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_duplicate_job_id_accepted_once_under_contention() {
        let (d, executor) = dispatcher(ScriptedExecutor::default(), Duration::from_secs(5));
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let d = d.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    d.enqueue(request("dup", "bar", 5), JobSource::Sync)
                })
            })
            .collect();

        let mut accepted = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(id) => {
                    assert_eq!(id, "dup");
                    accepted += 1;
                }
                Err(e) => assert_eq!(e.code, ErrorCode::AlreadyExists),
            }
        }
        assert_eq!(accepted, 1);

        let outcome = d.await_completion("dup", Duration::from_secs(2)).await.unwrap();
        assert!(outcome.success);
        assert_eq!(executor.order.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_drain_cancels_stragglers() {
        let (d, _) = dispatcher(
            ScriptedExecutor {
                delay: Duration::from_secs(5),
                ..Default::default()
            },
            Duration::from_secs(10),
        );
        d.enqueue(request("a", "bar", 5), JobSource::Http).unwrap();
        d.enqueue(request("b", "bar", 5), JobSource::Http).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = d.drain(Duration::from_millis(50)).await;
        assert!(report.deadline_hit);
        assert_eq!(report.pending_at_start, 2);
        assert_eq!(report.cancelled, 2);
        assert_eq!(d.get_job("a").unwrap().status, JobStatus::Failed);
        assert_eq!(d.get_job("b").unwrap().status, JobStatus::Failed);
        assert_eq!(d.pending(), 0);
    }

    #[tokio::test]
    async fn test_queue_status_per_printer() {
        let (d, _) = dispatcher(
            ScriptedExecutor {
                delay: Duration::from_millis(200),
                ..Default::default()
            },
            Duration::from_secs(5),
        );
        d.enqueue(request("a", "bar", 5), JobSource::Http).unwrap();
        d.enqueue(request("b", "bar", 5), JobSource::Http).unwrap();
        d.enqueue(request("c", "kitchen", 5), JobSource::Http).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let status = d.queue_status();
        assert_eq!(status.printers.len(), 2);
        assert_eq!(status.total_active, 2);
        assert_eq!(status.total_queued, 1);
        let bar = status.printers.iter().find(|p| p.printer_id == "name-bar").unwrap();
        assert_eq!(bar.active_job_id.as_deref(), Some("a"));
        assert_eq!(d.queue_snapshot().len(), 3);
    }
}
