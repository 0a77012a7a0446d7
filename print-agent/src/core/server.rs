//! Server Implementation
//!
//! Starts the background tasks and the local HTTP surface, then waits for
//! a stop request and runs either the phased shutdown or the emergency dump.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::error::{AgentError, FailureKind, Result};
use super::lifecycle::{Lifecycle, StopKind};
use super::state::{AgentState, Bootstrap};
use super::tasks::{BackgroundTasks, TaskKind};
use crate::printing::JobEvent;
use crate::shutdown::{ShutdownOrchestrator, ShutdownStats, emergency_snapshot};
use crate::storage::StateFile;
use crate::sync::SyncChannel;
use crate::usb::watch_device_nodes;
use crate::utils::logger;

/// How the process ended
#[derive(Debug)]
pub enum RunOutcome {
    Graceful(ShutdownStats),
    Emergency { reason: String },
}

impl RunOutcome {
    /// 0 clean, 1 forced past the shutdown deadline, 2 emergency
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Graceful(stats) if stats.forced => 1,
            RunOutcome::Graceful(_) => 0,
            RunOutcome::Emergency { .. } => 2,
        }
    }
}

/// HTTP Server
pub struct Server {
    state: AgentState,
    tasks: BackgroundTasks,
    sync_channel: SyncChannel,
    device_dir: PathBuf,
}

impl Server {
    pub fn new(boot: Bootstrap) -> Self {
        Self {
            state: boot.state,
            tasks: boot.tasks,
            sync_channel: boot.sync_channel,
            device_dir: boot.device_dir,
        }
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub async fn run(self) -> Result<RunOutcome> {
        let Server {
            state,
            mut tasks,
            sync_channel,
            device_dir,
        } = self;

        install_panic_hook(state.lifecycle.clone());

        let restored = state.usb.load_persisted().await;
        state.discovery.load_persisted().await;
        info!(usb_devices = restored, printers = state.registry.len(), "Persisted state restored");

        let shutdown = tasks.shutdown_token();
        // Closed in its own shutdown phase, after jobs have drained
        let sync_token = shutdown.child_token();
        let http_token = CancellationToken::new();

        spawn_tasks(&state, &mut tasks, sync_channel, sync_token.clone(), device_dir);
        tasks.log_summary();

        let addr = state.config.http_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| AgentError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let app = crate::api::build_app(state.clone());
        let serve_token = http_token.clone();
        let http = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(serve_token.cancelled_owned())
            .await
        });
        info!(addr = %addr, environment = %state.config.environment, "Print agent listening");

        let request = state.lifecycle.stopped().await;
        let stop_started = Instant::now();
        if request.kind == StopKind::Emergency {
            http_token.cancel();
            return Ok(emergency_exit(&state, request.reason));
        }

        let orchestrator = ShutdownOrchestrator::new(
            state.config.shutdown.clone(),
            state.dispatcher.clone(),
            state.registry.clone(),
            state.store.clone(),
        )
        .with_http(http_token.clone())
        .with_usb_manager(state.usb.clone())
        .with_sync(sync_token, state.sync.status_rx());

        let overall = state.config.shutdown.overall_timeout;
        let (mut outcome, http_grace) = tokio::select! {
            stats = orchestrator.run(tasks, &request.reason) => {
                (RunOutcome::Graceful(stats), overall.saturating_sub(stop_started.elapsed()))
            }
            emergency = state.lifecycle.emergency_requested() => {
                http_token.cancel();
                (emergency_exit(&state, emergency.reason), Duration::ZERO)
            }
        };

        // Open connections get whatever is left of the shutdown deadline
        if !join_http(http, http_grace).await
            && let RunOutcome::Graceful(stats) = &mut outcome
        {
            stats.forced = true;
            if let Err(e) = state.store.save(StateFile::ShutdownStats, &*stats).await {
                warn!(error = %e, "Failed to update shutdown statistics");
            }
        }
        Ok(outcome)
    }
}

/// Wait for the HTTP server to finish its open connections, at most `limit`
///
/// Returns false when connections were still open and the server was aborted.
async fn join_http(mut http: JoinHandle<std::io::Result<()>>, limit: Duration) -> bool {
    match tokio::time::timeout(limit, &mut http).await {
        Ok(Ok(Ok(()))) => true,
        Ok(Ok(Err(e))) => {
            warn!(error = %e, "HTTP server ended with an error");
            true
        }
        Ok(Err(e)) => {
            warn!(error = %e, "HTTP server task failed");
            true
        }
        Err(_) => {
            http.abort();
            warn!(
                waited_ms = limit.as_millis() as u64,
                "HTTP connections still open at the shutdown deadline, aborting"
            );
            false
        }
    }
}

fn spawn_tasks(
    state: &AgentState,
    tasks: &mut BackgroundTasks,
    sync_channel: SyncChannel,
    sync_token: CancellationToken,
    device_dir: PathBuf,
) {
    let token = tasks.shutdown_token();

    tasks.spawn("usb_manager", TaskKind::Worker, state.usb.clone().run(token.clone()));
    tasks.spawn(
        "usb_hotplug",
        TaskKind::Listener,
        watch_device_nodes(device_dir, state.usb.hotplug_sender(), token.clone()),
    );
    tasks.spawn("discovery", TaskKind::Periodic, state.discovery.clone().run(token.clone()));
    tasks.spawn("sync_channel", TaskKind::Worker, sync_channel.run(sync_token));

    // Readiness waits for the first discovery pass, bounded so a hung
    // scanner cannot hold the agent unready forever
    let health = state.health.clone();
    let discovery = state.discovery.clone();
    let first_run = state.config.discovery.scan_timeout * 2;
    let health_token = token.clone();
    tasks.spawn("health", TaskKind::Periodic, async move {
        tokio::select! {
            _ = health_token.cancelled() => return,
            result = tokio::time::timeout(first_run, discovery.wait_for_first_run()) => {
                if result.is_err() {
                    warn!(waited_secs = first_run.as_secs(), "First discovery run still pending, marking ready");
                }
            }
        }
        health.mark_initialized();
        health.run(health_token).await;
    });

    let limiter = state.rate_limiter.clone();
    let sweep_token = token.clone();
    tasks.spawn("rate_limit_sweep", TaskKind::Periodic, async move {
        let mut ticker = tokio::time::interval(limiter.config().sweep_interval);
        loop {
            tokio::select! {
                _ = sweep_token.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = limiter.sweep();
                    if removed > 0 {
                        tracing::debug!(removed, "Rate limiter windows swept");
                    }
                }
            }
        }
    });

    tasks.spawn(
        "log_cleanup",
        TaskKind::Periodic,
        logger::periodic_cleanup(
            state.config.logs_dir(),
            state.config.log_retention_days,
            token.clone(),
        ),
    );

    tasks.spawn(
        "job_watch",
        TaskKind::Listener,
        watch_fatal_jobs(state.dispatcher.subscribe(), state.lifecycle.clone(), token.clone()),
    );
    tasks.spawn("signals", TaskKind::Listener, watch_signals(state.lifecycle.clone(), token));
}

/// A job that failed with a fatal fault takes the agent down
async fn watch_fatal_jobs(
    mut events: tokio::sync::broadcast::Receiver<JobEvent>,
    lifecycle: Lifecycle,
    shutdown: CancellationToken,
) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(JobEvent::Failed {
                outcome,
                failure: FailureKind::Fatal,
            }) => {
                let message = outcome.error.unwrap_or(outcome.message);
                error!(job_id = %outcome.job_id, error = %message, "Fatal fault during print job");
                lifecycle.emergency(format!("fatal job failure: {}", message));
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "Job watcher lagged"),
            Err(RecvError::Closed) => {
                // Dispatcher gone; nothing left to watch
                shutdown.cancelled().await;
                break;
            }
        }
    }
}

/// First signal stops gracefully, a second one forces the emergency path
async fn watch_signals(lifecycle: Lifecycle, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            signal = shutdown_signal() => {
                if lifecycle.is_stopping() {
                    lifecycle.emergency(format!("second {} during shutdown", signal));
                } else {
                    lifecycle.request_shutdown(signal);
                }
            }
        }
    }
}

/// Resolves with the name of the first SIGINT or SIGTERM
async fn shutdown_signal() -> &'static str {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

fn emergency_exit(state: &AgentState, reason: String) -> RunOutcome {
    error!(reason = %reason, "Emergency shutdown");
    if let Err(e) = emergency_snapshot(&state.store, &state.registry, &state.dispatcher, &reason) {
        error!(error = %e, "Emergency state dump failed");
    }
    RunOutcome::Emergency { reason }
}

/// Route panics outside task boundaries to the emergency path
fn install_panic_hook(lifecycle: Lifecycle) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".into());
        lifecycle.emergency(format!("panic at {}", location));
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::JobOutcome;

    fn failed(kind: FailureKind) -> JobEvent {
        JobEvent::Failed {
            outcome: JobOutcome {
                job_id: "job-1".into(),
                printer_id: Some("p1".into()),
                success: false,
                message: "Print job failed".into(),
                error: Some("lp: permission denied".into()),
                duration_ms: Some(3),
                timestamp: 0,
            },
            failure: kind,
        }
    }

    #[tokio::test]
    async fn test_fatal_job_failure_triggers_emergency() {
        let (tx, rx) = tokio::sync::broadcast::channel(8);
        let lifecycle = Lifecycle::new();
        let token = CancellationToken::new();
        let watcher = tokio::spawn(watch_fatal_jobs(rx, lifecycle.clone(), token.clone()));

        tx.send(failed(FailureKind::Hardware)).unwrap();
        tx.send(failed(FailureKind::Fatal)).unwrap();

        let req = tokio::time::timeout(Duration::from_secs(1), lifecycle.emergency_requested())
            .await
            .unwrap();
        assert_eq!(req.kind, StopKind::Emergency);
        assert!(req.reason.contains("permission denied"));

        token.cancel();
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn test_non_fatal_failures_leave_agent_running() {
        let (tx, rx) = tokio::sync::broadcast::channel(8);
        let lifecycle = Lifecycle::new();
        let token = CancellationToken::new();
        let watcher = tokio::spawn(watch_fatal_jobs(rx, lifecycle.clone(), token.clone()));

        tx.send(failed(FailureKind::Network)).unwrap();
        tx.send(failed(FailureKind::Recoverable)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(lifecycle.current().is_none());

        token.cancel();
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn test_http_join_is_bounded_by_deadline() {
        use axum::{Router, routing::get};
        use tokio::io::AsyncWriteExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route(
            "/hang",
            get(|| async { std::future::pending::<&'static str>().await }),
        );
        let token = CancellationToken::new();
        let serve_token = token.clone();
        let http = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(serve_token.cancelled_owned())
                .await
        });

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /hang HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let started = Instant::now();
        assert!(!join_http(http, Duration::from_millis(100)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(client);
    }

    #[tokio::test]
    async fn test_http_join_returns_once_idle_server_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let token = CancellationToken::new();
        let serve_token = token.clone();
        let http = tokio::spawn(async move {
            axum::serve(listener, axum::Router::new())
                .with_graceful_shutdown(serve_token.cancelled_owned())
                .await
        });

        token.cancel();
        assert!(join_http(http, Duration::from_secs(2)).await);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::Emergency { reason: "x".into() }.exit_code(), 2);
    }
}
