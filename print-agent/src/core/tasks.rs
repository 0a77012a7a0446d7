//! Background task management
//!
//! Every long-running loop the agent starts is registered here, so shutdown
//! cancels exactly the tasks that were started and nothing else.
//!
//! # Task kinds
//!
//! - [`TaskKind::Worker`] - long-lived loop (sync channel, USB manager)
//! - [`TaskKind::Listener`] - event relay
//! - [`TaskKind::Periodic`] - timer-driven loop (discovery, health, sweeps)

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::lifecycle::Lifecycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Worker,
    Listener,
    Periodic,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Worker => write!(f, "Worker"),
            TaskKind::Listener => write!(f, "Listener"),
            TaskKind::Periodic => write!(f, "Periodic"),
        }
    }
}

/// A task that ended while the agent was still running
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailure {
    pub name: &'static str,
    pub kind: TaskKind,
    pub panic: Option<String>,
    pub at: i64,
}

/// Read side shared with the health monitor
#[derive(Debug, Clone, Default)]
pub struct TaskMonitor {
    failures: Arc<Mutex<Vec<TaskFailure>>>,
    registered: Arc<Mutex<Vec<(&'static str, TaskKind)>>>,
}

impl TaskMonitor {
    pub fn failures(&self) -> Vec<TaskFailure> {
        self.failures.lock().clone()
    }

    pub fn registered(&self) -> usize {
        self.registered.lock().len()
    }

    fn record(&self, failure: TaskFailure) {
        self.failures.lock().push(failure);
    }
}

struct RegisteredTask {
    name: &'static str,
    kind: TaskKind,
    handle: JoinHandle<()>,
}

/// Background task manager
///
/// ```ignore
/// let mut tasks = BackgroundTasks::new(lifecycle.clone());
/// let token = tasks.shutdown_token();
/// tasks.spawn("discovery", TaskKind::Periodic, engine.clone().run(token));
/// // ...
/// tasks.shutdown(Duration::from_secs(5)).await;
/// ```
pub struct BackgroundTasks {
    tasks: Vec<RegisteredTask>,
    shutdown: CancellationToken,
    monitor: TaskMonitor,
    lifecycle: Lifecycle,
}

impl BackgroundTasks {
    pub fn new(lifecycle: Lifecycle) -> Self {
        Self {
            tasks: Vec::new(),
            shutdown: CancellationToken::new(),
            monitor: TaskMonitor::default(),
            lifecycle,
        }
    }

    /// Token that tasks listen on for shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn monitor(&self) -> TaskMonitor {
        self.monitor.clone()
    }

    /// Register and start a task
    ///
    /// A panic is an unhandled fault and routes to the emergency path. A
    /// task that returns before shutdown is recorded as a failure.
    pub fn spawn<F>(&mut self, name: &'static str, kind: TaskKind, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let token = self.shutdown.clone();
        let monitor = self.monitor.clone();
        let lifecycle = self.lifecycle.clone();
        let wrapped = async move {
            let result = AssertUnwindSafe(future).catch_unwind().await;
            match result {
                Ok(()) if token.is_cancelled() => {
                    tracing::debug!(task = %name, kind = %kind, "Task stopped");
                }
                Ok(()) => {
                    tracing::warn!(task = %name, kind = %kind, "Background task completed unexpectedly");
                    monitor.record(TaskFailure {
                        name,
                        kind,
                        panic: None,
                        at: shared::util::now_millis(),
                    });
                }
                Err(panic_info) => {
                    let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        (*s).to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "Unknown panic".to_string()
                    };
                    tracing::error!(task = %name, kind = %kind, panic = %panic_msg, "Background task panicked");
                    monitor.record(TaskFailure {
                        name,
                        kind,
                        panic: Some(panic_msg.clone()),
                        at: shared::util::now_millis(),
                    });
                    lifecycle.emergency(format!("task {} panicked: {}", name, panic_msg));
                }
            }
        };

        let handle = tokio::spawn(wrapped);
        tracing::debug!(task = %name, kind = %kind, "Registered background task");
        self.monitor.registered.lock().push((name, kind));
        self.tasks.push(RegisteredTask { name, kind, handle });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn log_summary(&self) {
        let count = |k: TaskKind| self.tasks.iter().filter(|t| t.kind == k).count();
        tracing::info!(
            total = self.tasks.len(),
            workers = count(TaskKind::Worker),
            listeners = count(TaskKind::Listener),
            periodic = count(TaskKind::Periodic),
            "Background tasks registered"
        );
    }

    /// Cancel every registered task and wait up to `timeout` for each
    pub async fn shutdown(self, timeout: Duration) -> usize {
        tracing::info!("Shutting down {} background tasks...", self.tasks.len());
        self.shutdown.cancel();

        let mut aborted = 0;
        for task in self.tasks {
            let abort = task.handle.abort_handle();
            match tokio::time::timeout(timeout, task.handle).await {
                Ok(Ok(())) => tracing::debug!(task = %task.name, "Task completed"),
                Ok(Err(e)) if e.is_cancelled() => tracing::debug!(task = %task.name, "Task cancelled"),
                Ok(Err(e)) => tracing::error!(task = %task.name, error = ?e, "Task panicked"),
                Err(_) => {
                    tracing::warn!(task = %task.name, "Task ignored cancellation, aborting");
                    abort.abort();
                    aborted += 1;
                }
            }
        }

        tracing::info!(aborted, "All background tasks stopped");
        aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lifecycle::StopKind;

    #[tokio::test]
    async fn test_shutdown_cancels_cooperative_tasks() {
        let mut tasks = BackgroundTasks::new(Lifecycle::new());
        let token = tasks.shutdown_token();
        tasks.spawn("loop", TaskKind::Periodic, async move { token.cancelled().await });
        assert_eq!(tasks.len(), 1);

        let monitor = tasks.monitor();
        assert_eq!(tasks.shutdown(Duration::from_secs(1)).await, 0);
        assert!(monitor.failures().is_empty());
    }

    #[tokio::test]
    async fn test_early_exit_is_recorded() {
        let mut tasks = BackgroundTasks::new(Lifecycle::new());
        tasks.spawn("quitter", TaskKind::Worker, async {});
        let monitor = tasks.monitor();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let failures = monitor.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].name, "quitter");
        assert!(failures[0].panic.is_none());
    }

    #[tokio::test]
    async fn test_panic_routes_to_emergency() {
        let lifecycle = Lifecycle::new();
        let mut tasks = BackgroundTasks::new(lifecycle.clone());
        tasks.spawn("boom", TaskKind::Listener, async {
            let fail = true;
            if fail {
                panic!("kaboom");
            }
        });

        let req = tokio::time::timeout(Duration::from_secs(1), lifecycle.emergency_requested())
            .await
            .unwrap();
        assert_eq!(req.kind, StopKind::Emergency);
        assert!(req.reason.contains("kaboom"));
        assert_eq!(tasks.monitor().failures()[0].panic.as_deref(), Some("kaboom"));
    }

    #[tokio::test]
    async fn test_stubborn_task_is_aborted() {
        let mut tasks = BackgroundTasks::new(Lifecycle::new());
        tasks.spawn("stubborn", TaskKind::Worker, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        assert_eq!(tasks.shutdown(Duration::from_millis(50)).await, 1);
    }
}
