//! Process lifecycle triggers
//!
//! Any component may ask the agent to stop. A graceful request runs the
//! phased shutdown; an emergency request skips to a state dump and exit.
//! Emergency always overrides a pending graceful request, never the other
//! way round.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    Graceful,
    Emergency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    pub kind: StopKind,
    pub reason: String,
    pub requested_at: i64,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    tx: Arc<watch::Sender<Option<StopRequest>>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Ask for the phased shutdown
    pub fn request_shutdown(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let accepted = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(StopRequest {
                kind: StopKind::Graceful,
                reason: reason.clone(),
                requested_at: shared::util::now_millis(),
            });
            true
        });
        if accepted {
            info!(reason = %reason, "Graceful shutdown requested");
        }
    }

    /// Ask for the emergency path
    pub fn emergency(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let accepted = self.tx.send_if_modified(|current| {
            if matches!(current, Some(r) if r.kind == StopKind::Emergency) {
                return false;
            }
            *current = Some(StopRequest {
                kind: StopKind::Emergency,
                reason: reason.clone(),
                requested_at: shared::util::now_millis(),
            });
            true
        });
        if accepted {
            error!(reason = %reason, "Emergency shutdown requested");
        }
    }

    pub fn current(&self) -> Option<StopRequest> {
        self.tx.borrow().clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Resolves once any stop has been requested
    pub async fn stopped(&self) -> StopRequest {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(req) = rx.borrow_and_update().clone() {
                return req;
            }
            if rx.changed().await.is_err() {
                return closed_request();
            }
        }
    }

    /// Resolves once an emergency has been requested
    pub async fn emergency_requested(&self) -> StopRequest {
        let mut rx = self.tx.subscribe();
        match rx
            .wait_for(|r| matches!(r, Some(req) if req.kind == StopKind::Emergency))
            .await
        {
            Ok(req) => req.clone().unwrap_or_else(closed_request),
            Err(_) => closed_request(),
        }
    }
}

fn closed_request() -> StopRequest {
    StopRequest {
        kind: StopKind::Emergency,
        reason: "lifecycle channel closed".into(),
        requested_at: shared::util::now_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_graceful_reason_wins() {
        let lc = Lifecycle::new();
        lc.request_shutdown("signal");
        lc.request_shutdown("restart");
        let req = lc.stopped().await;
        assert_eq!(req.kind, StopKind::Graceful);
        assert_eq!(req.reason, "signal");
    }

    #[tokio::test]
    async fn test_emergency_overrides_graceful() {
        let lc = Lifecycle::new();
        let waiter = {
            let lc = lc.clone();
            tokio::spawn(async move { lc.emergency_requested().await })
        };
        lc.request_shutdown("signal");
        lc.emergency("task panicked");
        lc.request_shutdown("late");

        let req = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(req.kind, StopKind::Emergency);
        assert_eq!(lc.current().unwrap().reason, "task panicked");
    }
}
