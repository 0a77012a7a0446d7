//! Circuit breaker for external calls (backend HTTP, sync connect, printer sockets)
//!
//! State is only evaluated at call time; there is no background timer. An
//! OPEN breaker becomes HALF_OPEN on the first call attempted after its
//! recovery timeout has elapsed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures in CLOSED before opening
    pub failure_threshold: u32,
    /// Trial successes in HALF_OPEN before closing; also the trial call quota
    pub success_threshold: u32,
    /// Time spent OPEN before a trial call is allowed
    pub recovery_timeout: Duration,
    /// Deadline applied to every guarded call
    pub call_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit '{name}' is open, retry in {}ms", .retry_after.as_millis())]
    Open { name: String, retry_after: Duration },

    #[error("call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{0}")]
    Inner(E),
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerMetrics {
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
    pub timeouts: u64,
    pub state_transitions: u64,
    pub last_failure_at: Option<i64>,
    pub last_state_change_at: Option<i64>,
}

/// Point-in-time view for `/metrics`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub next_attempt_in_ms: Option<u64>,
    pub metrics: BreakerMetrics,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    trial_in_flight: u32,
    /// Bumped on every state change
    epoch: u64,
    next_attempt: Option<Instant>,
    metrics: BreakerMetrics,
}

/// Outcome of the admission check, remembered so a late result from a
/// previous state is not counted against the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal { epoch: u64 },
    Trial { epoch: u64 },
}

impl Admission {
    fn epoch(self) -> u64 {
        match self {
            Admission::Normal { epoch } | Admission::Trial { epoch } => epoch,
        }
    }
}

/// Holds an admitted call until its result is recorded
///
/// Dropping the call future before it settles (an outer timeout or a
/// cancelled job) counts as a failure and frees the trial slot.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl CallGuard<'_> {
    fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.admission);
    }

    fn failure(mut self, timed_out: bool) {
        self.settled = true;
        self.breaker.on_failure(self.admission, timed_out);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(breaker = %self.breaker.name, "Guarded call abandoned before completion");
            self.breaker.on_failure(self.admission, false);
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                trial_in_flight: 0,
                epoch: 0,
                next_attempt: None,
                metrics: BreakerMetrics::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state, without evaluating the recovery timeout
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Run `op` through the breaker
    ///
    /// Rejected calls never invoke `op`. A call that exceeds
    /// `call_timeout`, or whose future is dropped by the caller, is
    /// counted as a failure.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let guard = CallGuard {
            breaker: self,
            admission: self.admit()?,
            settled: false,
        };

        match tokio::time::timeout(self.config.call_timeout, op()).await {
            Ok(Ok(value)) => {
                guard.success();
                Ok(value)
            }
            Ok(Err(e)) => {
                guard.failure(false);
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                guard.failure(true);
                Err(BreakerError::Timeout(self.config.call_timeout))
            }
        }
    }

    fn admit<E>(&self) -> Result<Admission, BreakerError<E>> {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;

        if inner.state == CircuitState::Open {
            let now = Instant::now();
            match inner.next_attempt {
                Some(at) if now < at => {
                    inner.metrics.rejections += 1;
                    return Err(BreakerError::Open {
                        name: self.name.clone(),
                        retry_after: at - now,
                    });
                }
                _ => {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                }
            }
        }

        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal { epoch: inner.epoch }),
            CircuitState::HalfOpen => {
                if inner.trial_in_flight >= self.config.success_threshold.max(1) {
                    inner.metrics.rejections += 1;
                    return Err(BreakerError::Open {
                        name: self.name.clone(),
                        retry_after: Duration::ZERO,
                    });
                }
                inner.trial_in_flight += 1;
                Ok(Admission::Trial { epoch: inner.epoch })
            }
            CircuitState::Open => {
                inner.metrics.rejections += 1;
                Err(BreakerError::Open {
                    name: self.name.clone(),
                    retry_after: self.config.recovery_timeout,
                })
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        inner.metrics.successes += 1;
        if admission.epoch() != inner.epoch {
            return;
        }

        match (admission, inner.state) {
            (Admission::Normal { .. }, CircuitState::Closed) => {
                inner.failure_count = 0;
            }
            (Admission::Trial { .. }, CircuitState::HalfOpen) => {
                inner.trial_in_flight = inner.trial_in_flight.saturating_sub(1);
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            _ => {}
        }
    }

    fn on_failure(&self, admission: Admission, timed_out: bool) {
        let mut inner = self.inner.lock();
        inner.metrics.failures += 1;
        if timed_out {
            inner.metrics.timeouts += 1;
        }
        inner.metrics.last_failure_at = Some(shared::util::now_millis());
        if admission.epoch() != inner.epoch {
            return;
        }

        match (admission, inner.state) {
            (Admission::Normal { .. }, CircuitState::Closed) => {
                inner.failure_count += 1;
                debug!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "Guarded call failed"
                );
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            (Admission::Trial { .. }, CircuitState::HalfOpen) => {
                inner.trial_in_flight = inner.trial_in_flight.saturating_sub(1);
                self.transition(&mut inner, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.epoch += 1;
        inner.metrics.state_transitions += 1;
        inner.metrics.last_state_change_at = Some(shared::util::now_millis());

        match to {
            CircuitState::Open => {
                inner.next_attempt = Some(Instant::now() + self.config.recovery_timeout);
                inner.success_count = 0;
                inner.trial_in_flight = 0;
                warn!(
                    breaker = %self.name,
                    ?from,
                    recovery_secs = self.config.recovery_timeout.as_secs_f64(),
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.success_count = 0;
                inner.trial_in_flight = 0;
                info!(breaker = %self.name, "Circuit half-open, allowing trial calls");
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.trial_in_flight = 0;
                inner.next_attempt = None;
                info!(breaker = %self.name, "Circuit closed");
            }
        }
    }

    /// Force the breaker back to CLOSED
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed);
        inner.failure_count = 0;
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        let now = Instant::now();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            next_attempt_in_ms: match (inner.state, inner.next_attempt) {
                (CircuitState::Open, Some(at)) => {
                    Some(at.saturating_duration_since(now).as_millis() as u64)
                }
                _ => None,
            },
            metrics: inner.metrics.clone(),
        }
    }
}

/// Named breakers, one per guarded dependency
#[derive(Clone)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub const BACKEND_HTTP: &'static str = "backend-http";
    pub const SYNC_CHANNEL: &'static str = "sync-channel";

    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(DashMap::new()),
        }
    }

    /// Breaker guarding raw socket writes to one printer
    pub fn printer_socket(&self, printer_id: &str) -> Arc<CircuitBreaker> {
        self.get_or_create(&format!("printer-socket:{printer_id}"))
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone())))
            .clone()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snaps: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        snaps.sort_by(|a, b| a.name.cmp(&b.name));
        snaps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, recovery_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: threshold,
                success_threshold: 1,
                recovery_timeout: Duration::from_millis(recovery_ms),
                call_timeout: Duration::from_millis(200),
            },
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        b.call(|| async { Err::<(), _>("boom") }).await
    }

    #[tokio::test]
    async fn test_opens_after_exact_threshold() {
        let b = breaker(3, 10_000);
        for _ in 0..2 {
            assert!(matches!(fail(&b).await, Err(BreakerError::Inner("boom"))));
            assert_eq!(b.state(), CircuitState::Closed);
        }
        assert!(fail(&b).await.is_err());
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking() {
        let b = breaker(1, 10_000);
        let _ = fail(&b).await;

        let invoked = AtomicU32::new(0);
        let result = b
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(b.snapshot().metrics.rejections, 1);
    }

    #[tokio::test]
    async fn test_half_open_on_first_call_after_recovery() {
        let b = breaker(1, 50);
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        // Still OPEN until a call is attempted
        assert_eq!(b.state(), CircuitState::Open);

        let seen = Mutex::new(None);
        let result = b
            .call(|| async {
                *seen.lock() = Some(b.state());
                Ok::<_, &str>(7)
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(*seen.lock(), Some(CircuitState::HalfOpen));
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let b = breaker(1, 30);
        let _ = fail(&b).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(fail(&b).await.is_err());
        assert_eq!(b.state(), CircuitState::Open);
        assert!(matches!(fail(&b).await, Err(BreakerError::Open { .. })));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let b = breaker(1, 10_000);
        let result = b
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, &str>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Timeout(_))));
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.snapshot().metrics.timeouts, 1);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let b = breaker(2, 10_000);
        let _ = fail(&b).await;
        b.call(|| async { Ok::<_, &str>(()) }).await.unwrap();
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dropped_trial_call_frees_half_open_slot() {
        let b = breaker(1, 20);
        let _ = fail(&b).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Caller gives up on the trial call before it settles
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            b.call(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, &str>(())
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        b.call(|| async { Ok::<_, &str>(()) }).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dropped_call_counts_as_failure_when_closed() {
        let b = breaker(1, 10_000);
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            b.call(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, &str>(())
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.snapshot().metrics.failures, 1);
    }

    #[test]
    fn test_registry_reuses_named_breakers() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        let a = registry.printer_socket("p1");
        let b = registry.printer_socket("p1");
        assert!(Arc::ptr_eq(&a, &b));
        registry.get_or_create(BreakerRegistry::BACKEND_HTTP);
        let names: Vec<_> = registry.snapshots().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["backend-http", "printer-socket:p1"]);
    }
}
