//! Bounded pool of reusable connections with validation on checkout

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: usize,
    /// Wait for a free slot at most this long
    pub acquire_timeout: Duration,
    /// Idle connections older than this are discarded instead of reused
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Creates and validates pooled connections
#[async_trait]
pub trait ManageConnection: Send + Sync + 'static {
    type Connection: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Connection, Self::Error>;

    /// Called on every checkout of an idle connection
    async fn is_valid(&self, conn: &mut Self::Connection) -> bool;
}

#[derive(Debug, Error)]
pub enum PoolError<E> {
    #[error("timed out after {}ms waiting for a pooled connection", .0.as_millis())]
    Timeout(Duration),

    #[error("failed to open connection: {0}")]
    Connect(E),

    #[error("pool is closed")]
    Closed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub max_size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub created: u64,
    pub reused: u64,
    pub discarded: u64,
    pub timeouts: u64,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
    timeouts: AtomicU64,
}

struct IdleConn<C> {
    conn: C,
    idle_since: Instant,
}

struct PoolInner<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConn<M::Connection>>>,
    counters: Counters,
}

pub struct ConnectionPool<M: ManageConnection> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ManageConnection> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: ManageConnection> ConnectionPool<M> {
    pub fn new(manager: M, config: PoolConfig) -> Self {
        let size = config.max_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                manager,
                semaphore: Arc::new(Semaphore::new(size)),
                idle: Mutex::new(VecDeque::with_capacity(size)),
                counters: Counters::default(),
                config,
            }),
        }
    }

    /// Check out a connection, reusing a valid idle one when possible
    pub async fn get(&self) -> Result<PooledConnection<M>, PoolError<M::Error>> {
        let inner = &self.inner;
        let permit = match tokio::time::timeout(
            inner.config.acquire_timeout,
            inner.semaphore.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                inner.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(PoolError::Timeout(inner.config.acquire_timeout));
            }
        };

        loop {
            let candidate = inner.idle.lock().pop_front();
            let Some(IdleConn {
                mut conn,
                idle_since,
            }) = candidate
            else {
                break;
            };

            if idle_since.elapsed() > inner.config.idle_timeout {
                inner.counters.discarded.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if inner.manager.is_valid(&mut conn).await {
                inner.counters.reused.fetch_add(1, Ordering::Relaxed);
                return Ok(PooledConnection::new(conn, inner.clone(), permit));
            }
            tracing::debug!("Discarding invalid pooled connection");
            inner.counters.discarded.fetch_add(1, Ordering::Relaxed);
        }

        let conn = inner.manager.connect().await.map_err(PoolError::Connect)?;
        inner.counters.created.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection::new(conn, inner.clone(), permit))
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let max_size = inner.config.max_size.max(1);
        PoolStats {
            max_size,
            idle: inner.idle.lock().len(),
            in_use: max_size - inner.semaphore.available_permits(),
            created: inner.counters.created.load(Ordering::Relaxed),
            reused: inner.counters.reused.load(Ordering::Relaxed),
            discarded: inner.counters.discarded.load(Ordering::Relaxed),
            timeouts: inner.counters.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Drop idle connections and refuse further checkouts
    pub fn close(&self) {
        self.inner.semaphore.close();
        self.inner.idle.lock().clear();
    }
}

/// Connection checked out of a [`ConnectionPool`]; returned on drop
pub struct PooledConnection<M: ManageConnection> {
    conn: Option<M::Connection>,
    pool: Arc<PoolInner<M>>,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl<M: ManageConnection> PooledConnection<M> {
    fn new(conn: M::Connection, pool: Arc<PoolInner<M>>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            conn: Some(conn),
            pool,
            broken: false,
            _permit: permit,
        }
    }

    /// Do not return this connection to the pool
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        // Only taken in Drop
        self.conn.as_ref().expect("pooled connection present until drop")
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("pooled connection present until drop")
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.broken || self.pool.semaphore.is_closed() {
                self.pool.counters.discarded.fetch_add(1, Ordering::Relaxed);
                return;
            }
            self.pool.idle.lock().push_back(IdleConn {
                conn,
                idle_since: Instant::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug, Error)]
    #[error("refused")]
    struct Refused;

    #[derive(Default)]
    struct CountingManager {
        next_id: AtomicU64,
        invalid: AtomicBool,
    }

    #[async_trait]
    impl ManageConnection for CountingManager {
        type Connection = u64;
        type Error = Refused;

        async fn connect(&self) -> Result<u64, Refused> {
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        async fn is_valid(&self, _conn: &mut u64) -> bool {
            !self.invalid.load(Ordering::SeqCst)
        }
    }

    fn pool(max: usize) -> ConnectionPool<CountingManager> {
        ConnectionPool::new(
            CountingManager::default(),
            PoolConfig {
                max_size: max,
                acquire_timeout: Duration::from_millis(50),
                idle_timeout: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test]
    async fn test_connection_is_reused_after_drop() {
        let pool = pool(2);
        let first = *pool.get().await.unwrap();
        let second = *pool.get().await.unwrap();
        assert_eq!(first, second);

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.idle, 1);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let pool = pool(1);
        let _held = pool.get().await.unwrap();
        assert!(matches!(pool.get().await, Err(PoolError::Timeout(_))));
        assert_eq!(pool.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_invalid_connection_is_replaced() {
        let pool = pool(1);
        drop(pool.get().await.unwrap());
        pool.inner.manager.invalid.store(true, Ordering::SeqCst);

        let conn = pool.get().await.unwrap();
        assert_eq!(*conn, 1);
        assert_eq!(pool.stats().discarded, 1);
    }

    #[tokio::test]
    async fn test_broken_connection_not_returned() {
        let pool = pool(1);
        let mut conn = pool.get().await.unwrap();
        conn.mark_broken();
        drop(conn);
        assert_eq!(pool.stats().idle, 0);
    }
}
