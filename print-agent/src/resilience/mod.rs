//! Fault isolation primitives
//!
//! - [`CircuitBreaker`] wraps any external call with CLOSED/OPEN/HALF_OPEN
//!   semantics and an enforced call timeout
//! - [`RateLimiter`] guards the local HTTP surface per client
//! - [`ConnectionPool`] bounds and reuses backend sessions

pub mod circuit_breaker;
pub mod pool;
pub mod rate_limiter;

pub use circuit_breaker::{
    BreakerConfig, BreakerError, BreakerMetrics, BreakerRegistry, BreakerSnapshot,
    CircuitBreaker, CircuitState,
};
pub use pool::{ConnectionPool, ManageConnection, PoolConfig, PoolError, PoolStats, PooledConnection};
pub use rate_limiter::{RateDecision, RateLimitConfig, RateLimiter, client_key, rate_limit};
