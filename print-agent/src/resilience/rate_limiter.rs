//! Fixed-window rate limiting for the local HTTP surface

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::core::AgentState;

/// Paths never counted against a client's window
const EXEMPT_PATHS: &[&str] = &["/health", "/ready"];

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per client per window
    pub max_requests: u32,
    pub window: Duration,
    /// How often expired windows are swept
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 120,
            window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

struct ClientWindow {
    count: u32,
    window_start: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    /// client key -> window
    clients: Arc<Mutex<HashMap<String, ClientWindow>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one request for `key`
    pub fn check(&self, key: &str) -> RateDecision {
        let mut clients = self.clients.lock();
        let now = Instant::now();

        let entry = clients.entry(key.to_owned()).or_insert_with(|| ClientWindow {
            count: 0,
            window_start: now,
        });

        // Lazily reset an expired window
        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;
        if entry.count <= self.config.max_requests {
            RateDecision::Allowed {
                remaining: self.config.max_requests - entry.count,
            }
        } else {
            let reset_at = entry.window_start + self.config.window;
            RateDecision::Limited {
                retry_after: reset_at.saturating_duration_since(now),
            }
        }
    }

    /// Drop windows expired for longer than one full window; returns removed count
    pub fn sweep(&self) -> usize {
        let mut clients = self.clients.lock();
        let now = Instant::now();
        let before = clients.len();
        let ttl = self.config.window * 2;
        clients.retain(|_, w| now.duration_since(w.window_start) < ttl);
        before - clients.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }
}

/// Client identity: first `X-Forwarded-For` entry, then peer address
pub fn client_key(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for")
        && let Ok(val) = forwarded.to_str()
        && let Some(first) = val.split(',').next()
    {
        let ip = first.trim();
        if !ip.is_empty() {
            return ip.to_owned();
        }
    }

    request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

fn too_many_requests(retry_after: Duration) -> Response {
    // Round up so clients never retry early
    let secs = retry_after.as_millis().div_ceil(1000) as u64;
    let body = serde_json::json!({
        "success": false,
        "error": "Too many requests, try again later",
        "retryAfter": secs,
        "timestamp": shared::util::now_rfc3339(),
    });
    let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    response
}

/// Rate limit middleware for every non-health route
pub async fn rate_limit(
    State(state): State<AgentState>,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    if EXEMPT_PATHS.contains(&request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let key = client_key(&request);
    if let RateDecision::Limited { retry_after } = state.rate_limiter.check(&key) {
        tracing::debug!(client = %key, path = %request.uri().path(), "Rate limited");
        return Err(too_many_requests(retry_after));
    }
    Ok(next.run(request).await)
}
