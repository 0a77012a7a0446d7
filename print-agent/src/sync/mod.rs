//! Sync channel to the backend
//!
//! A persistent WebSocket carrying JSON event frames in both directions.
//!
//! - [`channel`] - connect/reconnect loop, room join, printer re-announce
//! - [`handler`] - inbound command execution, one result event per command
//! - [`registration`] - best-effort bulk REST registration
//!
//! Components never own the socket; they emit through a [`SyncHandle`]
//! which feeds the channel's outbound queue.

pub mod channel;
pub mod handler;
pub mod registration;

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, mpsc, watch};
use tracing::debug;

use shared::message::{AgentIdentity, OutboundEvent, SyncEnvelope};
use shared::{AppError, ErrorCode};

pub use channel::{SyncChannel, announcements};
pub use handler::CommandHandler;
pub use registration::BackendClient;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Backend base URL; the channel is disabled when unset
    pub backend_url: Option<String>,
    pub ws_path: String,
    pub license_key: String,
    pub branch_id: String,
    pub device_id: String,
    pub role: String,
    pub app_version: String,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub ping_interval: Duration,
    pub outbound_buffer: usize,
    /// Deadline for REST calls and commands that wait for a job
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            ws_path: "/ws/agent".into(),
            license_key: String::new(),
            branch_id: String::new(),
            device_id: "agent-unknown".into(),
            role: "print-agent".into(),
            app_version: env!("CARGO_PKG_VERSION").into(),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
            outbound_buffer: 256,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl SyncConfig {
    pub fn is_enabled(&self) -> bool {
        self.backend_url.is_some()
    }

    pub fn identity(&self) -> AgentIdentity {
        AgentIdentity {
            license_key: self.license_key.clone(),
            branch_id: self.branch_id.clone(),
            device_id: self.device_id.clone(),
            role: self.role.clone(),
            app_version: self.app_version.clone(),
        }
    }

    /// `ws(s)://host/path` derived from the backend URL
    pub fn ws_url(&self) -> Option<String> {
        let base = self.backend_url.as_deref()?.trim_end_matches('/');
        let base = base
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        Some(format!("{}{}", base, self.ws_path))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// No backend configured
    Disabled,
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync channel is not configured")]
    Disabled,

    #[error("invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("backend rejected the connection (HTTP {0})")]
    Rejected(u16),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Unavailable(String),
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        let code = match &err {
            SyncError::Disabled => ErrorCode::SyncNotConnected,
            SyncError::Rejected(401 | 403) => ErrorCode::SyncAuthFailed,
            SyncError::Unavailable(_) => ErrorCode::CircuitOpen,
            _ => ErrorCode::BackendUnavailable,
        };
        AppError::with_message(code, err.to_string())
    }
}

#[derive(Debug, Default)]
pub struct SyncCounters {
    pub connects: AtomicU64,
    pub disconnects: AtomicU64,
    pub sent: AtomicU64,
    pub received: AtomicU64,
    pub dropped: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub status: ChannelStatus,
    pub connects: u64,
    pub disconnects: u64,
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
}

/// Cloneable sender side of the sync channel
#[derive(Clone)]
pub struct SyncHandle {
    outbound: mpsc::Sender<SyncEnvelope>,
    status: watch::Receiver<ChannelStatus>,
    reconnect: Arc<Notify>,
    counters: Arc<SyncCounters>,
}

impl SyncHandle {
    fn new(
        outbound: mpsc::Sender<SyncEnvelope>,
        status: watch::Receiver<ChannelStatus>,
        reconnect: Arc<Notify>,
        counters: Arc<SyncCounters>,
    ) -> Self {
        Self {
            outbound,
            status,
            reconnect,
            counters,
        }
    }

    /// Handle for an agent without a backend; every emit is dropped
    pub fn disabled() -> Self {
        let (tx, _) = mpsc::channel(1);
        let (_, status) = watch::channel(ChannelStatus::Disabled);
        Self::new(tx, status, Arc::new(Notify::new()), Arc::default())
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    pub fn status_rx(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ChannelStatus::Connected
    }

    pub fn is_enabled(&self) -> bool {
        self.status() != ChannelStatus::Disabled
    }

    /// Queue an event for the backend
    ///
    /// Dropped (returns false) while disconnected; the printer set is
    /// re-announced on every connect instead.
    pub fn emit<T: Serialize>(&self, event: OutboundEvent, data: &T) -> bool {
        match SyncEnvelope::outbound(event, data) {
            Ok(env) => self.emit_envelope(env),
            Err(e) => {
                tracing::warn!(event = %event, error = %e, "Failed to encode sync event");
                false
            }
        }
    }

    pub fn emit_envelope(&self, env: SyncEnvelope) -> bool {
        if !self.is_connected() {
            debug!(event = %env.event, status = %self.status(), "Sync channel not connected, event dropped");
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.outbound.try_send(env) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Sync outbound queue rejected event");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Drop the current connection and reconnect immediately
    pub fn request_reconnect(&self) {
        self.reconnect.notify_one();
    }

    pub fn stats(&self) -> SyncStats {
        let c = &self.counters;
        SyncStats {
            status: self.status(),
            connects: c.connects.load(Ordering::Relaxed),
            disconnects: c.disconnects.load(Ordering::Relaxed),
            sent: c.sent.load(Ordering::Relaxed),
            received: c.received.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
        }
    }
}
