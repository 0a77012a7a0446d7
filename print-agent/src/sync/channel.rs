//! SyncChannel - WebSocket duplex with the backend
//!
//! 1. Connect with identity in query params and headers (through the
//!    `sync-channel` breaker)
//! 2. Join the branch room, announce online, announce every printer
//! 3. Best-effort bulk REST registration in the background
//! 4. Relay job and discovery events; execute inbound commands
//! 5. Reconnect with exponential backoff on disconnect

use futures::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shared::message::{
    AgentIdentity, AgentOnline, BatchSyncSummary, CommandResult, JoinRoom, OutboundEvent,
    PrinterAnnouncement, SyncEnvelope,
};
use shared::models::{JobOutcome, PrinterRecord};

use super::{BackendClient, ChannelStatus, CommandHandler, SyncConfig, SyncCounters, SyncError, SyncHandle};
use crate::core::error::FailureKind;
use crate::discovery::{DiscoveryEvent, PrinterRegistry};
use crate::printing::JobEvent;
use crate::resilience::{BreakerError, BreakerRegistry, CircuitBreaker};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    /// Reconnect requested locally; skip the backoff
    Reconnect,
    Dropped,
}

/// `print:job:failed` payload for jobs that ran
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FailedJob<'a> {
    #[serde(flatten)]
    outcome: &'a JobOutcome,
    failure_kind: FailureKind,
    retryable: bool,
    suggestions: &'static [&'static str],
}

/// One `printer:discovered` frame per printer
///
/// Ids are the dedup key, so announcing the same set again is idempotent
/// downstream.
pub fn announcements(printers: &[PrinterRecord], branch_id: &str) -> Vec<SyncEnvelope> {
    printers
        .iter()
        .filter_map(|printer| {
            let ann = PrinterAnnouncement {
                printer: printer.clone(),
                branch_id: branch_id.to_string(),
            };
            SyncEnvelope::outbound(OutboundEvent::PrinterDiscovered, &ann).ok()
        })
        .collect()
}

/// Frames sent on every (re)connect, in order
pub fn handshake(identity: &AgentIdentity, printers: &[PrinterRecord]) -> Vec<SyncEnvelope> {
    let mut frames = Vec::with_capacity(printers.len() + 2);
    if let Ok(join) = SyncEnvelope::outbound(OutboundEvent::Join, &JoinRoom { room: identity.room() }) {
        frames.push(join);
    }
    let online = AgentOnline {
        branch_id: identity.branch_id.clone(),
        device_id: identity.device_id.clone(),
        app_version: identity.app_version.clone(),
        printer_count: printers.len(),
        timestamp: shared::util::now_millis(),
    };
    if let Ok(online) = SyncEnvelope::outbound(OutboundEvent::AgentOnline, &online) {
        frames.push(online);
    }
    frames.extend(announcements(printers, &identity.branch_id));
    frames
}

fn job_event_envelope(event: &JobEvent) -> Result<SyncEnvelope, serde_json::Error> {
    match event {
        JobEvent::Started { job } => SyncEnvelope::outbound(OutboundEvent::PrintJobStarted, job),
        JobEvent::Completed { outcome } => SyncEnvelope::outbound(OutboundEvent::PrintJobCompleted, outcome),
        JobEvent::Failed { outcome, failure } => SyncEnvelope::outbound(
            OutboundEvent::PrintJobFailed,
            &FailedJob {
                outcome,
                failure_kind: *failure,
                retryable: failure.is_retryable(),
                suggestions: failure.suggestions(),
            },
        ),
    }
}

pub struct SyncChannel {
    config: SyncConfig,
    identity: AgentIdentity,
    registry: PrinterRegistry,
    handler: CommandHandler,
    backend: Option<Arc<BackendClient>>,
    breaker: Arc<CircuitBreaker>,
    outbound_tx: mpsc::Sender<SyncEnvelope>,
    outbound_rx: mpsc::Receiver<SyncEnvelope>,
    status: watch::Sender<ChannelStatus>,
    reconnect: Arc<Notify>,
    counters: Arc<SyncCounters>,
    job_events: broadcast::Receiver<JobEvent>,
    discovery_events: broadcast::Receiver<DiscoveryEvent>,
    commands: JoinSet<()>,
}

impl SyncChannel {
    pub fn new(
        config: SyncConfig,
        registry: PrinterRegistry,
        handler: CommandHandler,
        breakers: &BreakerRegistry,
        job_events: broadcast::Receiver<JobEvent>,
        discovery_events: broadcast::Receiver<DiscoveryEvent>,
    ) -> (Self, SyncHandle) {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer.max(1));
        let initial = if config.is_enabled() {
            ChannelStatus::Disconnected
        } else {
            ChannelStatus::Disabled
        };
        let (status, status_rx) = watch::channel(initial);
        let reconnect = Arc::new(Notify::new());
        let counters = Arc::new(SyncCounters::default());

        let handle = SyncHandle::new(outbound_tx.clone(), status_rx, reconnect.clone(), counters.clone());
        let channel = Self {
            identity: config.identity(),
            config,
            registry,
            handler,
            backend: None,
            breaker: breakers.get_or_create(BreakerRegistry::SYNC_CHANNEL),
            outbound_tx,
            outbound_rx,
            status,
            reconnect,
            counters,
            job_events,
            discovery_events,
            commands: JoinSet::new(),
        };
        (channel, handle)
    }

    pub fn with_backend(mut self, backend: Arc<BackendClient>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Main loop: connect, run a session, back off, repeat
    pub async fn run(mut self, shutdown: CancellationToken) {
        let Some(ws_url) = self.config.ws_url() else {
            info!("No backend configured, sync channel disabled");
            self.status.send_replace(ChannelStatus::Disabled);
            shutdown.cancelled().await;
            return;
        };

        info!(url = %ws_url, "SyncChannel started");
        let mut delay = self.config.reconnect_initial;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.status.send_replace(ChannelStatus::Connecting);
            match self.connect(&ws_url).await {
                Ok(ws) => {
                    delay = self.config.reconnect_initial;
                    self.counters.connects.fetch_add(1, Ordering::Relaxed);
                    self.status.send_replace(ChannelStatus::Connected);
                    info!("Sync channel connected");

                    let end = self.run_session(ws, &shutdown).await;

                    self.status.send_replace(ChannelStatus::Disconnected);
                    self.counters.disconnects.fetch_add(1, Ordering::Relaxed);
                    self.discard_outbound();
                    match end {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Reconnect => continue,
                        SessionEnd::Dropped => warn!("Sync channel disconnected"),
                    }
                }
                Err(e) => {
                    self.status.send_replace(ChannelStatus::Disconnected);
                    warn!(
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Sync channel connection failed, operating local-only until retry"
                    );
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {},
                _ = self.reconnect.notified() => {
                    info!("Reconnect requested");
                    delay = self.config.reconnect_initial;
                    continue;
                }
            }
            delay = (delay * 2).min(self.config.reconnect_max);
        }

        self.commands.shutdown().await;
        self.status.send_replace(ChannelStatus::Disconnected);
        info!("SyncChannel stopped");
    }

    async fn connect(&self, ws_url: &str) -> Result<WsStream, SyncError> {
        let request = self.build_request(ws_url)?;
        let result = self
            .breaker
            .call(|| async move {
                tokio_tungstenite::connect_async(request)
                    .await
                    .map(|(ws, _response)| ws)
                    .map_err(|e| match e {
                        tungstenite::Error::Http(ref resp) => SyncError::Rejected(resp.status().as_u16()),
                        other => SyncError::WebSocket(other),
                    })
            })
            .await;

        match result {
            Ok(ws) => Ok(ws),
            Err(BreakerError::Inner(e)) => Err(e),
            Err(e) => Err(SyncError::Unavailable(e.to_string())),
        }
    }

    fn build_request(&self, ws_url: &str) -> Result<tungstenite::handshake::client::Request, SyncError> {
        let id = &self.identity;
        let url = reqwest::Url::parse_with_params(
            ws_url,
            &[
                ("licenseKey", id.license_key.as_str()),
                ("branchId", id.branch_id.as_str()),
                ("deviceId", id.device_id.as_str()),
                ("role", id.role.as_str()),
                ("appVersion", id.app_version.as_str()),
            ],
        )
        .map_err(|e| SyncError::InvalidUrl(format!("{ws_url}: {e}")))?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
        let headers = request.headers_mut();
        for (name, value) in [
            ("X-License-Key", &id.license_key),
            ("X-Branch-Id", &id.branch_id),
            ("X-Device-Id", &id.device_id),
            ("X-Agent-Role", &id.role),
            ("X-App-Version", &id.app_version),
        ] {
            let value = HeaderValue::from_str(value)
                .map_err(|e| SyncError::InvalidUrl(format!("invalid {name} header: {e}")))?;
            headers.insert(name, value);
        }
        Ok(request)
    }

    /// Run a single WebSocket session until disconnect or shutdown
    async fn run_session(&mut self, ws: WsStream, shutdown: &CancellationToken) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();
        self.discard_stale();

        // Re-push the whole set so the backend never has to re-discover
        let printers = self.registry.snapshot().printers.clone();
        for frame in handshake(&self.identity, &printers) {
            if let Err(e) = self.send(&mut sink, &frame).await {
                warn!(error = %e, "Sync handshake failed");
                return SessionEnd::Dropped;
            }
        }
        info!(printers = printers.len(), room = %self.identity.room(), "Joined branch room");
        self.spawn_registration(printers);

        let mut ping = tokio::time::interval(self.config.ping_interval);
        ping.tick().await; // skip immediate tick
        let mut jobs_open = true;
        let mut discovery_open = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sync channel closing");
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }

                _ = self.reconnect.notified() => {
                    info!("Reconnect requested, closing session");
                    let _ = sink.close().await;
                    return SessionEnd::Reconnect;
                }

                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        warn!("Sync ping failed, disconnecting");
                        return SessionEnd::Dropped;
                    }
                }

                Some(env) = self.outbound_rx.recv() => {
                    if let Err(e) = self.send(&mut sink, &env).await {
                        warn!(event = %env.event, error = %e, "Sync send failed, disconnecting");
                        return SessionEnd::Dropped;
                    }
                }

                result = self.job_events.recv(), if jobs_open => {
                    match result {
                        Ok(event) => match job_event_envelope(&event) {
                            Ok(env) => {
                                if let Err(e) = self.send(&mut sink, &env).await {
                                    warn!(error = %e, "Sync send failed, disconnecting");
                                    return SessionEnd::Dropped;
                                }
                            }
                            Err(e) => warn!(job_id = %event.job_id(), error = %e, "Failed to encode job event"),
                        },
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Sync channel lagged behind job events");
                        }
                        Err(broadcast::error::RecvError::Closed) => jobs_open = false,
                    }
                }

                result = self.discovery_events.recv(), if discovery_open => {
                    match result {
                        Ok(DiscoveryEvent::Completed { printers, summary }) => {
                            let mut frames = announcements(&printers, &self.identity.branch_id);
                            if let Ok(done) = SyncEnvelope::outbound(OutboundEvent::DiscoveryCompleted, &summary) {
                                frames.push(done);
                            }
                            for frame in frames {
                                if let Err(e) = self.send(&mut sink, &frame).await {
                                    warn!(error = %e, "Sync send failed, disconnecting");
                                    return SessionEnd::Dropped;
                                }
                            }
                            self.spawn_registration(printers.to_vec());
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Sync channel lagged behind discovery events");
                        }
                        Err(broadcast::error::RecvError::Closed) => discovery_open = false,
                    }
                }

                Some(_) = self.commands.join_next(), if !self.commands.is_empty() => {}

                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.dispatch_inbound(text.as_str()),
                        Some(Ok(Message::Ping(data))) => {
                            let _ = sink.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("Sync channel closed by backend");
                            return SessionEnd::Dropped;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Sync channel error");
                            return SessionEnd::Dropped;
                        }
                        None => {
                            info!("Sync channel stream ended");
                            return SessionEnd::Dropped;
                        }
                        _ => {} // Binary, Pong, Frame
                    }
                }
            }
        }
    }

    /// Commands run concurrently with each other and with the session loop
    fn dispatch_inbound(&mut self, text: &str) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let env = match SyncEnvelope::from_text(text) {
            Ok(env) => env,
            Err(e) => {
                warn!(error = %e, "Invalid frame from backend");
                return;
            }
        };
        debug!(event = %env.event, "Received sync command");

        let handler = self.handler.clone();
        let reply = self.outbound_tx.clone();
        self.commands.spawn(async move {
            handler.handle(env, &reply).await;
        });
    }

    /// Bulk REST registration alongside the channel; outcome reported as events
    fn spawn_registration(&mut self, printers: Vec<PrinterRecord>) {
        let backend = self.backend.clone();
        let reply = self.outbound_tx.clone();
        let branch_id = self.identity.branch_id.clone();

        self.commands.spawn(async move {
            let total = printers.len();
            let (succeeded, failed, registered) = match backend {
                Some(backend) => match backend.register_printers(&printers).await {
                    Ok(reg) => {
                        let result = CommandResult::ok(
                            format!("{} printers registered", reg.registered),
                            serde_json::to_value(&reg).ok(),
                        );
                        emit(&reply, OutboundEvent::PrinterSyncSuccess, &result).await;
                        (reg.registered.min(total), reg.failed, true)
                    }
                    Err(e) => {
                        warn!(error = %e, "Bulk registration failed, continuing channel-only");
                        let err = shared::AppError::from(e);
                        emit(&reply, OutboundEvent::PrinterSyncError, &CommandResult::failed(&err)).await;
                        (total, 0, false)
                    }
                },
                None => (total, 0, false),
            };

            let summary = BatchSyncSummary {
                branch_id,
                total,
                succeeded,
                failed,
                registered,
                timestamp: shared::util::now_millis(),
            };
            emit(&reply, OutboundEvent::PrinterSyncBatchCompleted, &summary).await;
        });
    }

    async fn send<S>(&self, sink: &mut S, env: &SyncEnvelope) -> Result<(), SyncError>
    where
        S: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let text = env.to_text()?;
        sink.send(Message::Text(text.into())).await?;
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Events queued while the session was ending are not replayed
    fn discard_outbound(&mut self) {
        let mut dropped = 0u64;
        while self.outbound_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Discarded queued sync events after disconnect");
            self.counters.dropped.fetch_add(dropped, Ordering::Relaxed);
        }
    }

    /// Drop everything raised while no session was up; the handshake
    /// re-announces the printer set instead
    fn discard_stale(&mut self) {
        self.discard_outbound();
        let dropped = drain_stale(&mut self.job_events) + drain_stale(&mut self.discovery_events);
        if dropped > 0 {
            debug!(dropped, "Discarded job and discovery events raised while disconnected");
            self.counters.dropped.fetch_add(dropped, Ordering::Relaxed);
        }
    }
}

/// Empty a broadcast receiver, counting lagged messages as dropped
fn drain_stale<T: Clone>(rx: &mut broadcast::Receiver<T>) -> u64 {
    let mut dropped = 0u64;
    loop {
        match rx.try_recv() {
            Ok(_) => dropped += 1,
            Err(broadcast::error::TryRecvError::Lagged(n)) => dropped += n,
            Err(_) => return dropped,
        }
    }
}

async fn emit<T: Serialize>(reply: &mpsc::Sender<SyncEnvelope>, event: OutboundEvent, data: &T) {
    if let Ok(env) = SyncEnvelope::outbound(event, data) {
        let _ = reply.send(env).await;
    }
}

/// Wait until the channel reports it is no longer connected
pub async fn wait_closed(mut status: watch::Receiver<ChannelStatus>, timeout: Duration) -> bool {
    let closed = status.wait_for(|s| matches!(s, ChannelStatus::Disconnected | ChannelStatus::Disabled));
    matches!(tokio::time::timeout(timeout, closed).await, Ok(Ok(_)))
}
