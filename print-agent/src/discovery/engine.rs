//! Discovery orchestration: concurrent sub-scans, merge, cache and control

use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, Notify, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use shared::message::{
    DiscoveryAction, DiscoveryConfigPatch, DiscoveryStatusReport, DiscoverySummary, MethodFlags,
};
use shared::models::{Confidence, DiscoveryMethod, PrinterRecord};
use shared::AppError;

use super::{DiscoveryConfig, DiscoveryError, DiscoveryEvent, PrinterRegistry, PrinterScanner};
use crate::storage::{StateFile, StateStore};
use crate::usb::UsbManager;

/// Merge records from all methods into one set keyed by identity
///
/// A system-spool record replaces any other method's record for the same
/// key and is never replaced itself. Among other methods the first record
/// wins unless a high-confidence record meets a low-confidence one.
pub fn merge_printers(records: impl IntoIterator<Item = PrinterRecord>) -> Vec<PrinterRecord> {
    let mut merged: BTreeMap<String, PrinterRecord> = BTreeMap::new();

    for mut record in records {
        let key = record.identity();
        record.id = key.clone();
        match merged.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get();
                let replace = if existing.discovery_method == DiscoveryMethod::System {
                    false
                } else if record.discovery_method == DiscoveryMethod::System {
                    true
                } else {
                    existing.confidence == Confidence::Low && record.confidence == Confidence::High
                };
                if replace {
                    slot.insert(record);
                }
            }
        }
    }

    merged.into_values().collect()
}

#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    pub printers: Arc<Vec<PrinterRecord>>,
    pub summary: DiscoverySummary,
    /// Per-method failures absorbed during the run
    pub errors: Vec<String>,
}

/// `discovery:cached-printers` payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPrinters {
    pub printers: Vec<PrinterRecord>,
    pub count: usize,
    pub last_run_at: Option<i64>,
}

#[derive(Debug, Default)]
struct RunCache {
    last_run_at: Option<i64>,
    last_duration_ms: Option<u64>,
    last_methods: MethodFlags,
}

pub struct DiscoveryEngine {
    scanners: Vec<Arc<dyn PrinterScanner>>,
    config: RwLock<Arc<DiscoveryConfig>>,
    registry: PrinterRegistry,
    usb: Option<Arc<UsbManager>>,
    store: Option<StateStore>,
    cache: RwLock<RunCache>,
    enabled: AtomicBool,
    running: AtomicBool,
    forced: AtomicBool,
    run_lock: Mutex<()>,
    wake: Notify,
    runs: watch::Sender<u64>,
    events: broadcast::Sender<DiscoveryEvent>,
}

impl DiscoveryEngine {
    pub fn new(config: DiscoveryConfig, registry: PrinterRegistry) -> Self {
        let (events, _) = broadcast::channel(64);
        let (runs, _) = watch::channel(0);
        Self {
            scanners: Vec::new(),
            config: RwLock::new(Arc::new(config)),
            registry,
            usb: None,
            store: None,
            cache: RwLock::new(RunCache::default()),
            enabled: AtomicBool::new(true),
            running: AtomicBool::new(false),
            forced: AtomicBool::new(false),
            run_lock: Mutex::new(()),
            wake: Notify::new(),
            runs,
            events,
        }
    }

    pub fn with_scanner(mut self, scanner: Arc<dyn PrinterScanner>) -> Self {
        self.scanners.push(scanner);
        self
    }

    /// USB presence overrides the status of USB printers after each merge
    pub fn with_usb_manager(mut self, usb: Arc<UsbManager>) -> Self {
        self.usb = Some(usb);
        self
    }

    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> Arc<DiscoveryConfig> {
        self.config.read().clone()
    }

    pub fn registry(&self) -> &PrinterRegistry {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if enabled {
            self.wake.notify_one();
        }
    }

    pub fn run_count(&self) -> u64 {
        *self.runs.borrow()
    }

    /// Resolves once at least one run has completed
    pub async fn wait_for_first_run(&self) {
        let mut rx = self.runs.subscribe();
        let _ = rx.wait_for(|n| *n > 0).await;
    }

    /// Ask the periodic loop to run now, even when periodic runs are stopped
    pub fn request_run(&self) {
        self.forced.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Seed the registry from the last persisted set
    pub async fn load_persisted(&self) {
        let Some(store) = &self.store else { return };
        match store.load::<Vec<PrinterRecord>>(StateFile::Printers).await {
            Ok(Some(printers)) if self.registry.is_empty() => {
                info!(count = printers.len(), "Loaded persisted printer set");
                self.registry.replace(printers);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Ignoring unreadable persisted printer set"),
        }
    }

    /// Run every enabled sub-scan concurrently and replace the printer set
    ///
    /// Never fails: a sub-scan that errors or exceeds the scan timeout
    /// contributes zero records and a `false` method flag.
    #[instrument(skip(self))]
    pub async fn find_printers(&self) -> DiscoveryReport {
        let _guard = self.run_lock.lock().await;
        self.running.store(true, Ordering::SeqCst);
        let started = Instant::now();
        let config = self.config();

        let scans = self
            .scanners
            .iter()
            .filter(|s| config.is_enabled(s.method()))
            .map(|scanner| {
                let config = config.clone();
                async move {
                    let method = scanner.method();
                    let result = match tokio::time::timeout(config.scan_timeout, scanner.scan(&config)).await {
                        Ok(result) => result,
                        Err(_) => Err(DiscoveryError::Timeout {
                            method,
                            timeout: config.scan_timeout,
                        }),
                    };
                    (method, result)
                }
            });
        let results = join_all(scans).await;

        let mut methods = MethodFlags::default();
        let mut errors = Vec::new();
        let mut all = Vec::new();
        for (method, result) in results {
            match result {
                Ok(records) => {
                    debug!(%method, count = records.len(), "Sub-scan succeeded");
                    set_flag(&mut methods, method);
                    all.extend(records);
                }
                Err(e) => {
                    warn!(%method, error = %e, "Sub-scan failed, continuing without it");
                    errors.push(format!("{method}: {e}"));
                }
            }
        }

        let mut printers = merge_printers(all);
        if let Some(usb) = &self.usb {
            usb.augment(&mut printers);
        }

        let set = self.registry.replace(printers);
        let duration_ms = started.elapsed().as_millis() as u64;
        self.runs.send_modify(|n| *n += 1);
        let run_count = self.run_count();

        {
            let mut cache = self.cache.write();
            cache.last_run_at = Some(set.updated_at);
            cache.last_duration_ms = Some(duration_ms);
            cache.last_methods = methods;
        }
        self.running.store(false, Ordering::SeqCst);

        if let Some(store) = &self.store
            && let Err(e) = store.save(StateFile::Printers, &set.printers).await
        {
            warn!(error = %e, "Failed to persist printer set");
        }

        let printers = Arc::new(set.printers.clone());
        let summary = DiscoverySummary {
            total: printers.len(),
            duration_ms,
            methods,
            run_count,
            timestamp: shared::util::now_millis(),
        };
        info!(
            total = summary.total,
            duration_ms,
            run_count,
            failed_methods = errors.len(),
            "Discovery completed"
        );
        let _ = self.events.send(DiscoveryEvent::Completed {
            printers: printers.clone(),
            summary: summary.clone(),
        });

        DiscoveryReport {
            printers,
            summary,
            errors,
        }
    }

    pub fn clear_cache(&self) {
        self.registry.clear();
        *self.cache.write() = RunCache::default();
        info!("Discovery cache cleared");
        let _ = self.events.send(DiscoveryEvent::CacheCleared);
    }

    /// Apply a partial config; the new snapshot is swapped in atomically
    pub fn reconfigure(&self, patch: &DiscoveryConfigPatch) -> Result<DiscoveryConfigPatch, AppError> {
        let mut next = (*self.config()).clone();
        next.apply(patch)?;
        let view = next.to_patch();
        *self.config.write() = Arc::new(next);
        info!(config = ?view, "Discovery reconfigured");
        let _ = self.events.send(DiscoveryEvent::ConfigUpdated(view.clone()));
        // Interval may have changed
        self.wake.notify_one();
        Ok(view)
    }

    /// Execute a `discovery:control` action; returns message and details
    pub async fn control(
        &self,
        action: DiscoveryAction,
        patch: Option<&DiscoveryConfigPatch>,
    ) -> Result<(String, Value), AppError> {
        info!(%action, "Discovery control");
        match action {
            DiscoveryAction::Start => {
                self.set_enabled(true);
                Ok(("Discovery started".into(), serde_json::json!({"enabled": true})))
            }
            DiscoveryAction::Stop => {
                self.set_enabled(false);
                Ok(("Discovery stopped".into(), serde_json::json!({"enabled": false})))
            }
            DiscoveryAction::ClearCache => {
                self.clear_cache();
                Ok(("Discovery cache cleared".into(), Value::Null))
            }
            DiscoveryAction::ForceNow => {
                let report = self.find_printers().await;
                Ok((
                    format!("Discovery found {} printers", report.summary.total),
                    serde_json::to_value(&report.summary).unwrap_or(Value::Null),
                ))
            }
            DiscoveryAction::Reconfigure => {
                let patch = patch.ok_or_else(|| AppError::validation("reconfigure requires a config"))?;
                let view = self.reconfigure(patch)?;
                Ok((
                    "Discovery reconfigured".into(),
                    serde_json::to_value(&view).unwrap_or(Value::Null),
                ))
            }
        }
    }

    pub fn status(&self) -> DiscoveryStatusReport {
        let config = self.config();
        let cache = self.cache.read();
        DiscoveryStatusReport {
            enabled: self.is_enabled(),
            running: self.running.load(Ordering::SeqCst),
            run_count: self.run_count(),
            cached_printers: self.registry.len(),
            last_run_at: cache.last_run_at,
            last_duration_ms: cache.last_duration_ms,
            last_methods: cache.last_methods,
            interval_secs: config.interval.as_secs(),
            config: serde_json::to_value(config.to_patch()).unwrap_or(Value::Null),
        }
    }

    pub fn cached(&self) -> CachedPrinters {
        let set = self.registry.snapshot();
        CachedPrinters {
            printers: set.printers.clone(),
            count: set.len(),
            last_run_at: self.cache.read().last_run_at,
        }
    }

    /// Periodic discovery loop; runs once immediately
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Discovery loop started");
        loop {
            let forced = self.forced.swap(false, Ordering::SeqCst);
            if self.is_enabled() || forced {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = self.find_printers() => {}
                }
            }

            let interval = self.config().interval;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
                _ = self.wake.notified() => {}
            }
        }
        info!("Discovery loop stopped");
    }
}

fn set_flag(flags: &mut MethodFlags, method: DiscoveryMethod) {
    match method {
        DiscoveryMethod::System => flags.system = true,
        DiscoveryMethod::Usb => flags.usb = true,
        DiscoveryMethod::Network => flags.network = true,
        DiscoveryMethod::Bluetooth => flags.bluetooth = true,
    }
}
