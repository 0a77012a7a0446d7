//! USB persistence manager
//!
//! Tracks USB printers across scans and restarts. Every input (periodic
//! scan, hot-plug attach, hot-plug detach) goes through one transition
//! function:
//!
//! - unknown device seen: record created, `Connected` emitted, persisted
//! - known-disconnected device seen again: `Reconnected` emitted
//! - connected device missing from a full scan: moved to history,
//!   `Disconnected` emitted
//! - connected device seen again: `last_seen` refreshed, no event
//!
//! The persisted map is loaded at startup as "previously connected", so
//! the first scan after a restart does not report known hardware as new.

pub mod enumerator;
pub mod vendors;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shared::models::{ConnectionType, DeviceState, PrinterRecord, PrinterStatus, UsbDeviceRecord};

pub use enumerator::{PRINTER_INTERFACE_CLASS, SysfsUsbEnumerator, UsbDeviceInfo, UsbEnumerator};
pub use vendors::{PRINTER_VENDORS, VendorInfo};

use crate::storage::{StateFile, StateStore};

#[derive(Debug, Clone)]
pub struct UsbConfig {
    pub scan_interval: Duration,
    pub vendor_filter: bool,
    pub sysfs_root: PathBuf,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(5),
            vendor_filter: true,
            sysfs_root: PathBuf::from(SysfsUsbEnumerator::DEFAULT_ROOT),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UsbEvent {
    Connected(UsbDeviceRecord),
    Reconnected(UsbDeviceRecord),
    Disconnected(UsbDeviceRecord),
}

/// OS hot-plug notification
#[derive(Debug, Clone)]
pub enum HotplugEvent {
    Attached(UsbDeviceInfo),
    Detached { vendor_id: u16, product_id: u16 },
    /// Something changed; rescan
    Changed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanDelta {
    pub connected: Vec<String>,
    pub reconnected: Vec<String>,
    pub disconnected: Vec<String>,
}

impl ScanDelta {
    pub fn is_empty(&self) -> bool {
        self.connected.is_empty() && self.reconnected.is_empty() && self.disconnected.is_empty()
    }
}

enum Pass {
    /// Devices missing from `seen` are disconnected
    Full,
    /// Only the listed devices changed
    Attach,
    Detach(String),
}

type DeviceMap = Arc<HashMap<String, UsbDeviceRecord>>;

#[derive(Default)]
struct DeviceMaps {
    connected: DeviceMap,
    history: DeviceMap,
}

pub struct UsbManager {
    enumerator: Arc<dyn UsbEnumerator>,
    config: UsbConfig,
    store: Option<StateStore>,
    maps: RwLock<DeviceMaps>,
    scan_lock: Mutex<()>,
    events: broadcast::Sender<UsbEvent>,
    hotplug_tx: mpsc::Sender<HotplugEvent>,
    hotplug_rx: Mutex<Option<mpsc::Receiver<HotplugEvent>>>,
}

impl UsbManager {
    pub fn new(enumerator: Arc<dyn UsbEnumerator>, config: UsbConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        let (hotplug_tx, hotplug_rx) = mpsc::channel(32);
        Self {
            enumerator,
            config,
            store: None,
            maps: RwLock::new(DeviceMaps::default()),
            scan_lock: Mutex::new(()),
            events,
            hotplug_tx,
            hotplug_rx: Mutex::new(Some(hotplug_rx)),
        }
    }

    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UsbEvent> {
        self.events.subscribe()
    }

    /// Sender for platform hot-plug sources
    pub fn hotplug_sender(&self) -> mpsc::Sender<HotplugEvent> {
        self.hotplug_tx.clone()
    }

    /// Read the persisted map
    ///
    /// Devices connected at shutdown start as connected so the first scan
    /// does not report them as new; devices already in history stay there.
    pub async fn load_persisted(&self) -> usize {
        let Some(store) = &self.store else { return 0 };
        let records = match store.load::<Vec<UsbDeviceRecord>>(StateFile::Devices).await {
            Ok(Some(records)) => records,
            Ok(None) => return 0,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable USB device map");
                return 0;
            }
        };

        let mut connected = HashMap::new();
        let mut history = HashMap::new();
        for record in records {
            match record.state {
                DeviceState::Connected => connected.insert(record.id.clone(), record),
                DeviceState::Disconnected => history.insert(record.id.clone(), record),
            };
        }
        let count = connected.len() + history.len();
        info!(
            connected = connected.len(),
            history = history.len(),
            "Loaded persisted USB devices"
        );
        let mut maps = self.maps.write();
        maps.connected = Arc::new(connected);
        maps.history = Arc::new(history);
        count
    }

    pub fn connected(&self) -> Vec<UsbDeviceRecord> {
        let mut list: Vec<_> = self.maps.read().connected.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn history(&self) -> Vec<UsbDeviceRecord> {
        let mut list: Vec<_> = self.maps.read().history.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.maps.read().connected.contains_key(device_id)
    }

    /// Enumerate and apply a full transition pass
    pub async fn scan(&self) -> std::io::Result<ScanDelta> {
        let devices = self.enumerator.enumerate().await?;
        Ok(self.update_printer_status(devices).await)
    }

    /// Full pass over a complete device list
    pub async fn update_printer_status(&self, seen: Vec<UsbDeviceInfo>) -> ScanDelta {
        self.transition(seen, Pass::Full).await
    }

    pub async fn handle_hotplug(&self, event: HotplugEvent) -> std::io::Result<ScanDelta> {
        match event {
            HotplugEvent::Attached(info) => Ok(self.transition(vec![info], Pass::Attach).await),
            HotplugEvent::Detached {
                vendor_id,
                product_id,
            } => Ok(self
                .transition(
                    Vec::new(),
                    Pass::Detach(UsbDeviceRecord::device_id(vendor_id, product_id)),
                )
                .await),
            HotplugEvent::Changed => self.scan().await,
        }
    }

    async fn transition(&self, seen: Vec<UsbDeviceInfo>, pass: Pass) -> ScanDelta {
        let _guard = self.scan_lock.lock().await;
        let now = shared::util::now_millis();

        let (mut connected, mut history) = {
            let maps = self.maps.read();
            ((*maps.connected).clone(), (*maps.history).clone())
        };
        let mut delta = ScanDelta::default();
        let mut events = Vec::new();

        let printers: Vec<_> = seen
            .into_iter()
            .filter(|d| d.is_printer(self.config.vendor_filter))
            .collect();

        for info in &printers {
            let id = info.device_id();
            if let Some(record) = connected.get_mut(&id) {
                record.last_seen = now;
                continue;
            }
            if let Some(mut record) = history.remove(&id) {
                record.state = DeviceState::Connected;
                record.last_seen = now;
                record.disconnected_at = None;
                record.reconnect_count += 1;
                info!(device = %id, name = %record.display_name(), "USB printer reconnected");
                events.push(UsbEvent::Reconnected(record.clone()));
                delta.reconnected.push(id.clone());
                connected.insert(id, record);
                continue;
            }
            let record = info.to_device_record(now);
            info!(device = %id, name = %record.display_name(), "USB printer connected");
            events.push(UsbEvent::Connected(record.clone()));
            delta.connected.push(id.clone());
            connected.insert(id, record);
        }

        let missing: Vec<String> = match &pass {
            Pass::Full => {
                let seen_ids: Vec<String> = printers.iter().map(|d| d.device_id()).collect();
                connected
                    .keys()
                    .filter(|id| !seen_ids.contains(*id))
                    .cloned()
                    .collect()
            }
            Pass::Attach => Vec::new(),
            Pass::Detach(id) => vec![id.clone()],
        };
        for id in missing {
            if let Some(mut record) = connected.remove(&id) {
                record.state = DeviceState::Disconnected;
                record.disconnected_at = Some(now);
                warn!(device = %id, name = %record.display_name(), "USB printer disconnected");
                events.push(UsbEvent::Disconnected(record.clone()));
                delta.disconnected.push(id.clone());
                history.insert(id, record);
            }
        }

        {
            let mut maps = self.maps.write();
            maps.connected = Arc::new(connected);
            maps.history = Arc::new(history);
        }
        for event in events {
            let _ = self.events.send(event);
        }

        if !delta.is_empty() {
            self.persist().await;
        }
        delta
    }

    /// Write connected and history devices to the state file
    pub async fn persist(&self) {
        let Some(store) = &self.store else { return };
        let mut all = self.connected();
        all.extend(self.history());
        if let Err(e) = store.save(StateFile::Devices, &all).await {
            warn!(error = %e, "Failed to persist USB device map");
        }
    }

    /// Align USB printer records with device presence
    ///
    /// Known-but-absent devices are added as offline records so previously
    /// seen hardware stays addressable until it re-attaches.
    pub fn augment(&self, printers: &mut Vec<PrinterRecord>) {
        let maps = self.maps.read();
        for printer in printers.iter_mut() {
            if printer.connection != ConnectionType::Usb {
                continue;
            }
            let (Some(vid), Some(pid)) = (printer.vendor_id, printer.product_id) else {
                continue;
            };
            let id = UsbDeviceRecord::device_id(vid, pid);
            if maps.history.contains_key(&id) && !maps.connected.contains_key(&id) {
                printer.status = PrinterStatus::Offline;
            }
        }

        for record in maps.history.values() {
            let present = printers.iter().any(|p| {
                p.vendor_id == Some(record.vendor_id) && p.product_id == Some(record.product_id)
            });
            if !present {
                let mut info = UsbDeviceInfo::new(record.vendor_id, record.product_id);
                info.product = record.product.clone();
                info.manufacturer = record.manufacturer.clone();
                let mut printer = info.to_printer_record();
                printer.status = PrinterStatus::Offline;
                printer.last_seen = record.last_seen;
                printers.push(printer);
            }
        }
        printers.sort_by(|a, b| a.id.cmp(&b.id));
    }

    /// Periodic scan plus hot-plug handling until shutdown
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let Some(mut hotplug) = self.hotplug_rx.lock().await.take() else {
            warn!("USB manager loop already running");
            return;
        };
        let mut ticker = tokio::time::interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.config.scan_interval.as_secs_f64(), "USB manager started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.scan().await {
                        debug!(error = %e, "USB scan failed");
                    }
                }
                Some(event) = hotplug.recv() => {
                    if let Err(e) = self.handle_hotplug(event).await {
                        debug!(error = %e, "Hot-plug handling failed");
                    }
                }
            }
        }

        self.persist().await;
        info!("USB manager stopped");
    }
}

/// Poll `/dev/usb` for printer node changes and report them as hot-plug events
pub async fn watch_device_nodes(
    dir: PathBuf,
    tx: mpsc::Sender<HotplugEvent>,
    shutdown: CancellationToken,
) {
    let mut last = list_lp_nodes(&dir).await;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let now = list_lp_nodes(&dir).await;
                if now != last {
                    debug!(before = last.len(), after = now.len(), "USB printer nodes changed");
                    last = now;
                    if tx.send(HotplugEvent::Changed).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn list_lp_nodes(dir: &std::path::Path) -> Vec<String> {
    let mut nodes = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("lp") {
                nodes.push(name);
            }
        }
    }
    nodes.sort();
    nodes
}
