//! OS print-spool sub-scan (richest metadata, authoritative on conflict)

use async_trait::async_trait;
use std::sync::Arc;

use printer_driver::{CommandRunner, SpoolEntry, SpoolState, list_printers};
use shared::models::{ConnectionType, DiscoveryMethod, PrinterRecord, PrinterStatus};

use super::{DiscoveryConfig, DiscoveryError, PrinterScanner, classify_record};

pub struct SystemScanner {
    runner: Arc<dyn CommandRunner>,
}

impl SystemScanner {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl PrinterScanner for SystemScanner {
    fn method(&self) -> DiscoveryMethod {
        DiscoveryMethod::System
    }

    async fn scan(&self, _config: &DiscoveryConfig) -> Result<Vec<PrinterRecord>, DiscoveryError> {
        let entries = list_printers(self.runner.as_ref())
            .await
            .map_err(|e| DiscoveryError::Spool(e.to_string()))?;
        tracing::debug!(count = entries.len(), "Spool queues listed");
        Ok(entries.iter().map(record_from_entry).collect())
    }
}

/// Map one spool queue to a printer record
pub fn record_from_entry(entry: &SpoolEntry) -> PrinterRecord {
    let (connection, endpoint) = match entry.network_endpoint() {
        Some(endpoint) => (ConnectionType::Network, Some(endpoint)),
        None if entry.is_usb() => (ConnectionType::Usb, None),
        None => (ConnectionType::System, None),
    };

    let mut record = PrinterRecord::new(&entry.name, connection, DiscoveryMethod::System);
    if let Some((host, port)) = endpoint {
        record = record.with_network(host, port);
    }
    record.system_name = Some(entry.name.clone());
    record.description = entry.description.clone();
    record.driver = entry.make_model.clone();
    record.model = entry.make_model.clone();
    record.manufacturer = entry.usb_manufacturer();
    record.is_default = entry.is_default;
    // Spool queues are shareable by definition on CUPS
    record.is_shared = true;
    record.status = match entry.state {
        SpoolState::Disabled => PrinterStatus::Offline,
        SpoolState::Printing => PrinterStatus::Busy,
        SpoolState::Idle => PrinterStatus::Online,
    };

    classify_record(&record).apply(&mut record);
    record
}
