//! USB sub-scan

use async_trait::async_trait;
use std::sync::Arc;

use shared::models::{DiscoveryMethod, PrinterRecord};

use super::{DiscoveryConfig, DiscoveryError, PrinterScanner};
use crate::usb::UsbEnumerator;

pub struct UsbScanner {
    enumerator: Arc<dyn UsbEnumerator>,
}

impl UsbScanner {
    pub fn new(enumerator: Arc<dyn UsbEnumerator>) -> Self {
        Self { enumerator }
    }
}

#[async_trait]
impl PrinterScanner for UsbScanner {
    fn method(&self) -> DiscoveryMethod {
        DiscoveryMethod::Usb
    }

    async fn scan(&self, config: &DiscoveryConfig) -> Result<Vec<PrinterRecord>, DiscoveryError> {
        let devices = self.enumerator.enumerate().await?;
        let total = devices.len();
        let printers: Vec<_> = devices
            .iter()
            .filter(|d| d.is_printer(config.vendor_filter))
            .map(|d| d.to_printer_record())
            .collect();
        tracing::debug!(devices = total, printers = printers.len(), "USB scan finished");
        Ok(printers)
    }
}
