//! Bluetooth sub-scan (best effort, BlueZ `bluetoothctl`)

use async_trait::async_trait;
use std::sync::Arc;

use printer_driver::CommandRunner;
use shared::models::{ConnectionType, DiscoveryMethod, PrinterRecord};

use super::{DiscoveryConfig, DiscoveryError, PrinterScanner, classify};

/// Name fragments that suggest a printer
const PRINTER_HINTS: &[&str] = &[
    "printer", "print", "pos", "receipt", "thermal", "label", "zebra", "star", "epson", "bixolon",
    "mtp-", "rpp", "pt-",
];

pub struct BluetoothScanner {
    runner: Arc<dyn CommandRunner>,
}

impl BluetoothScanner {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl PrinterScanner for BluetoothScanner {
    fn method(&self) -> DiscoveryMethod {
        DiscoveryMethod::Bluetooth
    }

    async fn scan(&self, _config: &DiscoveryConfig) -> Result<Vec<PrinterRecord>, DiscoveryError> {
        let args = vec!["devices".to_string()];
        let output = self
            .runner
            .run("bluetoothctl", &args, None)
            .await
            .map_err(|e| DiscoveryError::Unavailable(format!("bluetoothctl: {e}")))?;
        if !output.success {
            return Err(DiscoveryError::Unavailable(format!(
                "bluetoothctl exited with {:?}: {}",
                output.code, output.stderr
            )));
        }
        Ok(parse_devices(&output.stdout))
    }
}

/// Parse `Device AA:BB:CC:DD:EE:FF Name` lines, keeping printer-like names
pub fn parse_devices(output: &str) -> Vec<PrinterRecord> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (mac, name) = rest.split_once(' ')?;
            let name = name.trim();
            let lower = name.to_lowercase();
            if name.is_empty() || !PRINTER_HINTS.iter().any(|h| lower.contains(h)) {
                return None;
            }
            let mut record =
                PrinterRecord::new(name, ConnectionType::Bluetooth, DiscoveryMethod::Bluetooth);
            record.address = Some(mac.to_string());
            record.description = Some(format!("Bluetooth {mac}"));
            classify(name).apply(&mut record);
            Some(record)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::PrinterType;

    #[test]
    fn test_keeps_printer_like_names_only() {
        let out = "Device 00:11:22:33:44:55 MTP-II Thermal\n\
                   Device 66:77:88:99:AA:BB Jabra Headset\n\
                   Device CC:DD:EE:FF:00:11 Zebra ZQ320\n";
        let records = parse_devices(out);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].printer_type, PrinterType::Thermal);
        assert_eq!(records[0].address.as_deref(), Some("00:11:22:33:44:55"));
        // No port, so identity falls back to the name
        assert_eq!(records[0].id, "name-mtp-ii-thermal");
        assert_eq!(records[1].printer_type, PrinterType::Label);
    }
}
