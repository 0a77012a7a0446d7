//! Persisted USB device record

use super::printer::Capability;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Connection state tracked per USB device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Connected,
    Disconnected,
}

/// A USB printer the agent has seen at least once
///
/// Written to `state/devices.json` on every scan delta and read back at
/// startup so known hardware is recognized before it re-attaches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsbDeviceRecord {
    /// `usb-{vid:04x}-{pid:04x}`, same as the printer id
    pub id: String,
    pub vendor_id: u16,
    pub product_id: u16,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    pub state: DeviceState,
    pub first_seen: i64,
    pub last_seen: i64,
    #[serde(default)]
    pub disconnected_at: Option<i64>,
    /// How many times the device came back after a disconnect
    #[serde(default)]
    pub reconnect_count: u32,
}

impl UsbDeviceRecord {
    pub fn device_id(vendor_id: u16, product_id: u16) -> String {
        format!("usb-{:04x}-{:04x}", vendor_id, product_id)
    }

    /// Human label: product, manufacturer, or the vid:pid pair
    pub fn display_name(&self) -> String {
        match (&self.manufacturer, &self.product) {
            (_, Some(p)) if !p.is_empty() => p.clone(),
            (Some(m), _) if !m.is_empty() => m.clone(),
            _ => format!("USB {:04x}:{:04x}", self.vendor_id, self.product_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_matches_printer_identity() {
        assert_eq!(UsbDeviceRecord::device_id(0x04b8, 1), "usb-04b8-0001");
    }

    #[test]
    fn display_name_fallbacks() {
        let mut rec = UsbDeviceRecord {
            id: UsbDeviceRecord::device_id(0x0519, 2),
            vendor_id: 0x0519,
            product_id: 2,
            manufacturer: None,
            product: None,
            serial: None,
            capabilities: BTreeSet::new(),
            state: DeviceState::Connected,
            first_seen: 0,
            last_seen: 0,
            disconnected_at: None,
            reconnect_count: 0,
        };
        assert_eq!(rec.display_name(), "USB 0519:0002");
        rec.manufacturer = Some("Star".into());
        assert_eq!(rec.display_name(), "Star");
        rec.product = Some("TSP100".into());
        assert_eq!(rec.display_name(), "TSP100");
    }
}
