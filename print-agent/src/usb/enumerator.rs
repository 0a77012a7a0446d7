//! USB enumeration

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use shared::models::{
    ConnectionType, DiscoveryMethod, PrinterRecord, UsbDeviceRecord,
};

use super::vendors;
use crate::discovery::classify;

/// USB interface class for printers
pub const PRINTER_INTERFACE_CLASS: u8 = 0x07;

/// A device as reported by the OS, before any classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
    /// Interface classes advertised by the device
    pub interface_classes: Vec<u8>,
}

impl UsbDeviceInfo {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            manufacturer: None,
            product: None,
            serial: None,
            interface_classes: Vec::new(),
        }
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    pub fn device_id(&self) -> String {
        UsbDeviceRecord::device_id(self.vendor_id, self.product_id)
    }

    /// Allowlisted vendors always count; the printer interface class only
    /// counts when the vendor filter is off
    pub fn is_printer(&self, vendor_filter: bool) -> bool {
        vendors::is_printer_vendor(self.vendor_id)
            || (!vendor_filter && self.interface_classes.contains(&PRINTER_INTERFACE_CLASS))
    }

    fn display_name(&self) -> String {
        if let Some(product) = self.product.as_deref().filter(|p| !p.trim().is_empty()) {
            return product.trim().to_string();
        }
        match vendors::lookup(self.vendor_id) {
            Some(v) => format!("{} printer", v.name),
            None => format!("USB printer {:04x}:{:04x}", self.vendor_id, self.product_id),
        }
    }

    /// Printer record for this device, classified from descriptors and vendor hints
    pub fn to_printer_record(&self) -> PrinterRecord {
        let vendor = vendors::lookup(self.vendor_id);
        let mut record = PrinterRecord::new(self.display_name(), ConnectionType::Usb, DiscoveryMethod::Usb)
            .with_usb(self.vendor_id, self.product_id);
        record.manufacturer = self
            .manufacturer
            .clone()
            .or_else(|| vendor.map(|v| v.name.to_string()));
        record.model = self.product.clone();

        let text = [
            Some(record.name.as_str()),
            record.manufacturer.as_deref(),
            vendor.map(|v| v.name),
            vendor.map(|v| v.hint),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
        classify::classify(&text).apply(&mut record);
        record
    }

    /// Fresh persisted record for a first sighting
    pub fn to_device_record(&self, now: i64) -> UsbDeviceRecord {
        let printer = self.to_printer_record();
        UsbDeviceRecord {
            id: self.device_id(),
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            manufacturer: printer.manufacturer,
            product: self.product.clone(),
            serial: self.serial.clone(),
            capabilities: printer.capabilities,
            state: shared::models::DeviceState::Connected,
            first_seen: now,
            last_seen: now,
            disconnected_at: None,
            reconnect_count: 0,
        }
    }
}

#[async_trait]
pub trait UsbEnumerator: Send + Sync {
    async fn enumerate(&self) -> io::Result<Vec<UsbDeviceInfo>>;
}

/// Enumerates `/sys/bus/usb/devices` (Linux)
#[derive(Debug, Clone)]
pub struct SysfsUsbEnumerator {
    root: PathBuf,
}

impl SysfsUsbEnumerator {
    pub const DEFAULT_ROOT: &'static str = "/sys/bus/usb/devices";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsUsbEnumerator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ROOT)
    }
}

#[async_trait]
impl UsbEnumerator for SysfsUsbEnumerator {
    async fn enumerate(&self) -> io::Result<Vec<UsbDeviceInfo>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || read_sysfs(&root))
            .await
            .map_err(io::Error::other)?
    }
}

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    std::fs::read_to_string(dir.join(name))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn read_hex(dir: &Path, name: &str) -> Option<u16> {
    read_attr(dir, name).and_then(|s| u16::from_str_radix(&s, 16).ok())
}

/// Devices are directories with `idVendor`; interfaces are `<device>:<cfg>.<n>`
/// siblings carrying `bInterfaceClass`
fn read_sysfs(root: &Path) -> io::Result<Vec<UsbDeviceInfo>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut devices: HashMap<String, UsbDeviceInfo> = HashMap::new();
    let mut interfaces: Vec<(String, u8)> = Vec::new();

    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let dir = entry.path();

        if let Some((device, _)) = name.split_once(':') {
            if let Some(class) = read_attr(&dir, "bInterfaceClass")
                .and_then(|c| u8::from_str_radix(&c, 16).ok())
            {
                interfaces.push((device.to_string(), class));
            }
            continue;
        }

        let (Some(vendor_id), Some(product_id)) =
            (read_hex(&dir, "idVendor"), read_hex(&dir, "idProduct"))
        else {
            continue;
        };
        devices.insert(
            name,
            UsbDeviceInfo {
                vendor_id,
                product_id,
                manufacturer: read_attr(&dir, "manufacturer"),
                product: read_attr(&dir, "product"),
                serial: read_attr(&dir, "serial"),
                interface_classes: Vec::new(),
            },
        );
    }

    for (device, class) in interfaces {
        if let Some(info) = devices.get_mut(&device)
            && !info.interface_classes.contains(&class)
        {
            info.interface_classes.push(class);
        }
    }

    let mut list: Vec<_> = devices.into_values().collect();
    list.sort_by_key(|d| (d.vendor_id, d.product_id));
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{Capability, PrinterType};

    fn write(dir: &Path, name: &str, value: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), format!("{value}\n")).unwrap();
    }

    #[tokio::test]
    async fn test_sysfs_enumeration() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();

        let printer = root.join("1-1");
        write(&printer, "idVendor", "04b8");
        write(&printer, "idProduct", "0202");
        write(&printer, "product", "TM-T88V");
        write(&printer, "manufacturer", "EPSON");
        write(&root.join("1-1:1.0"), "bInterfaceClass", "07");

        let hub = root.join("usb1");
        write(&hub, "idVendor", "1d6b");
        write(&hub, "idProduct", "0002");

        let devices = SysfsUsbEnumerator::new(root).enumerate().await.unwrap();
        assert_eq!(devices.len(), 2);
        let epson = devices.iter().find(|d| d.vendor_id == 0x04b8).unwrap();
        assert_eq!(epson.product.as_deref(), Some("TM-T88V"));
        assert_eq!(epson.interface_classes, vec![PRINTER_INTERFACE_CLASS]);
        assert!(epson.is_printer(true));
        let hub = devices.iter().find(|d| d.vendor_id == 0x1d6b).unwrap();
        assert!(!hub.is_printer(false));
    }

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let devices = SysfsUsbEnumerator::new("/nonexistent/usb/root")
            .enumerate()
            .await
            .unwrap();
        assert!(devices.is_empty());
    }

    #[test]
    fn test_interface_class_counts_without_filter() {
        let mut info = UsbDeviceInfo::new(0x03f0, 0x1234);
        info.interface_classes.push(PRINTER_INTERFACE_CLASS);
        assert!(!info.is_printer(true));
        assert!(info.is_printer(false));
    }

    #[test]
    fn test_sparse_descriptor_uses_vendor_hint() {
        let record = UsbDeviceInfo::new(0x0519, 0x0003).to_printer_record();
        assert_eq!(record.id, "usb-0519-0003");
        assert_eq!(record.name, "Star Micronics printer");
        assert_eq!(record.printer_type, PrinterType::Thermal);

        let record = UsbDeviceInfo::new(0x04b8, 1).with_product("TM-T88").to_printer_record();
        assert_eq!(record.printer_type, PrinterType::Thermal);
        assert!(record.has_capability(Capability::Cut));
        assert!(record.has_capability(Capability::CashDrawer));
    }
}
