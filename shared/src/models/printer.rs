//! Printer Model

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Functional class of a printer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterType {
    Thermal,
    Kitchen,
    Label,
    Standard,
}

/// How the agent reaches the printer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Usb,
    Network,
    Bluetooth,
    Serial,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterStatus {
    Online,
    Offline,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Text,
    Barcode,
    Cut,
    CashDrawer,
    Labels,
    QrCode,
    Buzzer,
}

/// Discovery method that produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    /// OS print spool registry (authoritative)
    System,
    Usb,
    Network,
    Bluetooth,
}

/// How much the classification of a record can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    #[default]
    High,
    /// Port-number heuristic only
    Low,
}

macro_rules! impl_display_via_serde {
    ($($t:ty),*) => {
        $(impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match serde_json::to_value(self) {
                    Ok(serde_json::Value::String(s)) => f.write_str(&s),
                    _ => write!(f, "{:?}", self),
                }
            }
        })*
    };
}

impl_display_via_serde!(PrinterType, ConnectionType, PrinterStatus, Capability, DiscoveryMethod);

/// A printer known to the agent
///
/// `id` is derived from the record's identity (see [`PrinterRecord::identity`])
/// so it is stable across rescans and doubles as the dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub printer_type: PrinterType,
    pub connection: ConnectionType,
    pub status: PrinterStatus,
    pub capabilities: BTreeSet<Capability>,
    pub discovery_method: DiscoveryMethod,
    /// Unix millis
    pub last_seen: i64,
    #[serde(default)]
    pub confidence: Confidence,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Spool queue name / device URI, when the OS spool knows this printer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_shared: bool,
}

impl PrinterRecord {
    /// Minimal record; call [`PrinterRecord::with_identity`] after setting
    /// address/usb ids so the id matches the final identity.
    pub fn new(
        name: impl Into<String>,
        connection: ConnectionType,
        discovery_method: DiscoveryMethod,
    ) -> Self {
        let mut record = Self {
            id: String::new(),
            name: name.into(),
            printer_type: PrinterType::Standard,
            connection,
            status: PrinterStatus::Online,
            capabilities: BTreeSet::from([Capability::Text]),
            discovery_method,
            last_seen: crate::util::now_millis(),
            confidence: Confidence::High,
            address: None,
            port: None,
            vendor_id: None,
            product_id: None,
            manufacturer: None,
            model: None,
            description: None,
            system_name: None,
            driver: None,
            is_default: false,
            is_shared: false,
        };
        record.id = record.identity();
        record
    }

    pub fn with_network(mut self, address: impl Into<String>, port: u16) -> Self {
        self.address = Some(address.into());
        self.port = Some(port);
        self.id = self.identity();
        self
    }

    pub fn with_usb(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = Some(vendor_id);
        self.product_id = Some(product_id);
        self.id = self.identity();
        self
    }

    /// Re-derive `id` from the current identity fields
    pub fn with_identity(mut self) -> Self {
        self.id = self.identity();
        self
    }

    /// Deterministic identity, also used as the dedup key.
    ///
    /// Network address:port wins, then USB vendor:product, then the
    /// normalized (lowercased, whitespace collapsed) name.
    pub fn identity(&self) -> String {
        if let (Some(addr), Some(port)) = (&self.address, self.port) {
            return format!("net-{}-{}", addr, port);
        }
        if let (Some(vid), Some(pid)) = (self.vendor_id, self.product_id) {
            return format!("usb-{:04x}-{:04x}", vid, pid);
        }
        format!("name-{}", normalize_name(&self.name))
    }

    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }

    /// Raw-socket path applies (network printer on the 9100 profile)
    pub fn supports_raw_socket(&self) -> bool {
        self.connection == ConnectionType::Network
            && self.address.is_some()
            && self.port == Some(RAW_SOCKET_PORT)
    }

    /// Thermal-class printers accept raw ESC/POS
    pub fn is_escpos(&self) -> bool {
        matches!(self.printer_type, PrinterType::Thermal | PrinterType::Kitchen)
    }

    /// Case-insensitive match on `id` or `name`
    pub fn matches(&self, key: &str) -> bool {
        self.id == key || self.name.eq_ignore_ascii_case(key)
    }
}

/// Raw-socket (JetDirect) port
pub const RAW_SOCKET_PORT: u16 = 9100;
/// LPR/LPD port
pub const LPR_PORT: u16 = 515;
/// IPP port
pub const IPP_PORT: u16 = 631;

/// Lowercase and join whitespace-separated words with `-`
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// Per-printer reachability, as reported by `GET /printers/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterStatusReport {
    pub id: String,
    pub name: String,
    pub status: PrinterStatus,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: i64,
}
