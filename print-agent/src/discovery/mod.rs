//! Printer discovery
//!
//! Four independent sub-scans (OS spool, USB, network port scan,
//! Bluetooth) run concurrently. A failing or slow sub-scan contributes
//! nothing; it never aborts the others. Results are merged by identity,
//! with the OS spool record winning any collision.
//!
//! # Module layout
//!
//! - [`engine`] - orchestration, merge, cache and control
//! - [`registry`] - the current printer set (snapshot swap)
//! - [`classify`] - keyword rule table for type/capabilities
//! - [`system`], [`usb`], [`network`], [`bluetooth`] - sub-scans

pub mod bluetooth;
pub mod classify;
pub mod engine;
pub mod network;
pub mod reachability;
pub mod registry;
pub mod system;
pub mod usb;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use shared::message::{DiscoveryConfigPatch, DiscoverySummary};
use shared::models::{DiscoveryMethod, PrinterRecord, RAW_SOCKET_PORT, IPP_PORT, LPR_PORT};
use shared::{AppError, ErrorCode};

pub use classify::{Classification, classify, classify_port, classify_record};
pub use engine::{DiscoveryEngine, DiscoveryReport, merge_printers};
pub use reachability::{apply_reports, probe_printer, probe_printers};
pub use registry::{PrinterRegistry, PrinterSet};

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryConfig {
    /// Periodic discovery interval
    pub interval: Duration,
    pub enable_system: bool,
    pub enable_usb: bool,
    pub enable_network: bool,
    pub enable_bluetooth: bool,
    /// CIDR scanned by the network sub-scan
    pub network_range: Option<String>,
    pub ports: Vec<u16>,
    /// Per-probe connect timeout
    pub network_timeout: Duration,
    /// Concurrent network probes
    pub max_in_flight: usize,
    /// Only allowlisted USB vendors count as printers
    pub vendor_filter: bool,
    /// Deadline for each sub-scan
    pub scan_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            enable_system: true,
            enable_usb: true,
            enable_network: false,
            enable_bluetooth: false,
            network_range: None,
            ports: vec![RAW_SOCKET_PORT, LPR_PORT, IPP_PORT],
            network_timeout: Duration::from_millis(500),
            max_in_flight: 64,
            vendor_filter: true,
            scan_timeout: Duration::from_secs(30),
        }
    }
}

impl DiscoveryConfig {
    pub fn is_enabled(&self, method: DiscoveryMethod) -> bool {
        match method {
            DiscoveryMethod::System => self.enable_system,
            DiscoveryMethod::Usb => self.enable_usb,
            DiscoveryMethod::Network => self.enable_network,
            DiscoveryMethod::Bluetooth => self.enable_bluetooth,
        }
    }

    /// Apply a partial update; the config is unchanged on error
    pub fn apply(&mut self, patch: &DiscoveryConfigPatch) -> Result<(), AppError> {
        let mut next = self.clone();

        if let Some(secs) = patch.interval_secs {
            if secs == 0 {
                return Err(AppError::with_message(
                    ErrorCode::ValueOutOfRange,
                    "intervalSecs must be greater than zero",
                ));
            }
            next.interval = Duration::from_secs(secs);
        }
        if let Some(v) = patch.enable_system {
            next.enable_system = v;
        }
        if let Some(v) = patch.enable_usb {
            next.enable_usb = v;
        }
        if let Some(v) = patch.enable_network {
            next.enable_network = v;
        }
        if let Some(v) = patch.enable_bluetooth {
            next.enable_bluetooth = v;
        }
        if let Some(range) = &patch.network_range {
            if range.trim().is_empty() {
                next.network_range = None;
            } else {
                network::parse_cidr(range).map_err(|e| {
                    AppError::with_message(ErrorCode::InvalidNetworkRange, e.to_string())
                        .with_suggestion("Use CIDR notation, e.g. 192.168.1.0/24")
                })?;
                next.network_range = Some(range.trim().to_string());
            }
        }
        if let Some(ports) = &patch.ports {
            if ports.is_empty() || ports.contains(&0) {
                return Err(AppError::validation("ports must be a non-empty list of TCP ports"));
            }
            next.ports = ports.clone();
        }
        if let Some(ms) = patch.network_timeout_ms {
            next.network_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(n) = patch.max_in_flight {
            next.max_in_flight = n.max(1);
        }
        if let Some(v) = patch.vendor_filter {
            next.vendor_filter = v;
        }

        *self = next;
        Ok(())
    }

    /// Full view in wire form
    pub fn to_patch(&self) -> DiscoveryConfigPatch {
        DiscoveryConfigPatch {
            interval_secs: Some(self.interval.as_secs()),
            enable_system: Some(self.enable_system),
            enable_usb: Some(self.enable_usb),
            enable_network: Some(self.enable_network),
            enable_bluetooth: Some(self.enable_bluetooth),
            network_range: self.network_range.clone(),
            ports: Some(self.ports.clone()),
            network_timeout_ms: Some(self.network_timeout.as_millis() as u64),
            max_in_flight: Some(self.max_in_flight),
            vendor_filter: Some(self.vendor_filter),
        }
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("print spool query failed: {0}")]
    Spool(String),

    #[error("USB enumeration failed: {0}")]
    Usb(#[from] std::io::Error),

    #[error("invalid network range '{range}': {reason}")]
    InvalidRange { range: String, reason: String },

    #[error("{method} scan timed out after {}ms", .timeout.as_millis())]
    Timeout {
        method: DiscoveryMethod,
        timeout: Duration,
    },

    #[error("{0}")]
    Unavailable(String),
}

/// One independent discovery method
#[async_trait]
pub trait PrinterScanner: Send + Sync {
    fn method(&self) -> DiscoveryMethod;

    async fn scan(&self, config: &DiscoveryConfig) -> Result<Vec<PrinterRecord>, DiscoveryError>;
}

/// Broadcast to subscribers (sync channel, health)
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Completed {
        printers: Arc<Vec<PrinterRecord>>,
        summary: DiscoverySummary,
    },
    CacheCleared,
    ConfigUpdated(DiscoveryConfigPatch),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_applies_only_present_fields() {
        let mut config = DiscoveryConfig::default();
        let patch = DiscoveryConfigPatch {
            enable_network: Some(true),
            network_range: Some("10.0.0.0/30".into()),
            ..Default::default()
        };
        config.apply(&patch).unwrap();
        assert!(config.enable_network);
        assert_eq!(config.network_range.as_deref(), Some("10.0.0.0/30"));
        assert!(config.enable_system);
        assert_eq!(config.interval, Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_range_leaves_config_untouched() {
        let mut config = DiscoveryConfig::default();
        let patch = DiscoveryConfigPatch {
            enable_usb: Some(false),
            network_range: Some("300.1.1.1/24".into()),
            ..Default::default()
        };
        let err = config.apply(&patch).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidNetworkRange);
        assert!(config.enable_usb);
    }

    #[test]
    fn test_to_patch_round_trips() {
        let config = DiscoveryConfig::default();
        let mut other = DiscoveryConfig {
            enable_usb: false,
            ..Default::default()
        };
        other.apply(&config.to_patch()).unwrap();
        assert_eq!(other, config);
    }
}
