//! Network sub-scan: bounded-concurrency TCP connect probes over a CIDR

use async_trait::async_trait;
use futures::{StreamExt, stream};
use std::net::{Ipv4Addr, SocketAddr};

use printer_driver::probe_tcp;
use shared::models::{ConnectionType, DiscoveryMethod, PrinterRecord};

use super::{DiscoveryConfig, DiscoveryError, PrinterScanner, classify_port};

/// Largest range scanned in one run (a /22)
pub const MAX_HOSTS: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    pub network: Ipv4Addr,
    pub prefix: u8,
}

impl Cidr {
    /// Host addresses; network and broadcast are excluded below /31
    pub fn hosts(&self) -> Vec<Ipv4Addr> {
        let base = u32::from(self.network);
        let size: u64 = 1u64 << (32 - self.prefix as u32);
        let (first, last) = if self.prefix >= 31 {
            (base as u64, base as u64 + size - 1)
        } else {
            (base as u64 + 1, base as u64 + size - 2)
        };
        (first..=last).map(|ip| Ipv4Addr::from(ip as u32)).collect()
    }
}

pub fn parse_cidr(range: &str) -> Result<Cidr, DiscoveryError> {
    let invalid = |reason: &str| DiscoveryError::InvalidRange {
        range: range.to_string(),
        reason: reason.to_string(),
    };

    let (addr, prefix) = range.trim().split_once('/').unwrap_or((range.trim(), "32"));
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid("not an IPv4 address"))?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid("prefix is not a number"))?;
    if prefix > 32 {
        return Err(invalid("prefix must be at most 32"));
    }
    let host_bits = 32 - prefix as u32;
    if host_bits > 0 && (1u64 << host_bits) > MAX_HOSTS as u64 + 2 {
        return Err(invalid("range too large, use /22 or smaller"));
    }

    let mask = if prefix == 0 { 0 } else { u32::MAX << host_bits };
    Ok(Cidr {
        network: Ipv4Addr::from(u32::from(addr) & mask),
        prefix,
    })
}

pub struct NetworkScanner;

#[async_trait]
impl PrinterScanner for NetworkScanner {
    fn method(&self) -> DiscoveryMethod {
        DiscoveryMethod::Network
    }

    async fn scan(&self, config: &DiscoveryConfig) -> Result<Vec<PrinterRecord>, DiscoveryError> {
        let Some(range) = config.network_range.as_deref() else {
            tracing::debug!("Network scan enabled without a range, skipping");
            return Ok(Vec::new());
        };
        let cidr = parse_cidr(range)?;
        let targets: Vec<SocketAddr> = cidr
            .hosts()
            .into_iter()
            .flat_map(|ip| {
                config
                    .ports
                    .iter()
                    .map(move |port| SocketAddr::from((ip, *port)))
            })
            .collect();

        let timeout = config.network_timeout;
        let probes = targets.len();
        let mut found: Vec<PrinterRecord> = stream::iter(targets)
            .map(|addr| async move { probe_tcp(addr, timeout).await.ok().map(|_| addr) })
            .buffer_unordered(config.max_in_flight.max(1))
            .filter_map(|open| async move { open.map(record_for_open_port) })
            .collect()
            .await;

        found.sort_by(|a, b| a.id.cmp(&b.id));
        tracing::debug!(range = %range, probes, open = found.len(), "Network scan finished");
        Ok(found)
    }
}

/// Provisional record for an open printer port
pub fn record_for_open_port(addr: SocketAddr) -> PrinterRecord {
    let ip = addr.ip().to_string();
    let mut record = PrinterRecord::new(
        format!("Network printer {}:{}", ip, addr.port()),
        ConnectionType::Network,
        DiscoveryMethod::Network,
    )
    .with_network(ip, addr.port());
    classify_port(addr.port()).apply(&mut record);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{Confidence, PrinterType};
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_cidr_masks_host_bits() {
        let cidr = parse_cidr("192.168.1.77/24").unwrap();
        assert_eq!(cidr.network, Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(cidr.hosts().len(), 254);
        assert_eq!(cidr.hosts()[0], Ipv4Addr::new(192, 168, 1, 1));
    }

    #[test]
    fn test_single_host_and_point_to_point() {
        assert_eq!(parse_cidr("10.0.0.5").unwrap().hosts(), vec![Ipv4Addr::new(10, 0, 0, 5)]);
        assert_eq!(parse_cidr("10.0.0.4/31").unwrap().hosts().len(), 2);
    }

    #[test]
    fn test_rejects_bad_ranges() {
        assert!(parse_cidr("10.0.0.0/8").is_err());
        assert!(parse_cidr("10.0.0/24").is_err());
        assert!(parse_cidr("10.0.0.0/33").is_err());
    }

    #[tokio::test]
    async fn test_scan_finds_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        let config = DiscoveryConfig {
            enable_network: true,
            network_range: Some("127.0.0.1/32".into()),
            ports: vec![port],
            network_timeout: Duration::from_millis(300),
            ..Default::default()
        };
        let found = NetworkScanner.scan(&config).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, format!("net-127.0.0.1-{port}"));
        assert_eq!(found[0].confidence, Confidence::Low);
    }

    #[test]
    fn test_raw_port_is_provisionally_thermal() {
        let record = record_for_open_port("192.168.1.9:9100".parse().unwrap());
        assert_eq!(record.printer_type, PrinterType::Thermal);
        assert!(record.supports_raw_socket());
    }
}
