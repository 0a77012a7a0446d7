//! Printer reachability
//!
//! Network printers are probed with a TCP connect. USB printers count as
//! reachable while the USB manager sees the device. Spool printers use the
//! state reported by the last system scan.

use futures::future::join_all;
use std::net::SocketAddr;
use std::time::Duration;

use printer_driver::probe_tcp;
use shared::models::{
    ConnectionType, PrinterRecord, PrinterStatus, PrinterStatusReport, UsbDeviceRecord,
};

use super::PrinterRegistry;
use crate::usb::UsbManager;

pub async fn probe_printers(
    printers: &[PrinterRecord],
    usb: Option<&UsbManager>,
    timeout: Duration,
) -> Vec<PrinterStatusReport> {
    join_all(printers.iter().map(|p| probe_printer(p, usb, timeout))).await
}

/// Write probe results back into the printer set
///
/// A printer that answers again comes back as online; other statuses
/// (busy, error) are left to the scans that report them.
pub fn apply_reports(registry: &PrinterRegistry, reports: &[PrinterStatusReport]) {
    for report in reports {
        let status = if report.reachable && report.status == PrinterStatus::Offline {
            PrinterStatus::Online
        } else {
            report.status
        };
        registry.set_status(&report.id, status);
    }
}

pub async fn probe_printer(
    printer: &PrinterRecord,
    usb: Option<&UsbManager>,
    timeout: Duration,
) -> PrinterStatusReport {
    let mut report = PrinterStatusReport {
        id: printer.id.clone(),
        name: printer.name.clone(),
        status: printer.status,
        reachable: printer.status != PrinterStatus::Offline,
        latency_ms: None,
        error: None,
        checked_at: shared::util::now_millis(),
    };

    if let (Some(addr), Some(port)) = (&printer.address, printer.port)
        && printer.connection == ConnectionType::Network
    {
        let target = match addr.parse::<std::net::IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, port),
            Err(_) => {
                report.reachable = false;
                report.status = PrinterStatus::Offline;
                report.error = Some(format!("invalid address {addr}"));
                return report;
            }
        };
        match probe_tcp(target, timeout).await {
            Ok(latency) => {
                report.reachable = true;
                report.latency_ms = Some(latency.as_millis() as u64);
                if report.status == PrinterStatus::Offline {
                    report.status = PrinterStatus::Online;
                }
            }
            Err(e) => {
                report.reachable = false;
                report.status = PrinterStatus::Offline;
                report.error = Some(e.to_string());
            }
        }
        return report;
    }

    if printer.connection == ConnectionType::Usb
        && let (Some(usb), Some(vid), Some(pid)) = (usb, printer.vendor_id, printer.product_id)
    {
        let present = usb.is_connected(&UsbDeviceRecord::device_id(vid, pid));
        report.reachable = present;
        if !present {
            report.status = PrinterStatus::Offline;
            report.error = Some("USB device not connected".into());
        }
    }
    report
}
