//! Job executor
//!
//! Picks the delivery path for a printer and sends the rendered bytes:
//! network printers on the raw-socket profile get a direct TCP write guarded
//! by a per-printer circuit breaker; everything else goes through the OS
//! print command, raw for ESC/POS printers and formatted otherwise.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use printer_driver::{
    CommandRunner, NetworkPrinter, PageFeatures, PrintError, Printer, SpoolMode, SpoolPrinter, TestPage,
    render_text,
};
use shared::models::{
    Capability, JobPayload, JobType, PrintJob, PrintJobRequest, PrinterRecord,
};

use super::DispatchConfig;
use crate::resilience::{BreakerError, BreakerRegistry};

/// Sends a job to a printer; returns a short delivery note
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, printer: &PrinterRecord, job: &PrintJob) -> Result<String, PrintError>;
}

/// Delivery path chosen for a printer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryPath {
    RawSocket { host: String, port: u16 },
    Spool { queue: String, mode: SpoolMode },
}

impl DeliveryPath {
    pub fn for_printer(printer: &PrinterRecord) -> Self {
        if printer.supports_raw_socket()
            && let (Some(host), Some(port)) = (&printer.address, printer.port)
        {
            return Self::RawSocket {
                host: host.clone(),
                port,
            };
        }
        let queue = printer
            .system_name
            .clone()
            .unwrap_or_else(|| printer.name.clone());
        let mode = if printer.is_escpos() {
            SpoolMode::Raw
        } else {
            SpoolMode::Formatted
        };
        Self::Spool { queue, mode }
    }
}

/// Bytes sent to the device for a job
pub fn render_job(printer: &PrinterRecord, job: &PrintJob, width: usize) -> Result<Vec<u8>, PrintError> {
    match &job.payload {
        JobPayload::Raw { .. } => job
            .payload
            .to_bytes()
            .map_err(|e| PrintError::InvalidConfig(format!("invalid raw payload: {e}"))),
        JobPayload::Text { content } if printer.is_escpos() => Ok(render_text(
            content,
            width,
            printer.has_capability(Capability::Cut),
        )),
        JobPayload::Text { content } => Ok(content.as_bytes().to_vec()),
    }
}

/// Test page job for a printer, dispatched ahead of everything else
pub fn test_job_request(printer: &PrinterRecord, width: usize) -> PrintJobRequest {
    let page = TestPage {
        printer_name: printer.name.clone(),
        printer_id: printer.id.clone(),
        connection: printer.connection.to_string(),
        capabilities: printer.capabilities.iter().map(|c| c.to_string()).collect(),
        agent: format!("print-agent {}", env!("CARGO_PKG_VERSION")),
        timestamp: shared::util::now_rfc3339(),
    };
    let payload = if printer.is_escpos() {
        let features = PageFeatures {
            cut: printer.has_capability(Capability::Cut),
            cash_drawer: printer.has_capability(Capability::CashDrawer),
            buzzer: printer.has_capability(Capability::Buzzer),
            qr_code: printer.has_capability(Capability::QrCode),
        };
        JobPayload::raw(&page.escpos(width, features))
    } else {
        JobPayload::text(page.plain())
    };
    PrintJobRequest {
        id: None,
        job_type: JobType::Test,
        printer_id: Some(printer.id.clone()),
        printer_name: None,
        payload,
        priority: 0,
    }
}

/// Executor that talks to real hardware
pub struct HardwareExecutor {
    runner: Arc<dyn CommandRunner>,
    breakers: BreakerRegistry,
    config: DispatchConfig,
}

impl HardwareExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, breakers: BreakerRegistry, config: DispatchConfig) -> Self {
        Self {
            runner,
            breakers,
            config,
        }
    }

    async fn send_raw(&self, printer_id: &str, host: &str, port: u16, data: &[u8]) -> Result<String, PrintError> {
        let socket = NetworkPrinter::new(host, port)?.with_timeout(self.config.socket_timeout);
        let breaker = self.breakers.printer_socket(printer_id);
        breaker
            .call(|| socket.print(data))
            .await
            .map_err(|e| match e {
                BreakerError::Open { .. } => PrintError::Offline(e.to_string()),
                BreakerError::Timeout(d) => {
                    PrintError::Timeout(format!("{}:{} after {}ms", host, port, d.as_millis()))
                }
                BreakerError::Inner(inner) => inner,
            })?;
        Ok(format!("Sent {} bytes to {}:{}", data.len(), host, port))
    }

    async fn send_spool(&self, queue: &str, mode: SpoolMode, data: &[u8]) -> Result<String, PrintError> {
        let spool = SpoolPrinter::new(queue, mode, self.runner.clone())
            .with_program(self.config.print_command.clone());
        spool.print(data).await?;
        Ok(format!("Spooled {} bytes to {}", data.len(), queue))
    }
}

#[async_trait]
impl JobExecutor for HardwareExecutor {
    #[instrument(skip(self, printer, job), fields(printer_id = %printer.id, job_id = %job.id))]
    async fn execute(&self, printer: &PrinterRecord, job: &PrintJob) -> Result<String, PrintError> {
        let data = render_job(printer, job, self.config.paper_width)?;
        let path = DeliveryPath::for_printer(printer);
        debug!(?path, bytes = data.len(), "Delivering job");
        match path {
            DeliveryPath::RawSocket { host, port } => self.send_raw(&printer.id, &host, port, &data).await,
            DeliveryPath::Spool { queue, mode } => self.send_spool(&queue, mode, &data).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::BreakerConfig;
    use printer_driver::CommandOutput;
    use shared::models::{ConnectionType, DiscoveryMethod, JobSource, PrinterType};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct RecordingRunner {
        calls: parking_lot::Mutex<Vec<(String, Vec<String>, usize)>>,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(
            &self,
            program: &str,
            args: &[String],
            stdin: Option<&[u8]>,
        ) -> std::io::Result<CommandOutput> {
            self.calls
                .lock()
                .push((program.to_string(), args.to_vec(), stdin.map_or(0, |s| s.len())));
            Ok(CommandOutput {
                success: true,
                code: Some(0),
                ..Default::default()
            })
        }
    }

    fn thermal_usb() -> PrinterRecord {
        let mut p = PrinterRecord::new("TM-T88", ConnectionType::Usb, DiscoveryMethod::Usb)
            .with_usb(0x04b8, 1);
        p.printer_type = PrinterType::Thermal;
        p.capabilities.insert(Capability::Cut);
        p
    }

    fn job_for(printer: &PrinterRecord, payload: JobPayload) -> PrintJob {
        PrintJob::from_request(
            PrintJobRequest {
                id: None,
                job_type: JobType::Receipt,
                printer_id: Some(printer.id.clone()),
                printer_name: None,
                payload,
                priority: 5,
            },
            JobSource::Http,
        )
    }

    #[test]
    fn test_delivery_path_selection() {
        let net = PrinterRecord::new("Bar", ConnectionType::Network, DiscoveryMethod::Network)
            .with_network("192.168.1.50", 9100);
        assert_eq!(
            DeliveryPath::for_printer(&net),
            DeliveryPath::RawSocket {
                host: "192.168.1.50".into(),
                port: 9100
            }
        );

        let ipp = PrinterRecord::new("Office", ConnectionType::Network, DiscoveryMethod::Network)
            .with_network("192.168.1.60", 631);
        assert!(matches!(
            DeliveryPath::for_printer(&ipp),
            DeliveryPath::Spool {
                mode: SpoolMode::Formatted,
                ..
            }
        ));

        let mut usb = thermal_usb();
        usb.system_name = Some("TM_T88_Queue".into());
        assert_eq!(
            DeliveryPath::for_printer(&usb),
            DeliveryPath::Spool {
                queue: "TM_T88_Queue".into(),
                mode: SpoolMode::Raw
            }
        );
    }

    #[test]
    fn test_text_rendering_depends_on_printer_class() {
        let thermal = thermal_usb();
        let job = job_for(&thermal, JobPayload::text("hello"));
        let bytes = render_job(&thermal, &job, 48).unwrap();
        assert_eq!(&bytes[..2], &[0x1b, 0x40]);

        let office = PrinterRecord::new("Office", ConnectionType::System, DiscoveryMethod::System);
        let bytes = render_job(&office, &job, 48).unwrap();
        assert_eq!(bytes, b"hello");

        let bad = job_for(&thermal, JobPayload::Raw { data: "%%".into() });
        assert!(render_job(&thermal, &bad, 48).is_err());
    }

    #[tokio::test]
    async fn test_spool_path_uses_raw_mode_for_thermal() {
        let runner = Arc::new(RecordingRunner::default());
        let executor = HardwareExecutor::new(
            runner.clone(),
            BreakerRegistry::new(BreakerConfig::default()),
            DispatchConfig::default(),
        );
        let printer = thermal_usb();
        let note = executor
            .execute(&printer, &job_for(&printer, JobPayload::raw(b"\x1b@")))
            .await
            .unwrap();
        assert!(note.contains("TM-T88"));

        let calls = runner.calls.lock();
        assert_eq!(calls[0].0, "lp");
        assert_eq!(calls[0].1, vec!["-d", "TM-T88", "-o", "raw"]);
        assert_eq!(calls[0].2, 2);
    }

    #[tokio::test]
    async fn test_raw_socket_path_writes_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            socket.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let executor = HardwareExecutor::new(
            Arc::new(RecordingRunner::default()),
            BreakerRegistry::new(BreakerConfig::default()),
            DispatchConfig::default(),
        );
        let printer = PrinterRecord::new("Bar", ConnectionType::Network, DiscoveryMethod::Network)
            .with_network("127.0.0.1", port);
        let bytes = executor
            .send_raw(&printer.id, "127.0.0.1", port, b"\x1b@raw")
            .await
            .unwrap();
        assert!(bytes.starts_with("Sent 5 bytes"));
        assert_eq!(server.await.unwrap(), b"\x1b@raw");
    }

    #[test]
    fn test_test_page_runs_first() {
        let req = test_job_request(&thermal_usb(), 48);
        assert_eq!(req.priority, 0);
        assert_eq!(req.job_type, JobType::Test);
        assert!(req.payload.is_raw());

        let office = PrinterRecord::new("Office", ConnectionType::System, DiscoveryMethod::System);
        assert!(!test_job_request(&office, 48).payload.is_raw());
    }
}
