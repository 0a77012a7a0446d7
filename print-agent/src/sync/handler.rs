//! Inbound command execution
//!
//! Every command that can fail answers with exactly one result event
//! carrying either success with details or a structured error with
//! remediation suggestions. `printer:test` additionally sends an ack
//! before the test page is printed.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use shared::message::{
    CommandResult, DiscoveryConfigPatch, DiscoveryControlCommand, InboundEvent, OutboundEvent,
    PrintCommand, PrinterTestAck, PrinterTestRequest, RawPrintCommand, SyncEnvelope,
};
use shared::models::{JobSource, PrintJobRequest};
use shared::{AppError, ErrorCode};

use crate::core::error::{job_failure_to_app, with_remediation};
use crate::discovery::DiscoveryEngine;
use crate::printing::{Dispatcher, test_job_request};

/// Result event answering each inbound command
pub fn result_event(event: InboundEvent) -> OutboundEvent {
    match event {
        InboundEvent::PrintJob => OutboundEvent::PrintJobFailed,
        InboundEvent::PrinterTest => OutboundEvent::PrinterTestResult,
        InboundEvent::PrintPhysical => OutboundEvent::PrintPhysicalResult,
        InboundEvent::PrintRaw => OutboundEvent::PrintRawResult,
        InboundEvent::PrintQueueStatus => OutboundEvent::PrintQueueStatusResult,
        InboundEvent::DiscoveryControl => OutboundEvent::DiscoveryControlResult,
        InboundEvent::DiscoveryStatus => OutboundEvent::DiscoveryStatusResult,
        InboundEvent::DiscoveryGetCachedPrinters => OutboundEvent::DiscoveryCachedPrinters,
        InboundEvent::DiscoveryForce => OutboundEvent::DiscoveryForceResult,
        InboundEvent::DiscoveryConfigUpdate => OutboundEvent::DiscoveryConfigUpdated,
    }
}

/// `discovery:config:update` accepts the patch bare or under `config`
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum ConfigUpdate {
    Wrapped { config: DiscoveryConfigPatch },
    Bare(DiscoveryConfigPatch),
}

type Outcome = Result<(String, Option<Value>), AppError>;

#[derive(Clone)]
pub struct CommandHandler {
    dispatcher: Dispatcher,
    discovery: Arc<DiscoveryEngine>,
    /// Default completion wait for commands that answer after printing
    wait_timeout: Duration,
}

impl CommandHandler {
    pub fn new(dispatcher: Dispatcher, discovery: Arc<DiscoveryEngine>, wait_timeout: Duration) -> Self {
        Self {
            dispatcher,
            discovery,
            wait_timeout,
        }
    }

    /// Execute one inbound frame, sending replies to `reply`
    #[instrument(skip_all, fields(event = %env.event))]
    pub async fn handle(&self, env: SyncEnvelope, reply: &mpsc::Sender<SyncEnvelope>) {
        let Some(event) = env.inbound() else {
            debug!("Ignoring unknown sync event");
            return;
        };
        let request_id = env.request_id();

        let outcome = match event {
            InboundEvent::PrintJob => self.print_job(&env).await,
            InboundEvent::PrintPhysical => self.print_and_wait::<PrintCommand>(&env).await,
            InboundEvent::PrintRaw => self.print_and_wait::<RawPrintCommand>(&env).await,
            InboundEvent::PrinterTest => self.printer_test(&env, reply).await,
            InboundEvent::PrintQueueStatus => to_details(
                "Queue status",
                &self.dispatcher.queue_status(),
            ),
            InboundEvent::DiscoveryControl => self.discovery_control(&env).await,
            InboundEvent::DiscoveryStatus => to_details("Discovery status", &self.discovery.status()),
            InboundEvent::DiscoveryGetCachedPrinters => {
                let cached = self.discovery.cached();
                to_details(&format!("{} cached printers", cached.count), &cached)
            }
            InboundEvent::DiscoveryForce => {
                let report = self.discovery.find_printers().await;
                to_details(
                    &format!("Discovery found {} printers", report.summary.total),
                    &report.summary,
                )
            }
            InboundEvent::DiscoveryConfigUpdate => self.config_update(&env),
        };

        let result = match outcome {
            // Accepted print jobs are answered by the job lifecycle events
            Ok(_) if event == InboundEvent::PrintJob => return,
            Ok((message, details)) => CommandResult::ok(message, details),
            Err(err) => {
                let err = with_remediation(err);
                warn!(code = %err.code, error = %err.message, "Sync command failed");
                CommandResult::failed(&err)
            }
        }
        .with_request_id(request_id);

        send(reply, result_event(event), &result).await;
    }

    async fn print_job(&self, env: &SyncEnvelope) -> Outcome {
        let cmd: PrintCommand = parse(env)?;
        let job_id = self.dispatcher.enqueue(cmd.job, JobSource::Sync)?;
        Ok((format!("Job {job_id} queued"), None))
    }

    async fn print_and_wait<C: PrintCmd>(&self, env: &SyncEnvelope) -> Outcome {
        let cmd: C = parse(env)?;
        let timeout = cmd
            .timeout_ms()
            .map(Duration::from_millis)
            .unwrap_or(self.wait_timeout);
        let job_id = self.dispatcher.enqueue(cmd.into_request(), JobSource::Sync)?;
        self.wait(&job_id, timeout).await
    }

    async fn wait(&self, job_id: &str, timeout: Duration) -> Outcome {
        let outcome = self.dispatcher.await_completion(job_id, timeout).await?;
        if !outcome.success {
            return Err(job_failure_to_app(&outcome));
        }
        let message = outcome.message.clone();
        Ok((message, serde_json::to_value(&outcome).ok()))
    }

    async fn printer_test(&self, env: &SyncEnvelope, reply: &mpsc::Sender<SyncEnvelope>) -> Outcome {
        let req: PrinterTestRequest = parse(env)?;
        let test_id = shared::util::new_id();
        let ack = PrinterTestAck {
            printer_id: req.printer_id.clone(),
            test_id: test_id.clone(),
            message: "Printer test accepted".into(),
            request_id: req.request_id.clone(),
            timestamp: shared::util::now_millis(),
        };
        send(reply, OutboundEvent::PrinterTestAck, &ack).await;

        let key = req.printer_key().ok_or_else(|| {
            AppError::with_message(ErrorCode::RequiredField, "printerId or printerName is required")
        })?;
        let printer = self
            .discovery
            .registry()
            .find(key)
            .ok_or_else(|| AppError::printer_not_found(key))?;

        let mut job = test_job_request(&printer, self.dispatcher.config().paper_width);
        job.id = Some(test_id);
        info!(printer_id = %printer.id, "Printing test page");
        let job_id = self.dispatcher.enqueue(job, JobSource::Test)?;
        self.wait(&job_id, self.wait_timeout).await
    }

    async fn discovery_control(&self, env: &SyncEnvelope) -> Outcome {
        let cmd: DiscoveryControlCommand = parse(env)?;
        let (message, details) = self.discovery.control(cmd.action, cmd.config.as_ref()).await?;
        Ok((message, Some(details)))
    }

    fn config_update(&self, env: &SyncEnvelope) -> Outcome {
        let patch = match parse::<ConfigUpdate>(env)? {
            ConfigUpdate::Wrapped { config } | ConfigUpdate::Bare(config) => config,
        };
        let view = self.discovery.reconfigure(&patch)?;
        to_details("Discovery configuration updated", &view)
    }
}

/// Commands that enqueue a job and answer once it finishes
trait PrintCmd: DeserializeOwned {
    fn timeout_ms(&self) -> Option<u64>;
    fn into_request(self) -> PrintJobRequest;
}

impl PrintCmd for PrintCommand {
    fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    fn into_request(self) -> PrintJobRequest {
        self.job
    }
}

impl PrintCmd for RawPrintCommand {
    fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    fn into_request(self) -> PrintJobRequest {
        self.to_request()
    }
}

fn parse<T: DeserializeOwned>(env: &SyncEnvelope) -> Result<T, AppError> {
    env.parse_data().map_err(|e| {
        AppError::with_message(ErrorCode::InvalidPayload, format!("Invalid {} payload: {e}", env.event))
    })
}

fn to_details<T: serde::Serialize>(message: &str, value: &T) -> Outcome {
    let details = serde_json::to_value(value)
        .map_err(|e| AppError::internal(format!("Failed to encode result: {e}")))?;
    Ok((message.to_string(), Some(details)))
}

async fn send<T: serde::Serialize>(reply: &mpsc::Sender<SyncEnvelope>, event: OutboundEvent, data: &T) {
    match SyncEnvelope::outbound(event, data) {
        Ok(env) => {
            if reply.send(env).await.is_err() {
                debug!(event = %event, "Sync outbound queue closed, reply dropped");
            }
        }
        Err(e) => warn!(event = %event, error = %e, "Failed to encode sync reply"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoveryConfig, PrinterRegistry};
    use crate::printing::{DispatchConfig, JobExecutor};
    use async_trait::async_trait;
    use printer_driver::PrintError;
    use serde_json::json;
    use shared::models::{ConnectionType, DiscoveryMethod, PrintJob, PrinterRecord, PrinterType};

    struct OkExecutor;

    #[async_trait]
    impl JobExecutor for OkExecutor {
        async fn execute(&self, _printer: &PrinterRecord, _job: &PrintJob) -> Result<String, PrintError> {
            Ok("sent".into())
        }
    }

    fn handler() -> CommandHandler {
        let registry = PrinterRegistry::new();
        let mut printer = PrinterRecord::new("Kitchen", ConnectionType::System, DiscoveryMethod::System);
        printer.printer_type = PrinterType::Kitchen;
        registry.replace(vec![printer]);

        let dispatcher = Dispatcher::new(DispatchConfig::default(), registry.clone(), Arc::new(OkExecutor));
        let engine = Arc::new(DiscoveryEngine::new(DiscoveryConfig::default(), registry));
        CommandHandler::new(dispatcher, engine, Duration::from_secs(2))
    }

    async fn run(handler: &CommandHandler, event: &str, data: Value) -> Vec<SyncEnvelope> {
        let (tx, mut rx) = mpsc::channel(16);
        handler.handle(SyncEnvelope::named(event, data), &tx).await;
        drop(tx);
        let mut out = Vec::new();
        while let Some(env) = rx.recv().await {
            out.push(env);
        }
        out
    }

    #[tokio::test]
    async fn test_printer_test_acks_before_result() {
        let h = handler();
        let out = run(&h, "printer:test", json!({"printerName": "kitchen", "requestId": "r-1"})).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].event, "printer:test:ack");
        assert_eq!(out[1].event, "printer:test:result");
        assert_eq!(out[1].data["success"], true);
        assert_eq!(out[1].data["requestId"], "r-1");
    }

    #[tokio::test]
    async fn test_unknown_printer_gets_structured_error() {
        let h = handler();
        let out = run(&h, "printer:test", json!({"printerId": "nope"})).await;
        let result = &out[1].data;
        assert_eq!(result["success"], false);
        assert_eq!(result["error"]["code"], ErrorCode::PrinterNotFound.code());
        assert!(!result["error"]["suggestions"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_print_physical_waits_for_completion() {
        let h = handler();
        let out = run(
            &h,
            "print:physical",
            json!({"printerName": "Kitchen", "payload": {"format": "text", "content": "1x soup"}}),
        )
        .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event, "print:physical:result");
        assert_eq!(out[0].data["success"], true);
        assert_eq!(out[0].data["details"]["success"], true);
    }

    #[tokio::test]
    async fn test_rejected_print_job_is_reported() {
        let h = handler();
        let out = run(&h, "print:job", json!({"payload": {"format": "text", "content": "x"}})).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event, "print:job:failed");
        assert_eq!(out[0].data["error"]["code"], ErrorCode::RequiredField.code());
    }

    #[tokio::test]
    async fn test_accepted_print_job_has_no_immediate_reply() {
        let h = handler();
        let out = run(
            &h,
            "print:job",
            json!({"printerName": "Kitchen", "payload": {"format": "text", "content": "x"}}),
        )
        .await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_invalid_payload() {
        let h = handler();
        let out = run(&h, "print:raw", json!({"printerId": 5})).await;
        assert_eq!(out[0].event, "print:raw:result");
        assert_eq!(out[0].data["error"]["code"], ErrorCode::InvalidPayload.code());
    }

    #[tokio::test]
    async fn test_config_update_accepts_wrapped_and_bare() {
        let h = handler();
        let out = run(&h, "discovery:config:update", json!({"config": {"intervalSecs": 60}})).await;
        assert_eq!(out[0].event, "discovery:config:updated");
        assert_eq!(out[0].data["details"]["intervalSecs"], 60);

        let out = run(&h, "discovery:config:update", json!({"enableNetwork": true})).await;
        assert_eq!(out[0].data["details"]["enableNetwork"], true);
    }

    #[tokio::test]
    async fn test_queue_status_and_discovery_status_answer() {
        let h = handler();
        let out = run(&h, "print:queue:status", json!({})).await;
        assert_eq!(out[0].event, "print:queue:status:result");
        assert_eq!(out[0].data["success"], true);

        let out = run(&h, "discovery:status", Value::Null).await;
        assert_eq!(out[0].event, "discovery:status:result");
        assert_eq!(out[0].data["details"]["enabled"], true);
    }

    #[tokio::test]
    async fn test_unknown_event_is_ignored() {
        let h = handler();
        assert!(run(&h, "printer:explode", json!({})).await.is_empty());
    }
}
