//! Sync channel wire format
//!
//! Every frame exchanged with the backend is a JSON text message
//! `{"event": "<name>", "data": {...}}`. Event names form a fixed vocabulary:
//! [`OutboundEvent`] for frames the agent sends, [`InboundEvent`] for
//! commands it accepts.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub mod payload;
pub use payload::*;

/// One sync channel frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl SyncEnvelope {
    /// Build an outbound frame
    pub fn outbound<T: Serialize>(event: OutboundEvent, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: event.name().to_string(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Build a frame with an arbitrary event name (tests, inbound fakes)
    pub fn named(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Parse `data` into a typed payload
    pub fn parse_data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    /// Inbound command this frame carries, if any
    pub fn inbound(&self) -> Option<InboundEvent> {
        InboundEvent::from_name(&self.event)
    }

    /// `requestId` echoed back in results, when the caller sent one
    pub fn request_id(&self) -> Option<String> {
        self.data
            .get("requestId")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Events the agent emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboundEvent {
    /// Join the branch-scoped room
    Join,
    AgentOnline,
    PrinterDiscovered,
    PrinterSyncSuccess,
    PrinterSyncError,
    PrinterSyncBatchCompleted,
    PrintJobStarted,
    PrintJobCompleted,
    PrintJobFailed,
    PrintPhysicalResult,
    PrintRawResult,
    PrintQueueStatusResult,
    PrinterTestAck,
    PrinterTestResult,
    DiscoveryControlResult,
    DiscoveryStatusResult,
    DiscoveryCachedPrinters,
    DiscoveryForceResult,
    DiscoveryConfigUpdated,
    DiscoveryCompleted,
}

impl OutboundEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::AgentOnline => "agent:online",
            Self::PrinterDiscovered => "printer:discovered",
            Self::PrinterSyncSuccess => "printer:sync:success",
            Self::PrinterSyncError => "printer:sync:error",
            Self::PrinterSyncBatchCompleted => "printer:sync:batch-completed",
            Self::PrintJobStarted => "print:job:started",
            Self::PrintJobCompleted => "print:job:completed",
            Self::PrintJobFailed => "print:job:failed",
            Self::PrintPhysicalResult => "print:physical:result",
            Self::PrintRawResult => "print:raw:result",
            Self::PrintQueueStatusResult => "print:queue:status:result",
            Self::PrinterTestAck => "printer:test:ack",
            Self::PrinterTestResult => "printer:test:result",
            Self::DiscoveryControlResult => "discovery:control:result",
            Self::DiscoveryStatusResult => "discovery:status:result",
            Self::DiscoveryCachedPrinters => "discovery:cached-printers",
            Self::DiscoveryForceResult => "discovery:force:result",
            Self::DiscoveryConfigUpdated => "discovery:config:updated",
            Self::DiscoveryCompleted => "discovery:completed",
        }
    }
}

impl fmt::Display for OutboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Commands the backend sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundEvent {
    PrintJob,
    PrinterTest,
    PrintPhysical,
    PrintRaw,
    PrintQueueStatus,
    DiscoveryControl,
    DiscoveryStatus,
    DiscoveryGetCachedPrinters,
    DiscoveryForce,
    DiscoveryConfigUpdate,
}

impl InboundEvent {
    pub const ALL: [InboundEvent; 10] = [
        Self::PrintJob,
        Self::PrinterTest,
        Self::PrintPhysical,
        Self::PrintRaw,
        Self::PrintQueueStatus,
        Self::DiscoveryControl,
        Self::DiscoveryStatus,
        Self::DiscoveryGetCachedPrinters,
        Self::DiscoveryForce,
        Self::DiscoveryConfigUpdate,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            Self::PrintJob => "print:job",
            Self::PrinterTest => "printer:test",
            Self::PrintPhysical => "print:physical",
            Self::PrintRaw => "print:raw",
            Self::PrintQueueStatus => "print:queue:status",
            Self::DiscoveryControl => "discovery:control",
            Self::DiscoveryStatus => "discovery:status",
            Self::DiscoveryGetCachedPrinters => "discovery:get-cached-printers",
            Self::DiscoveryForce => "discovery:force",
            Self::DiscoveryConfigUpdate => "discovery:config:update",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }
}

impl fmt::Display for InboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trips_through_text() {
        let env = SyncEnvelope::named("print:job", json!({"requestId": "r-1", "printerId": "p"}));
        let text = env.to_text().unwrap();
        let back = SyncEnvelope::from_text(&text).unwrap();
        assert_eq!(back, env);
        assert_eq!(back.inbound(), Some(InboundEvent::PrintJob));
        assert_eq!(back.request_id().as_deref(), Some("r-1"));
    }

    #[test]
    fn missing_data_defaults_to_null() {
        let env = SyncEnvelope::from_text(r#"{"event":"discovery:status"}"#).unwrap();
        assert_eq!(env.data, Value::Null);
        assert_eq!(env.inbound(), Some(InboundEvent::DiscoveryStatus));
    }

    #[test]
    fn inbound_names_are_unique_and_resolvable() {
        for ev in InboundEvent::ALL {
            assert_eq!(InboundEvent::from_name(ev.name()), Some(ev));
        }
        assert_eq!(InboundEvent::from_name("printer:discovered"), None);
    }

    #[test]
    fn outbound_envelope_uses_event_name() {
        let env = SyncEnvelope::outbound(OutboundEvent::PrinterTestAck, &json!({"ok": true})).unwrap();
        assert_eq!(env.event, "printer:test:ack");
        assert_eq!(env.data["ok"], true);
    }
}
