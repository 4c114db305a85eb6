//! Sensor-internal network event and its projection onto the canonical
//! bus event.

use chrono::{DateTime, Utc};
use serde_json::Value;

use vigil_core::types::{Event, FieldMap, Severity};

/// Where in the stack the observation was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkEventKind {
    /// Layer-3/4 flow observation.
    Flow,
    /// Decoded application-layer observation (HTTP/DNS/TLS/SMB).
    Application,
}

/// One decoded observation from the wire. Stays inside the sensor; the
/// bus sees the canonical [`Event`] projection.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NetworkEvent {
    pub timestamp: DateTime<Utc>,
    pub interface: String,
    pub kind: NetworkEventKind,
    /// Highest decoded protocol: "TCP", "UDP", "HTTP", "DNS", "TLS", "SMB".
    pub protocol: String,
    pub severity: Severity,
    pub source_ip: String,
    pub dest_ip: String,
    pub source_port: u16,
    pub dest_port: u16,
    pub transport: String,
    /// Union of observed single-letter flag codes, e.g. "SA".
    pub tcp_flags: String,
    pub sequence: u32,
    pub acknowledgment: u32,
    pub window_size: u16,
    pub payload_size: usize,
    /// Decoded application fields (SNI, HTTP host+method, DNS query, …).
    pub application: FieldMap,
    /// Truncated payload excerpt for analyst context.
    pub payload_preview: String,
}

/// Cap for `payload_preview`.
pub const PREVIEW_LIMIT: usize = 256;

/// Render a bounded, lossy preview of payload bytes.
pub fn preview(payload: &[u8]) -> String {
    let slice = &payload[..payload.len().min(PREVIEW_LIMIT)];
    let mut out = String::from_utf8_lossy(slice).into_owned();
    if payload.len() > PREVIEW_LIMIT {
        out.push_str("...");
    }
    out
}

impl NetworkEvent {
    /// Project onto the canonical event for `events.raw.<sev>.sensor`.
    pub fn into_event(self) -> Event {
        let event_type = match self.kind {
            NetworkEventKind::Flow => "network.flow".to_string(),
            NetworkEventKind::Application => format!("network.{}", self.protocol.to_lowercase()),
        };
        let mut evt = Event::new("sensor", event_type, self.severity);
        evt.timestamp = self.timestamp;
        evt.source_ip = self.source_ip;
        evt.dest_ip = self.dest_ip;
        evt.source_port = self.source_port;
        evt.dest_port = self.dest_port;
        evt.description = format!(
            "{} {} -> {}",
            self.protocol, evt.source_ip, evt.dest_ip
        );

        evt.metadata.insert("interface".into(), Value::from(self.interface));
        evt.metadata.insert("transport".into(), Value::from(self.transport));
        evt.metadata.insert("payload_size".into(), Value::from(self.payload_size as u64));
        if !self.tcp_flags.is_empty() {
            evt.metadata.insert("tcp_flags".into(), Value::from(self.tcp_flags));
        }
        if !self.application.is_empty() {
            evt.metadata.insert("application".into(), Value::Object(self.application));
        }
        if !self.payload_preview.is_empty() {
            evt.metadata.insert("payload_preview".into(), Value::from(self.payload_preview));
        }
        evt
    }
}
