//! Payload normalization into the canonical event.
//!
//! Well-known fields are projected onto the event; everything else the
//! sender supplied is preserved under `metadata` so no agent field is ever
//! silently discarded.

use chrono::{DateTime, Utc};
use serde_json::Value;

use vigil_core::ids::{now_utc_ms, truncate_ms};
use vigil_core::net::normalize_ip;
use vigil_core::types::{Event, EventStatus, Severity};

/// Fields consumed by projection; all others land in `metadata`.
const PROJECTED: &[&str] = &[
    "id",
    "timestamp",
    "source",
    "source_ip",
    "dest_ip",
    "source_port",
    "dest_port",
    "event_type",
    "severity",
    "status",
    "description",
    "raw_log",
    "metadata",
    "tags",
    "enrichment",
];

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// Normalize one agent/device payload. Missing ids and timestamps are
/// stamped here; status always starts at `new`.
pub fn normalize(value: &Value) -> Result<Event, NormalizeError> {
    let obj = value.as_object().ok_or(NormalizeError::NotAnObject)?;

    let severity = obj
        .get("severity")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Severity>().ok())
        .unwrap_or(Severity::Info);

    let source = string_field(obj, "source").unwrap_or_else(|| "agent".to_string());
    let event_type = string_field(obj, "event_type").unwrap_or_default();

    let mut evt = Event::new(source, event_type, severity);
    evt.status = EventStatus::New;

    if let Some(id) = string_field(obj, "id") {
        if !id.is_empty() {
            evt.id = id;
        }
    }
    if let Some(ts) = obj
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    {
        evt.timestamp = truncate_ms(ts.with_timezone(&Utc));
    } else {
        evt.timestamp = now_utc_ms();
    }

    if let Some(ip) = string_field(obj, "source_ip") {
        evt.source_ip = normalize_ip(&ip);
    }
    if let Some(ip) = string_field(obj, "dest_ip") {
        evt.dest_ip = normalize_ip(&ip);
    }
    evt.source_port = port_field(obj, "source_port");
    evt.dest_port = port_field(obj, "dest_port");
    if let Some(desc) = string_field(obj, "description") {
        evt.description = desc;
    }
    if let Some(raw) = string_field(obj, "raw_log") {
        evt.raw_log = raw;
    }
    if let Some(tags) = obj.get("tags").and_then(Value::as_array) {
        for tag in tags.iter().filter_map(Value::as_str) {
            evt.add_tag(tag);
        }
    }

    // Sender-supplied metadata first, then any unknown top-level fields.
    if let Some(meta) = obj.get("metadata").and_then(Value::as_object) {
        for (k, v) in meta {
            evt.metadata.insert(k.clone(), v.clone());
        }
    }
    for (k, v) in obj {
        if !PROJECTED.contains(&k.as_str()) {
            evt.metadata.insert(k.clone(), v.clone());
        }
    }

    Ok(evt)
}

fn string_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn port_field(obj: &serde_json::Map<String, Value>, key: &str) -> u16 {
    obj.get(key)
        .and_then(Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fresh_id_and_timestamp_assigned() {
        let evt = normalize(&json!({"source": "firewall"})).unwrap();
        assert_eq!(evt.id.len(), 32);
        assert_eq!(evt.status, EventStatus::New);
        assert_eq!(evt.severity, Severity::Info);
    }

    #[test]
    fn test_supplied_fields_projected() {
        let evt = normalize(&json!({
            "id": "E1",
            "timestamp": "2026-03-01T10:00:00.123Z",
            "source": "agent",
            "source_ip": "::ffff:1.2.3.4",
            "dest_ip": "10.0.0.1",
            "dest_port": 443,
            "event_type": "login_failed",
            "severity": "high",
            "raw_log": "auth failure"
        }))
        .unwrap();
        assert_eq!(evt.id, "E1");
        assert_eq!(evt.source_ip, "1.2.3.4");
        assert_eq!(evt.dest_port, 443);
        assert_eq!(evt.severity, Severity::High);
        assert_eq!(evt.timestamp.to_rfc3339(), "2026-03-01T10:00:00.123+00:00");
    }

    #[test]
    fn test_unknown_fields_preserved_in_metadata() {
        let evt = normalize(&json!({
            "source": "edr",
            "process_name": "nc.exe",
            "pid": 4242,
            "metadata": {"sensor_version": "1.9"}
        }))
        .unwrap();
        assert_eq!(evt.metadata.get("process_name").unwrap(), "nc.exe");
        assert_eq!(evt.metadata.get("pid").unwrap(), 4242);
        assert_eq!(evt.metadata.get("sensor_version").unwrap(), "1.9");
    }

    #[test]
    fn test_invalid_severity_defaults_to_info() {
        let evt = normalize(&json!({"severity": "apocalyptic"})).unwrap();
        assert_eq!(evt.severity, Severity::Info);
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(normalize(&json!("just a string")).is_err());
        assert!(normalize(&json!(42)).is_err());
    }
}
