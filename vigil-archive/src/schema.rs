//! ClickHouse row types and table DDL.

use clickhouse::Row;
use serde::Serialize;
use serde_json::Value;

use vigil_core::types::Event;

/// `events` table: partitioned by day, ordered for time/source scans,
/// dropped after the retention TTL.
pub const EVENTS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id String,
    timestamp DateTime64(3),
    source String,
    source_ip String,
    dest_ip String,
    event_type String,
    severity String,
    description String,
    raw_log String,
    metadata String
) ENGINE = MergeTree()
PARTITION BY toYYYYMMDD(timestamp)
ORDER BY (timestamp, source_ip, event_type)
TTL toDateTime(timestamp) + INTERVAL 90 DAY
SETTINGS index_granularity = 8192
"#;

/// `network_flows` table for sensor flow observations.
pub const NETWORK_FLOWS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS network_flows (
    id String,
    timestamp DateTime64(3),
    source_ip String,
    source_port UInt16,
    dest_ip String,
    dest_port UInt16,
    protocol String,
    l7_protocol String,
    bytes_sent UInt64,
    bytes_received UInt64,
    packets_sent UInt32,
    packets_received UInt32,
    duration UInt32,
    flags String,
    suspicious UInt8
) ENGINE = MergeTree()
PARTITION BY toYYYYMMDD(timestamp)
ORDER BY (timestamp, source_ip, dest_ip)
TTL toDateTime(timestamp) + INTERVAL 90 DAY
SETTINGS index_granularity = 8192
"#;

/// One archived event. Field order and names mirror the table columns;
/// `timestamp` is DateTime64(3) as epoch milliseconds on the wire.
#[derive(Debug, Clone, Row, Serialize)]
pub struct EventRow {
    pub id: String,
    pub timestamp: i64,
    pub source: String,
    pub source_ip: String,
    pub dest_ip: String,
    pub event_type: String,
    pub severity: String,
    pub description: String,
    pub raw_log: String,
    pub metadata: String,
}

impl EventRow {
    pub fn from_event(evt: &Event) -> EventRow {
        // Metadata, tags, and enrichment are folded into one JSON column.
        let mut meta = evt.metadata.clone();
        if !evt.tags.is_empty() {
            meta.insert("tags".into(), Value::from(evt.tags.clone()));
        }
        if !evt.enrichment.is_empty() {
            meta.insert("enrichment".into(), Value::Object(evt.enrichment.clone()));
        }
        EventRow {
            id: evt.id.clone(),
            timestamp: evt.timestamp.timestamp_millis(),
            source: evt.source.clone(),
            source_ip: evt.source_ip.clone(),
            dest_ip: evt.dest_ip.clone(),
            event_type: evt.event_type.clone(),
            severity: evt.severity.as_str().to_string(),
            description: evt.description.clone(),
            raw_log: evt.raw_log.clone(),
            metadata: serde_json::to_string(&meta).unwrap_or_default(),
        }
    }
}

/// One flow record, derived from sensor flow events.
#[derive(Debug, Clone, Row, Serialize)]
pub struct NetworkFlowRow {
    pub id: String,
    pub timestamp: i64,
    pub source_ip: String,
    pub source_port: u16,
    pub dest_ip: String,
    pub dest_port: u16,
    pub protocol: String,
    pub l7_protocol: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u32,
    pub packets_received: u32,
    pub duration: u32,
    pub flags: String,
    pub suspicious: u8,
}

impl NetworkFlowRow {
    /// Sensor flow events carry the flow tuple on the event and transport
    /// details in metadata. Non-flow events yield nothing.
    pub fn from_event(evt: &Event) -> Option<NetworkFlowRow> {
        if evt.event_type != "network.flow" {
            return None;
        }
        let meta_str = |key: &str| {
            evt.metadata.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
        };
        let bytes = evt
            .metadata
            .get("payload_size")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        Some(NetworkFlowRow {
            id: evt.id.clone(),
            timestamp: evt.timestamp.timestamp_millis(),
            source_ip: evt.source_ip.clone(),
            source_port: evt.source_port,
            dest_ip: evt.dest_ip.clone(),
            dest_port: evt.dest_port,
            protocol: meta_str("transport"),
            l7_protocol: meta_str("l7_protocol"),
            bytes_sent: bytes,
            bytes_received: 0,
            packets_sent: 1,
            packets_received: 0,
            duration: 0,
            flags: meta_str("tcp_flags"),
            suspicious: u8::from(evt.tags.iter().any(|t| t == "threat")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::types::Severity;

    #[test]
    fn test_event_row_carries_all_columns() {
        let mut evt = Event::new("agent", "login_failed", Severity::High);
        evt.source_ip = "1.2.3.4".into();
        evt.raw_log = "raw".into();
        evt.add_tag("edge");
        evt.enrich("src_geo_iso", "DE");

        let row = EventRow::from_event(&evt);
        assert_eq!(row.id, evt.id);
        assert_eq!(row.severity, "high");
        assert_eq!(row.timestamp, evt.timestamp.timestamp_millis());
        let meta: Value = serde_json::from_str(&row.metadata).unwrap();
        assert_eq!(meta["tags"][0], "edge");
        assert_eq!(meta["enrichment"]["src_geo_iso"], "DE");
    }

    #[test]
    fn test_flow_row_only_from_flow_events() {
        let mut evt = Event::new("sensor", "network.flow", Severity::Info);
        evt.source_ip = "10.0.0.1".into();
        evt.dest_ip = "10.0.0.2".into();
        evt.dest_port = 443;
        evt.metadata.insert("transport".into(), Value::from("TCP"));
        evt.metadata.insert("tcp_flags".into(), Value::from("SA"));
        evt.metadata.insert("payload_size".into(), Value::from(512u64));

        let row = NetworkFlowRow::from_event(&evt).unwrap();
        assert_eq!(row.protocol, "TCP");
        assert_eq!(row.flags, "SA");
        assert_eq!(row.bytes_sent, 512);
        assert_eq!(row.suspicious, 0);

        let other = Event::new("agent", "login_failed", Severity::Info);
        assert!(NetworkFlowRow::from_event(&other).is_none());
    }

    #[test]
    fn test_ddl_shape() {
        assert!(EVENTS_DDL.contains("PARTITION BY toYYYYMMDD(timestamp)"));
        assert!(EVENTS_DDL.contains("ORDER BY (timestamp, source_ip, event_type)"));
        assert!(EVENTS_DDL.contains("INTERVAL 90 DAY"));
        assert!(NETWORK_FLOWS_DDL.contains("suspicious UInt8"));
    }
}
