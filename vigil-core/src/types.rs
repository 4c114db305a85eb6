//! Canonical record types shared by every pipeline stage.
//!
//! The wire format is JSON; free-form fields (`metadata`, `enrichment`) are
//! kept as tagged JSON values so heterogeneous agent payloads survive
//! normalization without a schema migration.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::CoreError;
use crate::ids::{generate_id, now_utc_ms};

/// Free-form key/value attachment used for `metadata` and `enrichment`.
pub type FieldMap = serde_json::Map<String, Value>;

// ── Severity ─────────────────────────────────────────────────────────────────

/// Event/alert severity. The derived `Ord` gives the pipeline ordering
/// `info < low < medium < high < critical` used by the escalation contract.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Map a 0..=100 confidence score onto a severity band.
    pub fn from_score(score: u8) -> Severity {
        match score {
            90..=u8::MAX => Severity::Critical,
            70..=89 => Severity::High,
            50..=69 => Severity::Medium,
            30..=49 => Severity::Low,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(CoreError::UnknownSeverity(other.to_string())),
        }
    }
}

// ── Statuses ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    New,
    Processing,
    Enriched,
    Archived,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[default]
    New,
    Investigating,
    Closed,
}

// ── Event ────────────────────────────────────────────────────────────────────

/// The canonical security event. Created by ingest or the network sensor,
/// mutated only by enrichment (which may append to `enrichment` and raise —
/// never lower — `severity`), then consumed by correlation and archival.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dest_ip: String,
    #[serde(default, skip_serializing_if = "is_zero_port")]
    pub source_port: u16,
    #[serde(default, skip_serializing_if = "is_zero_port")]
    pub dest_port: u16,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_log: String,
    #[serde(default)]
    pub metadata: FieldMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "FieldMap::is_empty")]
    pub enrichment: FieldMap,
}

fn is_zero_port(p: &u16) -> bool {
    *p == 0
}

impl Event {
    /// New event with a fresh id, millisecond UTC stamp, and `new` status.
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, severity: Severity) -> Event {
        Event {
            id: generate_id(),
            timestamp: now_utc_ms(),
            source: source.into(),
            source_ip: String::new(),
            dest_ip: String::new(),
            source_port: 0,
            dest_port: 0,
            event_type: event_type.into(),
            severity,
            status: EventStatus::New,
            description: String::new(),
            raw_log: String::new(),
            metadata: FieldMap::new(),
            tags: Vec::new(),
            enrichment: FieldMap::new(),
        }
    }

    /// Raise severity; the escalation contract is monotone so a lower target
    /// is a no-op.
    pub fn escalate(&mut self, to: Severity) {
        self.severity = self.severity.max(to);
    }

    /// Append a tag unless it is already present.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.iter().any(|t| t == &tag) {
            self.tags.push(tag);
        }
    }

    /// Record an enrichment key/value.
    pub fn enrich(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.enrichment.insert(key.into(), value.into());
    }
}

// ── Alert ────────────────────────────────────────────────────────────────────

/// Correlation engine output. `event_ids` is non-empty by construction and
/// `severity` equals the triggering rule's severity at creation time.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub rule_id: String,
    pub title: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub event_ids: Vec<String>,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "FieldMap::is_empty")]
    pub metadata: FieldMap,
}

impl Alert {
    pub fn for_rule(rule: &Rule, event_id: impl Into<String>) -> Alert {
        let now = now_utc_ms();
        Alert {
            id: generate_id(),
            timestamp: now,
            rule_id: rule.id.clone(),
            title: rule.name.clone(),
            severity: rule.severity,
            description: String::new(),
            event_ids: vec![event_id.into()],
            status: AlertStatus::New,
            created_at: now,
            metadata: FieldMap::new(),
        }
    }
}

// ── Rule ─────────────────────────────────────────────────────────────────────

/// A correlation rule. `condition` is compiled once at load; rules with a
/// `window_secs`/`threshold` pair only alert when the sliding-window counter
/// crosses the threshold.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub condition: String,
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u64>,
}

fn default_true() -> bool {
    true
}

// ── Playbook ─────────────────────────────────────────────────────────────────

/// One automated response step: a registered action name plus parameters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PlaybookStep {
    pub action: String,
    #[serde(default)]
    pub params: FieldMap,
}

/// An ordered response sequence fired by a trigger predicate
/// (`"critical"` for severity equality, `"rule_id=<id>"` for rule match).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Playbook {
    pub id: String,
    pub name: String,
    pub trigger: String,
    pub steps: Vec<PlaybookStep>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// ── HostInfo ─────────────────────────────────────────────────────────────────

/// Agent heartbeat payload published to `events.raw.info.agent`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HostInfo {
    pub agent_id: String,
    pub hostname: String,
    pub os: String,
    pub kernel_version: String,
    pub uptime_secs: u64,
    pub load_avg_one: f64,
    pub total_memory_kb: u64,
    pub used_memory_kb: u64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_severity_round_trip() {
        for s in ["info", "low", "medium", "high", "critical"] {
            let sev: Severity = s.parse().unwrap();
            assert_eq!(sev.as_str(), s);
        }
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn test_escalate_is_monotone() {
        let mut evt = Event::new("agent", "login", Severity::High);
        evt.escalate(Severity::Low);
        assert_eq!(evt.severity, Severity::High);
        evt.escalate(Severity::Critical);
        assert_eq!(evt.severity, Severity::Critical);
    }

    #[test]
    fn test_tags_deduplicate() {
        let mut evt = Event::new("agent", "login", Severity::Info);
        evt.add_tag("malicious_ip");
        evt.add_tag("malicious_ip");
        assert_eq!(evt.tags.len(), 1);
    }

    #[test]
    fn test_event_json_round_trip() {
        let mut evt = Event::new("firewall", "conn.denied", Severity::Medium);
        evt.source_ip = "10.1.2.3".into();
        evt.dest_ip = "192.168.0.1".into();
        evt.source_port = 51234;
        evt.dest_port = 443;
        evt.description = "denied outbound".into();
        evt.raw_log = "raw line".into();
        evt.metadata.insert("zone".into(), "dmz".into());
        evt.add_tag("edge");
        evt.enrich("src_geo_iso", "DE");

        let bytes = serde_json::to_vec(&evt).unwrap();
        let back: Event = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(back.id, evt.id);
        assert_eq!(back.timestamp, evt.timestamp);
        assert_eq!(back.source_ip, "10.1.2.3");
        assert_eq!(back.source_port, 51234);
        assert_eq!(back.severity, Severity::Medium);
        assert_eq!(back.metadata.get("zone").unwrap(), "dmz");
        assert_eq!(back.tags, vec!["edge".to_string()]);
        assert_eq!(back.enrichment.get("src_geo_iso").unwrap(), "DE");
    }

    #[test]
    fn test_event_deserializes_sparse_payload() {
        // Agents often send only a subset of fields.
        let evt: Event = serde_json::from_str(
            r#"{"id":"abc","timestamp":"2026-01-02T03:04:05.678Z","severity":"low"}"#,
        )
        .unwrap();
        assert_eq!(evt.id, "abc");
        assert_eq!(evt.severity, Severity::Low);
        assert_eq!(evt.status, EventStatus::New);
        assert!(evt.source_ip.is_empty());
    }

    #[test]
    fn test_alert_for_rule_inherits_severity() {
        let rule = Rule {
            id: "R1".into(),
            name: "Critical events".into(),
            condition: "Event.severity == \"critical\"".into(),
            severity: Severity::Critical,
            enabled: true,
            actions: vec![],
            window_secs: None,
            threshold: None,
        };
        let alert = Alert::for_rule(&rule, "E1");
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.event_ids, vec!["E1".to_string()]);
        assert_eq!(alert.status, AlertStatus::New);
        assert!(!alert.id.is_empty());
    }
}
