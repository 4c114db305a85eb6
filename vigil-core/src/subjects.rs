//! Bus subject hierarchy and stream/consumer names.
//!
//! Subjects are dot-separated with `>` as the trailing wildcard. The first
//! token is the root; severity and source tokens are sanitized so a
//! free-string source can never splice extra levels into the hierarchy.

use crate::types::Severity;

// ── Wildcards ────────────────────────────────────────────────────────────────

/// Raw events from agents/ingest/sensor: `events.raw.<severity>.<source>`.
pub const EVENTS_RAW: &str = "events.raw.>";
/// Post-enrichment stream: `events.enriched.<severity>.<source>`.
pub const EVENTS_ENRICHED: &str = "events.enriched.>";
/// Correlator output: `alerts.<severity>.<rule_id>`.
pub const ALERTS: &str = "alerts.>";
/// Orchestrator → agent dispatch: `commands.<agent_id>`.
pub const COMMANDS: &str = "commands.>";

// ── Streams ──────────────────────────────────────────────────────────────────

pub const STREAM_EVENTS: &str = "VIGIL_EVENTS";
pub const STREAM_ALERTS: &str = "VIGIL_ALERTS";

// ── Durable consumer groups ──────────────────────────────────────────────────

pub const CONSUMER_ENRICHMENT: &str = "VIGIL_ENRICHMENT_PROCESSOR";
pub const CONSUMER_CORRELATION: &str = "VIGIL_CORRELATION_ENGINE";
pub const CONSUMER_ARCHIVAL: &str = "VIGIL_ARCHIVAL_WORKER";
pub const CONSUMER_SOAR: &str = "VIGIL_SOAR_EXECUTOR";

// ── Builders ─────────────────────────────────────────────────────────────────

pub fn raw_event(severity: Severity, source: &str) -> String {
    format!("events.raw.{}.{}", severity, token(source))
}

pub fn enriched_event(severity: Severity, source: &str) -> String {
    format!("events.enriched.{}.{}", severity, token(source))
}

pub fn alert(severity: Severity, rule_id: &str) -> String {
    format!("alerts.{}.{}", severity, token(rule_id))
}

pub fn agent_commands(agent_id: &str) -> String {
    format!("commands.{}", token(agent_id))
}

/// Replace characters that carry subject syntax (`.`, `*`, `>`, spaces) so
/// one token stays one token.
fn token(raw: &str) -> String {
    if raw.is_empty() {
        return "unknown".to_string();
    }
    raw.chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' | '\t' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_shapes() {
        assert_eq!(raw_event(Severity::Info, "agent"), "events.raw.info.agent");
        assert_eq!(
            enriched_event(Severity::Critical, "firewall"),
            "events.enriched.critical.firewall"
        );
        assert_eq!(alert(Severity::Critical, "R1"), "alerts.critical.R1");
        assert_eq!(agent_commands("fw-01"), "commands.fw-01");
    }

    #[test]
    fn test_tokens_cannot_splice_levels() {
        assert_eq!(raw_event(Severity::Low, "sys log.d"), "events.raw.low.sys_log_d");
        assert_eq!(agent_commands(""), "commands.unknown");
        assert_eq!(alert(Severity::High, "a>b"), "alerts.high.a_b");
    }
}
