//! Rule loading and reload.
//!
//! Rules come from a JSON file (`CORRELATION_RULES_PATH`); without one the
//! engine runs the built-in baseline set. A periodic mtime check reloads
//! the file and swaps the compiled set — changes never mutate rules in
//! place.

use std::path::Path;
use std::time::SystemTime;

use tracing::{info, warn};

use vigil_core::types::{Rule, Severity};

/// Baseline rules used when no rules file is configured.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            id: "critical-event".into(),
            name: "Critical severity event".into(),
            condition: r#"Event.severity == "critical""#.into(),
            severity: Severity::Critical,
            enabled: true,
            actions: vec![],
            window_secs: None,
            threshold: None,
        },
        Rule {
            id: "malicious-source".into(),
            name: "Known malicious source address".into(),
            condition: r#""malicious_ip" in Event.tags"#.into(),
            severity: Severity::Critical,
            enabled: true,
            actions: vec![],
            window_secs: None,
            threshold: None,
        },
        Rule {
            id: "port-scan-burst".into(),
            name: "Repeated port scans".into(),
            condition: r#"Event.event_type == "port_scan""#.into(),
            severity: Severity::High,
            enabled: true,
            actions: vec![],
            window_secs: Some(300),
            threshold: Some(3),
        },
        Rule {
            id: "auth-brute-force".into(),
            name: "Authentication failures in a short window".into(),
            condition: r#"Event.event_type == "login_failed""#.into(),
            severity: Severity::High,
            enabled: true,
            actions: vec![],
            window_secs: Some(60),
            threshold: Some(10),
        },
    ]
}

/// Load rules from `path`, or the defaults when it is empty.
pub fn load(path: &str) -> Vec<Rule> {
    if path.is_empty() {
        info!("no rules file configured, using built-in rules");
        return default_rules();
    }
    match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice::<Vec<Rule>>(&bytes) {
            Ok(rules) => {
                info!(path, count = rules.len(), "rules loaded");
                rules
            }
            Err(err) => {
                warn!(path, error = %err, "rules file unparseable, using built-in rules");
                default_rules()
            }
        },
        Err(err) => {
            warn!(path, error = %err, "rules file unreadable, using built-in rules");
            default_rules()
        }
    }
}

/// File mtime used by the reload loop to notice edits.
pub fn modified_at(path: &str) -> Option<SystemTime> {
    if path.is_empty() {
        return None;
    }
    std::fs::metadata(Path::new(path)).and_then(|m| m.modified()).ok()
}
