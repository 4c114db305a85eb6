//! Playbook loading.

use serde_json::Value;
use tracing::{info, warn};

use vigil_core::types::{FieldMap, Playbook, PlaybookStep};

/// Baseline playbook: contain critical alerts.
pub fn default_playbooks() -> Vec<Playbook> {
    let mut notify_params = FieldMap::new();
    notify_params.insert(
        "message".into(),
        Value::from("Critical alert detected, initiating block"),
    );
    vec![Playbook {
        id: "pb-001".into(),
        name: "Auto-contain critical alerts".into(),
        trigger: "critical".into(),
        steps: vec![
            PlaybookStep { action: "slack_notify".into(), params: notify_params },
            PlaybookStep { action: "block_ip".into(), params: FieldMap::new() },
        ],
        enabled: true,
    }]
}

/// Load playbooks from a JSON file, or the defaults when unset.
pub fn load(path: &str) -> Vec<Playbook> {
    if path.is_empty() {
        info!("no playbooks file configured, using built-in playbooks");
        return default_playbooks();
    }
    match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice::<Vec<Playbook>>(&bytes) {
            Ok(playbooks) => {
                info!(path, count = playbooks.len(), "playbooks loaded");
                playbooks
            }
            Err(err) => {
                warn!(path, error = %err, "playbooks file unparseable, using built-in playbooks");
                default_playbooks()
            }
        },
        Err(err) => {
            warn!(path, error = %err, "playbooks file unreadable, using built-in playbooks");
            default_playbooks()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_playbook_shape() {
        let playbooks = default_playbooks();
        assert_eq!(playbooks.len(), 1);
        assert_eq!(playbooks[0].trigger, "critical");
        assert_eq!(playbooks[0].steps.len(), 2);
        assert_eq!(playbooks[0].steps[1].action, "block_ip");
    }

    #[test]
    fn test_playbooks_round_trip() {
        let json = serde_json::to_string(&default_playbooks()).unwrap();
        let back: Vec<Playbook> = serde_json::from_str(&json).unwrap();
        assert_eq!(back[0].id, "pb-001");
        assert!(back[0].enabled);
    }

    #[test]
    fn test_missing_file_falls_back() {
        assert_eq!(load("/nonexistent/playbooks.json").len(), 1);
    }
}
