//! Orchestrator configuration.

use vigil_core::config::env_or;

#[derive(Debug, Clone)]
pub struct SoarConfig {
    /// JSON playbooks file; empty uses the built-in set.
    pub playbooks_path: String,
    /// Slack-compatible webhook for `slack_notify`; empty logs only.
    pub slack_webhook: String,
}

impl SoarConfig {
    pub fn from_env() -> SoarConfig {
        SoarConfig {
            playbooks_path: env_or("SOAR_PLAYBOOKS_PATH", ""),
            slack_webhook: env_or("SOAR_SLACK_WEBHOOK", ""),
        }
    }
}
