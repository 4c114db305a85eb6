//! Agent configuration: identity, server endpoint, certificate triplet,
//! and collection intervals.

use std::time::Duration;

use vigil_core::config::{env_flag, env_or, env_parse};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    pub server_url: String,
    pub heartbeat_interval: Duration,
    /// Paths watched by the file-integrity collector.
    pub fim_paths: Vec<String>,
    /// Unix datagram socket the syslog collector binds (Linux).
    pub syslog_socket: String,
    /// When set, firewall_block commands install a real drop rule.
    pub enforce_firewall: bool,
}

impl AgentConfig {
    pub fn from_env() -> AgentConfig {
        let agent_id = {
            let configured = env_or("AGENT_ID", "");
            if configured.is_empty() {
                sysinfo::System::host_name().unwrap_or_else(|| "agent-unknown".to_string())
            } else {
                configured
            }
        };
        let fim_paths = env_or("AGENT_FIM_PATHS", "/etc")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        AgentConfig {
            agent_id,
            server_url: env_or("SGE_SERVER_URL", "nats://127.0.0.1:4222"),
            heartbeat_interval: Duration::from_secs(env_parse("AGENT_HEARTBEAT_SECS", 60)),
            fim_paths,
            syslog_socket: env_or("AGENT_SYSLOG_SOCKET", "/run/vigil/agent-syslog.sock"),
            enforce_firewall: env_flag("AGENT_ENFORCE_FIREWALL", false),
        }
    }
}
