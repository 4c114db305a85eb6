//! Correlation engine configuration.

use std::time::Duration;

use vigil_core::config::{env_duration_ms, env_or};

#[derive(Debug, Clone)]
pub struct CorrelateConfig {
    /// JSON rules file; empty uses the built-in baseline set.
    pub rules_path: String,
    /// How often the rules file's mtime is checked for reload.
    pub reload_interval: Duration,
}

impl CorrelateConfig {
    pub fn from_env() -> CorrelateConfig {
        CorrelateConfig {
            rules_path: env_or("CORRELATION_RULES_PATH", ""),
            reload_interval: env_duration_ms("CORRELATION_RELOAD_MS", 30_000),
        }
    }
}
