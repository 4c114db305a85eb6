//! Gateway configuration from `INGEST_*` environment variables.

use vigil_core::config::{env_flag, env_parse};

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub http_port: u16,
    pub syslog_port: u16,
    pub syslog_enabled: bool,
    pub max_body_bytes: usize,
}

impl IngestConfig {
    pub fn from_env() -> IngestConfig {
        IngestConfig {
            http_port: env_parse("INGEST_HTTP_PORT", 8080),
            syslog_port: env_parse("INGEST_SYSLOG_PORT", 514),
            syslog_enabled: env_flag("INGEST_SYSLOG_ENABLED", true),
            max_body_bytes: env_parse("INGEST_MAX_BODY_BYTES", 10 * 1024 * 1024),
        }
    }
}
