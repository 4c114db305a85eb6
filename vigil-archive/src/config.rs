//! Archival sink configuration from `CLICKHOUSE_*`/`ARCHIVE_*`.

use std::time::Duration;

use vigil_core::config::{env_duration_ms, env_or, env_parse};

#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub addr: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl ArchiveConfig {
    pub fn from_env() -> ArchiveConfig {
        ArchiveConfig {
            addr: env_or("CLICKHOUSE_ADDR", "127.0.0.1:8123"),
            database: env_or("CLICKHOUSE_DB", "vigil"),
            user: env_or("CLICKHOUSE_USER", "default"),
            password: env_or("CLICKHOUSE_PASSWORD", ""),
            batch_size: env_parse("ARCHIVE_BATCH_SIZE", 5000),
            flush_interval: env_duration_ms("ARCHIVE_FLUSH_MS", 5000),
        }
    }

    pub fn url(&self) -> String {
        if self.addr.starts_with("http://") || self.addr.starts_with("https://") {
            self.addr.clone()
        } else {
            format!("http://{}", self.addr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_prefixes_scheme() {
        let mut cfg = ArchiveConfig::from_env();
        cfg.addr = "db:8123".into();
        assert_eq!(cfg.url(), "http://db:8123");
        cfg.addr = "https://db:8443".into();
        assert_eq!(cfg.url(), "https://db:8443");
    }
}
