//! Sensor configuration from `SENSOR_*` environment variables.

use std::time::Duration;

use vigil_core::config::{env_duration_ms, env_flag, env_or, env_parse};

use crate::capture::BackendKind;
use crate::detect::DetectorConfig;
use crate::dpi::DpiConfig;

#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Comma-separated interface list; empty means the default device.
    pub interfaces: Vec<String>,
    pub snaplen: i32,
    pub promiscuous: bool,
    pub bpf_filter: String,
    pub buffer_size: i32,
    pub read_timeout: Duration,
    pub backend: BackendKind,
    /// Kernel fanout group id; load-spreads capture across sockets.
    pub fanout_group: Option<u16>,
    /// Worker pool size; 0 means one per CPU.
    pub workers: usize,
    pub dpi: DpiConfig,
    pub detect: DetectorConfig,
}

impl SensorConfig {
    pub fn from_env() -> SensorConfig {
        let interfaces = env_or("SENSOR_INTERFACE", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        SensorConfig {
            interfaces,
            snaplen: env_parse("SENSOR_SNAPLEN", 1600),
            promiscuous: env_flag("SENSOR_PROMISCUOUS", true),
            bpf_filter: env_or("SENSOR_BPF", ""),
            buffer_size: env_parse("SENSOR_BUFFER_SIZE", 2 * 1024 * 1024),
            read_timeout: env_duration_ms("SENSOR_TIMEOUT_MS", 1000),
            backend: env_or("SENSOR_BACKEND", "pcap").parse().unwrap_or(BackendKind::Pcap),
            fanout_group: std::env::var("SENSOR_FANOUT_GROUP")
                .ok()
                .and_then(|v| v.parse().ok()),
            workers: env_parse("SENSOR_WORKERS", 0),
            dpi: DpiConfig {
                http_enabled: env_flag("SENSOR_DPI_HTTP", true),
                dns_enabled: env_flag("SENSOR_DPI_DNS", true),
                tls_enabled: env_flag("SENSOR_DPI_TLS", true),
                smb_enabled: env_flag("SENSOR_DPI_SMB", true),
            },
            detect: DetectorConfig::from_env(),
        }
    }

    pub fn worker_count(&self) -> usize {
        let cpus = num_cpus::get();
        if self.workers == 0 {
            cpus
        } else {
            self.workers.min(cpus)
        }
    }
}
