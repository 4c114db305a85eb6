//! Host telemetry heartbeat.

use std::time::Duration;

use serde_json::Value;
use sysinfo::System;
use tokio::sync::watch;
use tracing::{debug, info};

use vigil_core::types::{Event, HostInfo, Severity};
use vigil_core::ids::now_utc_ms;
use vigil_fabric::EventProducer;

/// Collect one host snapshot.
pub fn collect(agent_id: &str) -> HostInfo {
    let mut sys = System::new_all();
    sys.refresh_all();

    HostInfo {
        agent_id: agent_id.to_string(),
        hostname: System::host_name().unwrap_or_default(),
        os: System::long_os_version().unwrap_or_default(),
        kernel_version: System::kernel_version().unwrap_or_default(),
        uptime_secs: System::uptime(),
        load_avg_one: System::load_average().one,
        total_memory_kb: sys.total_memory() / 1024,
        used_memory_kb: sys.used_memory() / 1024,
        timestamp: now_utc_ms(),
    }
}

/// The heartbeat as a canonical event bound for `events.raw.info.agent`.
pub fn snapshot_event(agent_id: &str) -> Event {
    let info = collect(agent_id);
    let mut evt = Event::new("agent", "agent.heartbeat", Severity::Info);
    evt.description = format!("heartbeat from {}", info.hostname);
    evt.metadata.insert(
        "host_info".into(),
        serde_json::to_value(&info).unwrap_or(Value::Null),
    );
    evt.metadata.insert("agent_id".into(), Value::from(agent_id));
    evt
}

pub async fn run_heartbeat(
    agent_id: String,
    interval: Duration,
    producer: EventProducer,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "heartbeat collector running");
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                if producer.try_publish(snapshot_event(&agent_id)).is_err() {
                    debug!("heartbeat dropped, publish buffer full");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_event_shape() {
        let evt = snapshot_event("host-1");
        assert_eq!(evt.source, "agent");
        assert_eq!(evt.event_type, "agent.heartbeat");
        assert_eq!(evt.severity, Severity::Info);
        let info = evt.metadata.get("host_info").unwrap();
        assert_eq!(info.get("agent_id").unwrap(), "host-1");
        assert!(info.get("uptime_secs").is_some());
    }
}
