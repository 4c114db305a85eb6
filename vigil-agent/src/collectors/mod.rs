//! Platform collector set.
//!
//! The manager launches the portable collectors everywhere (host
//! telemetry heartbeat, file-integrity watcher) and the Linux-specific
//! ones where they apply (syslog datagram socket, audit log tail). Every
//! collector hands events to the non-blocking producer; a backed-up bus
//! costs events, never a wedged collector.

pub mod fim;
pub mod host;

#[cfg(target_os = "linux")]
pub mod linux;

use tokio::sync::watch;
use tracing::info;

use vigil_fabric::EventProducer;

use crate::config::AgentConfig;

pub struct CollectorManager {
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl CollectorManager {
    pub fn start(
        cfg: &AgentConfig,
        producer: EventProducer,
        shutdown: watch::Receiver<bool>,
    ) -> CollectorManager {
        let mut handles = Vec::new();

        handles.push(tokio::spawn(host::run_heartbeat(
            cfg.agent_id.clone(),
            cfg.heartbeat_interval,
            producer.clone(),
            shutdown.clone(),
        )));

        if !cfg.fim_paths.is_empty() {
            handles.push(tokio::spawn(fim::run_watcher(
                cfg.fim_paths.clone(),
                producer.clone(),
                shutdown.clone(),
            )));
        }

        #[cfg(target_os = "linux")]
        {
            handles.push(tokio::spawn(linux::run_syslog_socket(
                cfg.syslog_socket.clone(),
                producer.clone(),
                shutdown.clone(),
            )));
            handles.push(tokio::spawn(linux::run_audit_tail(
                producer.clone(),
                shutdown.clone(),
            )));
        }

        info!(collectors = handles.len(), "collector set launched");
        CollectorManager { handles }
    }

    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
