//! Orchestrator command handling.
//!
//! Commands arrive as JSON on `commands.<agent_id>` and dispatch on an
//! `action` label. Every effect is idempotent: blocking an already
//! blocked address or re-running a collection is harmless.

use std::collections::HashSet;
use std::process::Command;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

use vigil_core::subjects;
use vigil_fabric::{EventProducer, FabricClient};

use crate::collectors::host;
use crate::config::AgentConfig;

/// Idempotency state for firewall blocks.
pub struct CommandHandler {
    cfg: AgentConfig,
    blocked: Mutex<HashSet<String>>,
    producer: EventProducer,
}

impl CommandHandler {
    pub fn new(cfg: AgentConfig, producer: EventProducer) -> CommandHandler {
        CommandHandler {
            cfg,
            blocked: Mutex::new(HashSet::new()),
            producer,
        }
    }

    pub fn handle(&self, payload: &[u8]) {
        let Ok(command) = serde_json::from_slice::<Value>(payload) else {
            warn!("undecodable command payload");
            return;
        };
        let action = command.get("action").and_then(Value::as_str).unwrap_or("");
        match action {
            "firewall_block" => {
                let ip = command.get("ip").and_then(Value::as_str).unwrap_or("");
                self.firewall_block(ip);
            }
            "collect_now" => {
                info!("immediate collection requested");
                let _ = self.producer.try_publish(host::snapshot_event(&self.cfg.agent_id));
            }
            "ping" => {
                info!("ping received");
                let mut evt = vigil_core::Event::new("agent", "agent.pong", vigil_core::Severity::Info);
                evt.metadata.insert("agent_id".into(), Value::from(self.cfg.agent_id.clone()));
                let _ = self.producer.try_publish(evt);
            }
            other => warn!(action = other, "unknown command action ignored"),
        }
    }

    /// Install a drop rule for `ip`. Repeat blocks are no-ops; actual
    /// enforcement is opt-in, otherwise the block is recorded and logged.
    fn firewall_block(&self, ip: &str) {
        if ip.is_empty() {
            warn!("firewall_block without ip");
            return;
        }
        {
            let mut blocked = self.blocked.lock();
            if !blocked.insert(ip.to_string()) {
                info!(ip, "address already blocked");
                return;
            }
        }

        if self.cfg.enforce_firewall {
            let result = Command::new("iptables")
                .args(["-I", "INPUT", "-s", ip, "-j", "DROP"])
                .status();
            match result {
                Ok(status) if status.success() => info!(ip, "firewall drop rule installed"),
                Ok(status) => warn!(ip, code = status.code(), "iptables exited nonzero"),
                Err(err) => warn!(ip, error = %err, "iptables invocation failed"),
            }
        } else {
            info!(ip, "firewall block recorded (enforcement disabled)");
        }
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.lock().len()
    }
}

/// Subscribe to the agent's command subject and dispatch until shutdown.
pub async fn run_listener(
    client: FabricClient,
    handler: std::sync::Arc<CommandHandler>,
    agent_id: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let subject = subjects::agent_commands(&agent_id);
    let mut sub = match client.subscribe_core(subject.clone()).await {
        Ok(sub) => sub,
        Err(err) => {
            warn!(subject, error = %err, "command subscription failed");
            return;
        }
    };
    info!(subject, "command listener running");

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            maybe = sub.next() => {
                let Some(msg) = maybe else { return };
                handler.handle(&msg.payload);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use vigil_core::Event;
    use vigil_fabric::ProducerConfig;

    fn handler() -> (CommandHandler, mpsc::Receiver<Event>) {
        let cfg = AgentConfig {
            agent_id: "test-agent".into(),
            server_url: String::new(),
            heartbeat_interval: std::time::Duration::from_secs(60),
            fim_paths: vec![],
            syslog_socket: String::new(),
            enforce_firewall: false,
        };
        let (producer, outbox) = EventProducer::detached(ProducerConfig::default());
        (CommandHandler::new(cfg, producer), outbox)
    }

    #[test]
    fn test_block_is_idempotent() {
        let (handler, _outbox) = handler();
        handler.handle(br#"{"action":"firewall_block","ip":"1.2.3.4"}"#);
        handler.handle(br#"{"action":"firewall_block","ip":"1.2.3.4"}"#);
        assert_eq!(handler.blocked_count(), 1);
        handler.handle(br#"{"action":"firewall_block","ip":"5.6.7.8"}"#);
        assert_eq!(handler.blocked_count(), 2);
    }

    #[test]
    fn test_unknown_and_malformed_commands_ignored() {
        let (handler, _outbox) = handler();
        handler.handle(br#"{"action":"self_destruct"}"#);
        handler.handle(b"not json");
        handler.handle(br#"{"action":"firewall_block"}"#);
        assert_eq!(handler.blocked_count(), 0);
    }

    #[test]
    fn test_ping_emits_pong_event() {
        let (handler, mut outbox) = handler();
        handler.handle(br#"{"action":"ping"}"#);
        let evt = outbox.try_recv().expect("pong event queued");
        assert_eq!(evt.event_type, "agent.pong");
        assert_eq!(evt.metadata.get("agent_id").unwrap(), "test-agent");
    }

    #[test]
    fn test_collect_now_emits_host_snapshot() {
        let (handler, mut outbox) = handler();
        handler.handle(br#"{"action":"collect_now"}"#);
        let evt = outbox.try_recv().expect("snapshot event queued");
        assert_eq!(evt.event_type, "agent.heartbeat");
    }
}
