//! Response actions and their registry.
//!
//! Actions are keyed by name and registered at startup; a playbook step
//! names an action and passes a parameter map. Adding a response is a
//! matter of registering another handler.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{info, warn};

use vigil_core::subjects;
use vigil_core::types::FieldMap;
use vigil_fabric::FabricClient;

/// Command transport seam; the production impl is the fabric client.
pub trait CommandPublisher: Send + Sync {
    fn publish(&self, subject: String, payload: Vec<u8>) -> BoxFuture<'_, Result<(), String>>;
}

impl CommandPublisher for FabricClient {
    fn publish(&self, subject: String, payload: Vec<u8>) -> BoxFuture<'_, Result<(), String>> {
        async move {
            // Commands ride plain subjects: agents want live dispatch,
            // not replay of stale containment orders.
            self.publish_core(subject, payload.into())
                .await
                .map_err(|e| e.to_string())
        }
        .boxed()
    }
}

/// Everything a step gets to work with: the alert, the resolved target
/// address (when derivable), and the command transport. The orchestrator
/// never waits for an agent to acknowledge execution.
pub struct ExecutionContext {
    pub alert_id: String,
    pub target_ip: String,
    pub publisher: Arc<dyn CommandPublisher>,
}

pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        params: &'a FieldMap,
    ) -> BoxFuture<'a, Result<(), String>>;
}

pub struct ActionRegistry {
    actions: HashMap<&'static str, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> ActionRegistry {
        ActionRegistry { actions: HashMap::new() }
    }

    /// Registry with the core action set.
    pub fn with_core_actions(slack_webhook: &str) -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(BlockIp));
        registry.register(Arc::new(SlackNotify::new(slack_webhook)));
        registry.register(Arc::new(AgentCommand));
        registry
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name(), action);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }
}

impl Default for ActionRegistry {
    fn default() -> ActionRegistry {
        ActionRegistry::new()
    }
}

// ── block_ip ─────────────────────────────────────────────────────────────────

/// Publishes a firewall block command for the alert's target address.
pub struct BlockIp;

impl Action for BlockIp {
    fn name(&self) -> &'static str {
        "block_ip"
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        _params: &'a FieldMap,
    ) -> BoxFuture<'a, Result<(), String>> {
        async move {
            if ctx.target_ip.is_empty() {
                return Err("no target ip resolved for alert".to_string());
            }
            let command = json!({ "action": "firewall_block", "ip": ctx.target_ip });
            let subject = subjects::agent_commands("firewall-agent");
            info!(alert_id = %ctx.alert_id, ip = %ctx.target_ip, "dispatching firewall block");
            ctx.publisher
                .publish(subject, serde_json::to_vec(&command).map_err(|e| e.to_string())?)
                .await
        }
        .boxed()
    }
}

// ── slack_notify ─────────────────────────────────────────────────────────────

/// Best-effort webhook notification; fire-and-forget so a slow or dead
/// webhook can never block the pipeline.
pub struct SlackNotify {
    client: reqwest::Client,
    webhook: String,
}

impl SlackNotify {
    pub fn new(webhook: &str) -> SlackNotify {
        SlackNotify {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            webhook: webhook.to_string(),
        }
    }
}

impl Action for SlackNotify {
    fn name(&self) -> &'static str {
        "slack_notify"
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        params: &'a FieldMap,
    ) -> BoxFuture<'a, Result<(), String>> {
        async move {
            let message = params
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Vigil alert triggered a playbook")
                .to_string();
            let text = format!("{message} (alert {})", ctx.alert_id);
            info!(alert_id = %ctx.alert_id, "slack notification queued");

            if self.webhook.is_empty() {
                return Ok(());
            }
            let client = self.client.clone();
            let webhook = self.webhook.clone();
            tokio::spawn(async move {
                if let Err(err) = client.post(&webhook).json(&json!({ "text": text })).send().await {
                    warn!(error = %err, "slack notification failed");
                }
            });
            Ok(())
        }
        .boxed()
    }
}

// ── agent_command ────────────────────────────────────────────────────────────

/// Publishes the parameter map to `commands.<agent_id>`; the payload is
/// whatever the playbook author put in the parameters.
pub struct AgentCommand;

impl Action for AgentCommand {
    fn name(&self) -> &'static str {
        "agent_command"
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        params: &'a FieldMap,
    ) -> BoxFuture<'a, Result<(), String>> {
        async move {
            let agent_id = params
                .get("agent_id")
                .and_then(Value::as_str)
                .ok_or_else(|| "agent_command requires an agent_id parameter".to_string())?;

            let mut payload = params.clone();
            payload.remove("agent_id");
            payload.insert("alert_id".into(), Value::from(ctx.alert_id.clone()));

            let subject = subjects::agent_commands(agent_id);
            info!(alert_id = %ctx.alert_id, agent_id, "dispatching agent command");
            ctx.publisher
                .publish(subject, serde_json::to_vec(&payload).map_err(|e| e.to_string())?)
                .await
        }
        .boxed()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use parking_lot::Mutex;

    /// Records published commands for assertions.
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub published: Mutex<Vec<(String, Vec<u8>)>>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl CommandPublisher for RecordingPublisher {
        fn publish(&self, subject: String, payload: Vec<u8>) -> BoxFuture<'_, Result<(), String>> {
            async move {
                if self.fail.load(std::sync::atomic::Ordering::Relaxed) {
                    return Err("publish refused".to_string());
                }
                self.published.lock().push((subject, payload));
                Ok(())
            }
            .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::RecordingPublisher;
    use super::*;

    fn ctx(publisher: Arc<RecordingPublisher>, target_ip: &str) -> ExecutionContext {
        ExecutionContext {
            alert_id: "A1".into(),
            target_ip: target_ip.into(),
            publisher,
        }
    }

    #[tokio::test]
    async fn test_block_ip_publishes_firewall_command() {
        let publisher = Arc::new(RecordingPublisher::default());
        let action = BlockIp;
        action.execute(&ctx(Arc::clone(&publisher), "1.2.3.4"), &FieldMap::new()).await.unwrap();

        let published = publisher.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "commands.firewall-agent");
        let body: Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(body, json!({"action": "firewall_block", "ip": "1.2.3.4"}));
    }

    #[tokio::test]
    async fn test_block_ip_without_target_fails() {
        let publisher = Arc::new(RecordingPublisher::default());
        let action = BlockIp;
        let result = action.execute(&ctx(Arc::clone(&publisher), ""), &FieldMap::new()).await;
        assert!(result.is_err());
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_agent_command_routes_by_agent_id() {
        let publisher = Arc::new(RecordingPublisher::default());
        let mut params = FieldMap::new();
        params.insert("agent_id".into(), Value::from("host-7"));
        params.insert("action".into(), Value::from("collect_now"));

        AgentCommand.execute(&ctx(Arc::clone(&publisher), "1.2.3.4"), &params).await.unwrap();

        let published = publisher.published.lock();
        assert_eq!(published[0].0, "commands.host-7");
        let body: Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(body.get("action").unwrap(), "collect_now");
        assert_eq!(body.get("alert_id").unwrap(), "A1");
        assert!(body.get("agent_id").is_none());
    }

    #[tokio::test]
    async fn test_agent_command_requires_agent_id() {
        let publisher = Arc::new(RecordingPublisher::default());
        let result = AgentCommand.execute(&ctx(publisher, "1.2.3.4"), &FieldMap::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_slack_notify_without_webhook_is_ok() {
        let publisher = Arc::new(RecordingPublisher::default());
        let action = SlackNotify::new("");
        let mut params = FieldMap::new();
        params.insert("message".into(), Value::from("Critical alert"));
        assert!(action.execute(&ctx(publisher, ""), &params).await.is_ok());
    }

    #[test]
    fn test_core_registry_contents() {
        let registry = ActionRegistry::with_core_actions("");
        assert!(registry.contains("block_ip"));
        assert!(registry.contains("slack_notify"));
        assert!(registry.contains("agent_command"));
        assert!(!registry.contains("launch_missiles"));
    }
}
