//! Playbook matching and execution.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use vigil_core::types::{Alert, Playbook};
use vigil_state::StateCache;

use crate::actions::{ActionRegistry, CommandPublisher, ExecutionContext};

pub struct Orchestrator {
    playbooks: Vec<Playbook>,
    registry: Arc<ActionRegistry>,
    cache: Option<StateCache>,
}

impl Orchestrator {
    /// Validate playbooks against the registry: a playbook naming an
    /// unknown action is disabled at load, not at execution time.
    pub fn new(
        playbooks: Vec<Playbook>,
        registry: Arc<ActionRegistry>,
        cache: Option<StateCache>,
    ) -> Orchestrator {
        let playbooks = playbooks
            .into_iter()
            .map(|mut pb| {
                if let Some(step) = pb.steps.iter().find(|s| !registry.contains(&s.action)) {
                    warn!(playbook = %pb.id, action = %step.action, "unknown action, playbook disabled");
                    pb.enabled = false;
                }
                pb
            })
            .collect();
        Orchestrator { playbooks, registry, cache }
    }

    pub fn active_playbooks(&self) -> usize {
        self.playbooks.iter().filter(|pb| pb.enabled).count()
    }

    /// Run every playbook whose trigger matches, each in its own task.
    /// Steps inside one playbook are sequential; a step failure abandons
    /// that playbook's remaining steps and nothing else.
    pub async fn handle_alert(&self, alert: &Alert, publisher: Arc<dyn CommandPublisher>) {
        let target_ip = self.resolve_target_ip(alert).await;

        let mut tasks = Vec::new();
        for pb in self.playbooks.iter().filter(|pb| pb.enabled) {
            if !trigger_matches(&pb.trigger, alert) {
                continue;
            }
            info!(playbook = %pb.name, alert_id = %alert.id, "playbook triggered");

            let pb = pb.clone();
            let registry = Arc::clone(&self.registry);
            let ctx = ExecutionContext {
                alert_id: alert.id.clone(),
                target_ip: target_ip.clone(),
                publisher: Arc::clone(&publisher),
            };
            tasks.push(tokio::spawn(run_playbook(pb, registry, ctx)));
        }

        for task in tasks {
            let _ = task.await;
        }
    }

    /// The alert's target address is its first contributing event's
    /// source IP, parked in the shared cache by the correlator. Alerts
    /// whose event has expired resolve to no target.
    async fn resolve_target_ip(&self, alert: &Alert) -> String {
        let Some(event_id) = alert.event_ids.first() else {
            return String::new();
        };
        let Some(cache) = &self.cache else {
            return String::new();
        };
        match cache.alert_target(event_id).await {
            Ok(Some(ip)) => ip,
            Ok(None) => String::new(),
            Err(err) => {
                warn!(alert_id = %alert.id, error = %err, "target resolution failed");
                String::new()
            }
        }
    }
}

/// Trigger predicates are coarse on purpose: either a severity name
/// (`"critical"`) or a rule binding (`"rule_id=R1"`).
pub fn trigger_matches(trigger: &str, alert: &Alert) -> bool {
    if let Some(rule_id) = trigger.strip_prefix("rule_id=") {
        return alert.rule_id == rule_id;
    }
    trigger.eq_ignore_ascii_case(alert.severity.as_str())
}

async fn run_playbook(pb: Playbook, registry: Arc<ActionRegistry>, ctx: ExecutionContext) {
    for (index, step) in pb.steps.iter().enumerate() {
        let Some(action) = registry.get(&step.action) else {
            // Validation keeps this from happening; belt for reloads.
            warn!(playbook = %pb.id, action = %step.action, "action vanished from registry");
            return;
        };
        let result = tokio::time::timeout(
            Duration::from_secs(30),
            action.execute(&ctx, &step.params),
        )
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(playbook = %pb.id, step = index, action = %step.action, error = %err, "step failed, stopping playbook");
                return;
            }
            Err(_) => {
                warn!(playbook = %pb.id, step = index, action = %step.action, "step timed out, stopping playbook");
                return;
            }
        }
    }
    info!(playbook = %pb.name, alert_id = %ctx.alert_id, "playbook completed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testutil::RecordingPublisher;
    use crate::actions::Action;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use serde_json::{json, Value};
    use vigil_core::types::{FieldMap, PlaybookStep, Rule, Severity};

    fn alert(severity: Severity, rule_id: &str) -> Alert {
        let rule = Rule {
            id: rule_id.to_string(),
            name: "test rule".into(),
            condition: String::new(),
            severity,
            enabled: true,
            actions: vec![],
            window_secs: None,
            threshold: None,
        };
        Alert::for_rule(&rule, "E1")
    }

    fn block_playbook(trigger: &str) -> Playbook {
        Playbook {
            id: "pb-001".into(),
            name: "Auto-contain".into(),
            trigger: trigger.into(),
            steps: vec![
                PlaybookStep { action: "slack_notify".into(), params: FieldMap::new() },
                PlaybookStep { action: "block_ip".into(), params: FieldMap::new() },
            ],
            enabled: true,
        }
    }

    #[test]
    fn test_trigger_predicates() {
        let a = alert(Severity::Critical, "R1");
        assert!(trigger_matches("critical", &a));
        assert!(!trigger_matches("high", &a));
        assert!(trigger_matches("rule_id=R1", &a));
        assert!(!trigger_matches("rule_id=R2", &a));
    }

    #[tokio::test]
    async fn test_unknown_action_disables_playbook() {
        let registry = Arc::new(ActionRegistry::with_core_actions(""));
        let mut pb = block_playbook("critical");
        pb.steps.push(PlaybookStep { action: "time_travel".into(), params: FieldMap::new() });
        let orchestrator = Orchestrator::new(vec![pb], registry, None);
        assert_eq!(orchestrator.active_playbooks(), 0);
    }

    /// A step that always fails, for sequencing assertions.
    struct FailingStep;

    impl Action for FailingStep {
        fn name(&self) -> &'static str {
            "always_fail"
        }

        fn execute<'a>(
            &'a self,
            _ctx: &'a ExecutionContext,
            _params: &'a FieldMap,
        ) -> BoxFuture<'a, Result<(), String>> {
            async { Err("deliberate".to_string()) }.boxed()
        }
    }

    #[tokio::test]
    async fn test_step_failure_stops_that_playbook_only() {
        let mut registry = ActionRegistry::with_core_actions("");
        registry.register(Arc::new(FailingStep));
        let registry = Arc::new(registry);

        // First playbook fails at step 0 and must not reach agent_command;
        // second playbook still runs.
        let mut failing = block_playbook("critical");
        failing.steps = vec![
            PlaybookStep { action: "always_fail".into(), params: FieldMap::new() },
            PlaybookStep {
                action: "agent_command".into(),
                params: {
                    let mut p = FieldMap::new();
                    p.insert("agent_id".into(), Value::from("host-1"));
                    p
                },
            },
        ];
        let mut second = block_playbook("critical");
        second.id = "pb-002".into();
        second.steps = vec![PlaybookStep {
            action: "agent_command".into(),
            params: {
                let mut p = FieldMap::new();
                p.insert("agent_id".into(), Value::from("host-2"));
                p
            },
        }];

        let orchestrator = Orchestrator::new(vec![failing, second], registry, None);
        let publisher = Arc::new(RecordingPublisher::default());
        orchestrator.handle_alert(&alert(Severity::Critical, "R1"), publisher.clone()).await;

        let published = publisher.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "commands.host-2");
    }

    #[tokio::test]
    async fn test_non_matching_alert_runs_nothing() {
        let registry = Arc::new(ActionRegistry::with_core_actions(""));
        let orchestrator = Orchestrator::new(vec![block_playbook("critical")], registry, None);
        let publisher = Arc::new(RecordingPublisher::default());
        orchestrator.handle_alert(&alert(Severity::Low, "R1"), publisher.clone()).await;
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_block_ip_skipped_without_target_but_notify_runs() {
        // No cache: target unresolvable, block_ip fails, but the playbook
        // already ran its notify step.
        let registry = Arc::new(ActionRegistry::with_core_actions(""));
        let orchestrator = Orchestrator::new(vec![block_playbook("critical")], registry, None);
        let publisher = Arc::new(RecordingPublisher::default());
        orchestrator.handle_alert(&alert(Severity::Critical, "R1"), publisher.clone()).await;
        // block_ip errored (no target), so no firewall command went out.
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_block_playbook_dispatches_firewall_command_with_target() {
        // Drive run_playbook directly with a resolved target.
        let registry = Arc::new(ActionRegistry::with_core_actions(""));
        let publisher = Arc::new(RecordingPublisher::default());
        let ctx = ExecutionContext {
            alert_id: "A9".into(),
            target_ip: "1.2.3.4".into(),
            publisher: publisher.clone(),
        };
        run_playbook(block_playbook("critical"), registry, ctx).await;

        let published = publisher.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "commands.firewall-agent");
        let body: Value = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(body, json!({"action": "firewall_block", "ip": "1.2.3.4"}));
    }
}
