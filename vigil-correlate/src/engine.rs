//! Rule compilation and evaluation.
//!
//! Conditions are expressions over a single read-only `Event` binding,
//! e.g. `Event.severity == "critical" && Event.source == "firewall"` or
//! `"malicious_ip" in Event.tags`. Each rule compiles once; a rule that
//! fails to compile is logged and skipped, and the engine continues with
//! the remainder.

use std::sync::Arc;

use parking_lot::RwLock;
use rhai::{Dynamic, Scope, AST};
use tracing::{error, warn};

use vigil_core::types::{Event, Rule};

pub struct CompiledRule {
    pub rule: Rule,
    ast: AST,
}

/// Immutable compiled snapshot; reload builds a new one and swaps it in.
pub struct RuleSet {
    pub rules: Vec<CompiledRule>,
    pub skipped: usize,
}

pub struct Engine {
    evaluator: rhai::Engine,
    active: RwLock<Arc<RuleSet>>,
}

impl Engine {
    pub fn new() -> Engine {
        let mut evaluator = rhai::Engine::new();
        // Conditions are expressions, not scripts: cap sizes hard since
        // rule text is operator input evaluated on every event.
        evaluator.set_max_expr_depths(32, 32);
        evaluator.set_max_operations(10_000);
        Engine {
            evaluator,
            active: RwLock::new(Arc::new(RuleSet { rules: Vec::new(), skipped: 0 })),
        }
    }

    /// Compile `rules` and atomically replace the active set. Compilation
    /// failures skip that rule only.
    pub fn load(&self, rules: Vec<Rule>) -> Arc<RuleSet> {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut skipped = 0;
        for rule in rules {
            if !rule.enabled {
                continue;
            }
            match self.evaluator.compile_expression(&rule.condition) {
                Ok(ast) => compiled.push(CompiledRule { rule, ast }),
                Err(err) => {
                    skipped += 1;
                    error!(rule_id = %rule.id, rule = %rule.name, error = %err, "rule compilation failed, skipping");
                }
            }
        }
        let set = Arc::new(RuleSet { rules: compiled, skipped });
        *self.active.write() = Arc::clone(&set);
        set
    }

    pub fn rule_count(&self) -> usize {
        self.active.read().rules.len()
    }

    /// Evaluate every compiled rule against `evt`; returns the matching
    /// rules. A runtime error in one rule is logged with rule and event
    /// ids and does not affect the others.
    pub fn evaluate(&self, evt: &Event) -> Vec<Rule> {
        let set = Arc::clone(&self.active.read());
        let binding = event_binding(evt);
        let mut matches = Vec::new();

        for compiled in &set.rules {
            let mut scope = Scope::new();
            scope.push("Event", binding.clone());
            match self.evaluator.eval_ast_with_scope::<bool>(&mut scope, &compiled.ast) {
                Ok(true) => matches.push(compiled.rule.clone()),
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        rule_id = %compiled.rule.id,
                        event_id = %evt.id,
                        error = %err,
                        "rule evaluation error, skipping"
                    );
                }
            }
        }
        matches
    }
}

impl Default for Engine {
    fn default() -> Engine {
        Engine::new()
    }
}

/// Project the event onto the expression environment. Field names match
/// the wire schema; maps come across as nested objects.
fn event_binding(evt: &Event) -> rhai::Map {
    let mut m = rhai::Map::new();
    m.insert("id".into(), evt.id.clone().into());
    m.insert("source".into(), evt.source.clone().into());
    m.insert("source_ip".into(), evt.source_ip.clone().into());
    m.insert("dest_ip".into(), evt.dest_ip.clone().into());
    m.insert("source_port".into(), Dynamic::from(evt.source_port as i64));
    m.insert("dest_port".into(), Dynamic::from(evt.dest_port as i64));
    m.insert("event_type".into(), evt.event_type.clone().into());
    m.insert("severity".into(), evt.severity.as_str().into());
    m.insert("description".into(), evt.description.clone().into());
    m.insert("raw_log".into(), evt.raw_log.clone().into());
    m.insert(
        "tags".into(),
        evt.tags.iter().map(|t| Dynamic::from(t.clone())).collect::<rhai::Array>().into(),
    );
    m.insert("metadata".into(), json_to_dynamic(&evt.metadata));
    m.insert("enrichment".into(), json_to_dynamic(&evt.enrichment));
    m
}

fn json_to_dynamic(map: &serde_json::Map<String, serde_json::Value>) -> Dynamic {
    rhai::serde::to_dynamic(map).unwrap_or_else(|_| Dynamic::from(rhai::Map::new()))
}
