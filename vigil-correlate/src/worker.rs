//! The correlation consume loop.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use vigil_core::types::{Alert, Event, Rule};
use vigil_core::subjects;
use vigil_fabric::FabricClient;
use vigil_state::StateCache;

use crate::engine::Engine;

/// How long a matched event's source IP stays parked for SOAR target
/// resolution.
const TARGET_PARK_TTL: Duration = Duration::from_secs(24 * 3600);

/// Consume raw events as a work-queue group, evaluate the compiled rule
/// set, and publish alerts. Replicas sharing the group split the load;
/// per-event evaluation is atomic, cross-event ordering is not promised.
pub async fn run(
    client: FabricClient,
    engine: Arc<Engine>,
    cache: Option<StateCache>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), vigil_fabric::FabricError> {
    let mut messages = client
        .queue_subscribe(
            subjects::STREAM_EVENTS,
            subjects::EVENTS_RAW,
            subjects::CONSUMER_CORRELATION,
        )
        .await?;
    info!("correlation engine consuming {}", subjects::EVENTS_RAW);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("correlation engine stopping");
                return Ok(());
            }
            maybe = messages.next() => {
                let Some(result) = maybe else {
                    warn!("correlation consumer stream ended");
                    return Ok(());
                };
                let msg = match result {
                    Ok(msg) => msg,
                    Err(err) => {
                        warn!(error = %err, "consumer pull error");
                        continue;
                    }
                };

                let evt: Event = match serde_json::from_slice(&msg.payload) {
                    Ok(evt) => evt,
                    Err(err) => {
                        debug!(error = %err, "undecodable event payload");
                        let _ = msg.ack().await;
                        continue;
                    }
                };

                let matched = engine.evaluate(&evt);
                let mut publish_failed = false;
                for rule in &matched {
                    match handle_match(&client, &cache, rule, &evt).await {
                        Ok(true) => {}
                        Ok(false) => {} // window threshold not reached
                        Err(err) => {
                            warn!(rule_id = %rule.id, event_id = %evt.id, error = %err, "alert publish failed");
                            publish_failed = true;
                        }
                    }
                }

                if publish_failed {
                    // Redelivery re-evaluates; alert consumers tolerate
                    // duplicates by event id.
                    continue;
                }
                if let Err(err) = msg.ack().await {
                    warn!(event_id = %evt.id, error = %err, "ack failed");
                }
            }
        }
    }
}

/// Apply window gating, park the target IP, and publish the alert.
/// Returns Ok(true) when an alert went out.
async fn handle_match(
    client: &FabricClient,
    cache: &Option<StateCache>,
    rule: &Rule,
    evt: &Event,
) -> Result<bool, String> {
    if let (Some(window_secs), Some(threshold)) = (rule.window_secs, rule.threshold) {
        if !window_open(cache, &rule.id, window_secs, threshold).await {
            return Ok(false);
        }
    }

    if let Some(cache) = cache {
        if !evt.source_ip.is_empty() {
            if let Err(err) = cache.park_alert_target(&evt.id, &evt.source_ip, TARGET_PARK_TTL).await {
                debug!(event_id = %evt.id, error = %err, "target parking failed");
            }
        }
    }

    let alert = Alert::for_rule(rule, evt.id.clone());
    let subject = subjects::alert(alert.severity, &rule.id);
    let payload = serde_json::to_vec(&alert).map_err(|e| e.to_string())?;
    client
        .publish_async(subject, payload.into())
        .await
        .map_err(|e| e.to_string())?;

    info!(rule_id = %rule.id, alert_id = %alert.id, event_id = %evt.id, severity = %alert.severity, "alert generated");
    Ok(true)
}

/// Sliding-window gate: INCR with TTL refresh; the alert fires once the
/// counter reaches the threshold. Approximate by design — the TTL refresh
/// is the window. Without a cache the gate is open (alerting beats
/// silent suppression).
async fn window_open(
    cache: &Option<StateCache>,
    rule_id: &str,
    window_secs: u64,
    threshold: u64,
) -> bool {
    let Some(cache) = cache else {
        warn!(rule_id, "no state cache, stateful rule fires unconditionally");
        return true;
    };
    match cache
        .incr_correlation_counter(rule_id, Duration::from_secs(window_secs))
        .await
    {
        Ok(count) => count >= threshold as i64,
        Err(err) => {
            warn!(rule_id, error = %err, "window counter failed, gating open");
            true
        }
    }
}
