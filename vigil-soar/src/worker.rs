//! The alert consume loop.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use vigil_core::subjects;
use vigil_core::types::Alert;
use vigil_fabric::FabricClient;

use crate::actions::CommandPublisher;
use crate::engine::Orchestrator;

/// Consume `alerts.>` and hand each alert to the orchestrator. Commands
/// go out via async publish; agent acknowledgement is never awaited.
pub async fn run(
    client: FabricClient,
    orchestrator: Arc<Orchestrator>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), vigil_fabric::FabricError> {
    let mut messages = client
        .queue_subscribe(subjects::STREAM_ALERTS, subjects::ALERTS, subjects::CONSUMER_SOAR)
        .await?;
    info!("soar orchestrator consuming {}", subjects::ALERTS);

    let publisher: Arc<dyn CommandPublisher> = Arc::new(client.clone());

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("soar orchestrator stopping");
                return Ok(());
            }
            maybe = messages.next() => {
                let Some(result) = maybe else {
                    warn!("soar consumer stream ended");
                    return Ok(());
                };
                let msg = match result {
                    Ok(msg) => msg,
                    Err(err) => {
                        warn!(error = %err, "consumer pull error");
                        continue;
                    }
                };

                let alert: Alert = match serde_json::from_slice(&msg.payload) {
                    Ok(alert) => alert,
                    Err(err) => {
                        debug!(error = %err, "undecodable alert payload");
                        let _ = msg.ack().await;
                        continue;
                    }
                };

                orchestrator.handle_alert(&alert, Arc::clone(&publisher)).await;
                if let Err(err) = msg.ack().await {
                    warn!(alert_id = %alert.id, error = %err, "ack failed");
                }
            }
        }
    }
}
