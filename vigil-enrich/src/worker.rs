//! The enrichment consume loop.

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use vigil_core::{subjects, Event};
use vigil_fabric::FabricClient;

use crate::apply_enrichment;
use crate::geoip::GeoProvider;
use crate::intel::{CachingProvider, IntelProvider};

/// Consume raw events, enrich, republish. The source message is only
/// acknowledged once the enriched copy is accepted by the publish buffer;
/// on failure the fabric redelivers and the logical layer stays
/// idempotent via the event id.
pub async fn run<P: IntelProvider>(
    client: FabricClient,
    geo: GeoProvider,
    intel: CachingProvider<P>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), vigil_fabric::FabricError> {
    let mut messages = client
        .queue_subscribe(
            subjects::STREAM_EVENTS,
            subjects::EVENTS_RAW,
            subjects::CONSUMER_ENRICHMENT,
        )
        .await?;
    info!("enrichment worker consuming {}", subjects::EVENTS_RAW);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("enrichment worker stopping");
                return Ok(());
            }
            maybe = messages.next() => {
                let Some(result) = maybe else {
                    warn!("enrichment consumer stream ended");
                    return Ok(());
                };
                let msg = match result {
                    Ok(msg) => msg,
                    Err(err) => {
                        warn!(error = %err, "consumer pull error");
                        continue;
                    }
                };

                let mut evt: Event = match serde_json::from_slice(&msg.payload) {
                    Ok(evt) => evt,
                    Err(err) => {
                        // Poison payloads are acked away rather than
                        // redelivered forever.
                        debug!(error = %err, "undecodable event payload");
                        let _ = msg.ack().await;
                        continue;
                    }
                };

                enrich(&mut evt, &geo, &intel).await;

                let subject = subjects::enriched_event(evt.severity, &evt.source);
                let payload = match serde_json::to_vec(&evt) {
                    Ok(p) => p,
                    Err(err) => {
                        warn!(event_id = %evt.id, error = %err, "serialize failed");
                        let _ = msg.ack().await;
                        continue;
                    }
                };

                match client.publish_async(subject, payload.into()).await {
                    Ok(_) => {
                        if let Err(err) = msg.ack().await {
                            warn!(event_id = %evt.id, error = %err, "ack failed");
                        }
                    }
                    Err(err) => {
                        // No ack: the fabric will redeliver this event.
                        warn!(event_id = %evt.id, error = %err, "enriched publish failed");
                    }
                }
            }
        }
    }
}

async fn enrich<P: IntelProvider>(evt: &mut Event, geo: &GeoProvider, intel: &CachingProvider<P>) {
    if evt.source_ip.is_empty() {
        apply_enrichment(evt, None, None);
        return;
    }
    let location = geo.lookup(&evt.source_ip);
    let reputation = intel.reputation(&evt.source_ip).await;
    if reputation.as_ref().is_some_and(|r| r.is_malicious) {
        info!(event_id = %evt.id, ip = %evt.source_ip, "malicious source, escalating");
    }
    apply_enrichment(evt, location.as_ref(), reputation.as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intel::StubProvider;
    use vigil_core::Severity;

    #[tokio::test]
    async fn test_enrich_escalates_malicious_source() {
        let geo = GeoProvider::open("");
        let intel = CachingProvider::new(StubProvider::flagging(&["1.2.3.4"]), None);

        let mut evt = Event::new("agent", "login_failed", Severity::Info);
        evt.id = "E1".into();
        evt.source_ip = "1.2.3.4".into();

        enrich(&mut evt, &geo, &intel).await;

        assert_eq!(evt.severity, Severity::Critical);
        assert!(evt.enrichment.contains_key("threat_intel_source"));
        assert!(evt.tags.contains(&crate::MALICIOUS_TAG.to_string()));
        // Enriched subject routes by the escalated severity.
        assert_eq!(
            subjects::enriched_event(evt.severity, &evt.source),
            "events.enriched.critical.agent"
        );
    }

    #[tokio::test]
    async fn test_event_without_source_ip_passes_through() {
        let geo = GeoProvider::open("");
        let intel = CachingProvider::new(StubProvider::flagging(&["1.2.3.4"]), None);

        let mut evt = Event::new("agent", "heartbeat", Severity::Info);
        enrich(&mut evt, &geo, &intel).await;

        assert_eq!(evt.severity, Severity::Info);
        assert!(evt.enrichment.is_empty());
        assert_eq!(evt.status, vigil_core::types::EventStatus::Enriched);
    }
}
