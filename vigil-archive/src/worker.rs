//! The archival consume loop.
//!
//! Messages are held unacked in the batch until their flush succeeds. A
//! failed insert keeps the batch for retry with backoff; the fabric's
//! in-flight limit stops delivering more, which is the backpressure.

use std::time::Duration;

use async_nats::jetstream::Message;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use vigil_core::subjects;
use vigil_core::types::Event;
use vigil_fabric::FabricClient;

use crate::sink::ArchiveSink;

/// Upper bound on insert retry backoff.
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

pub async fn run(
    client: FabricClient,
    sink: ArchiveSink,
    batch_size: usize,
    flush_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), vigil_fabric::FabricError> {
    let mut messages = client
        .queue_subscribe(
            subjects::STREAM_EVENTS,
            subjects::EVENTS_ENRICHED,
            subjects::CONSUMER_ARCHIVAL,
        )
        .await?;
    info!(batch_size, "archival sink consuming {}", subjects::EVENTS_ENRICHED);

    let mut batch: Vec<(Event, Message)> = Vec::with_capacity(batch_size);
    let mut failures: u32 = 0;
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                // Final flush; whatever cannot land now redelivers later.
                flush(&sink, &mut batch, &mut failures).await;
                info!("archival sink stopping");
                return Ok(());
            }
            _ = ticker.tick() => {
                flush(&sink, &mut batch, &mut failures).await;
                if failures > 0 {
                    let backoff = retry_backoff(failures);
                    warn!(failures, backoff_secs = backoff.as_secs(), "insert failing, backing off");
                    tokio::time::sleep(backoff).await;
                }
            }
            maybe = messages.next() => {
                let Some(result) = maybe else {
                    flush(&sink, &mut batch, &mut failures).await;
                    warn!("archival consumer stream ended");
                    return Ok(());
                };
                let msg = match result {
                    Ok(msg) => msg,
                    Err(err) => {
                        warn!(error = %err, "consumer pull error");
                        continue;
                    }
                };
                match serde_json::from_slice::<Event>(&msg.payload) {
                    Ok(evt) => {
                        batch.push((evt, msg));
                        if batch.len() >= batch_size {
                            flush(&sink, &mut batch, &mut failures).await;
                        }
                    }
                    Err(err) => {
                        debug!(error = %err, "undecodable event payload");
                        let _ = msg.ack().await;
                    }
                }
            }
        }
    }
}

/// Insert the batch; acks release only on success. On failure the batch
/// and its unacked messages are retained for the next attempt.
async fn flush(sink: &ArchiveSink, batch: &mut Vec<(Event, Message)>, failures: &mut u32) {
    if batch.is_empty() {
        return;
    }

    let events: Vec<Event> = batch.iter().map(|(evt, _)| evt.clone()).collect();
    match sink.insert(&events).await {
        Ok(()) => {
            *failures = 0;
            for (_, msg) in batch.drain(..) {
                if let Err(err) = msg.ack().await {
                    warn!(error = %err, "ack failed after flush");
                }
            }
        }
        Err(err) => {
            *failures += 1;
            warn!(error = %err, held = batch.len(), "archive insert failed, batch retained");
        }
    }
}

pub(crate) fn retry_backoff(failures: u32) -> Duration {
    let secs = 1u64 << failures.min(5);
    Duration::from_secs(secs).min(MAX_RETRY_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(retry_backoff(1), Duration::from_secs(2));
        assert_eq!(retry_backoff(3), Duration::from_secs(8));
        assert_eq!(retry_backoff(10), MAX_RETRY_BACKOFF);
    }
}
