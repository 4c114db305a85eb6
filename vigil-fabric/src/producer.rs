//! Batching event producer for capture-edge services.
//!
//! The inbox is a bounded channel: submission never blocks, a full buffer
//! drops the event and bumps the counter. The worker drains the inbox,
//! flushes on size or interval, and routes every event to its
//! `events.raw.<severity>.<source>` subject. The circuit breaker sheds
//! whole batches while the bus is down so capture loops stay hot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use vigil_core::{subjects, Event};

use crate::breaker::CircuitBreaker;
use crate::client::FabricClient;
use crate::is_retryable;

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Inbox capacity; submissions beyond this are dropped and counted.
    pub buffer_size: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ProducerConfig {
    fn default() -> ProducerConfig {
        ProducerConfig {
            buffer_size: 10_000,
            batch_size: 256,
            flush_interval: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

/// Returned by [`EventProducer::try_publish`] when the outbox is full; the
/// caller sheds load (sensor drops, ingest answers 503).
#[derive(Debug)]
pub struct PublishRejected;

#[derive(Debug, Clone, Default)]
pub struct ProducerMetrics {
    pub published: u64,
    pub batches: u64,
    pub dropped: u64,
    pub failures: u64,
    pub retries: u64,
}

#[derive(Default)]
struct MetricsInner {
    published: AtomicU64,
    batches: AtomicU64,
    dropped: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
}

#[derive(Clone)]
pub struct EventProducer {
    tx: mpsc::Sender<Event>,
    metrics: Arc<MetricsInner>,
}

impl EventProducer {
    /// Spawn the flush worker and return the producer handle. The worker
    /// performs a final flush when `shutdown` flips.
    pub fn start(
        client: FabricClient,
        cfg: ProducerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (EventProducer, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(cfg.buffer_size);
        let metrics = Arc::new(MetricsInner::default());
        let worker_metrics = Arc::clone(&metrics);
        let handle = tokio::spawn(run_worker(client, cfg, rx, shutdown, worker_metrics));
        (EventProducer { tx, metrics }, handle)
    }

    /// Producer without a flush worker: submissions land in the returned
    /// channel. For tests and tools that need the non-blocking seam
    /// without a live bus.
    pub fn detached(cfg: ProducerConfig) -> (EventProducer, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(cfg.buffer_size);
        let metrics = Arc::new(MetricsInner::default());
        (EventProducer { tx, metrics }, rx)
    }

    /// Non-blocking submission; a full outbox drops the event.
    pub fn try_publish(&self, event: Event) -> Result<(), PublishRejected> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(_) => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                Err(PublishRejected)
            }
        }
    }

    pub fn metrics(&self) -> ProducerMetrics {
        ProducerMetrics {
            published: self.metrics.published.load(Ordering::Relaxed),
            batches: self.metrics.batches.load(Ordering::Relaxed),
            dropped: self.metrics.dropped.load(Ordering::Relaxed),
            failures: self.metrics.failures.load(Ordering::Relaxed),
            retries: self.metrics.retries.load(Ordering::Relaxed),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.metrics.dropped.load(Ordering::Relaxed)
    }
}

async fn run_worker(
    client: FabricClient,
    cfg: ProducerConfig,
    mut rx: mpsc::Receiver<Event>,
    mut shutdown: watch::Receiver<bool>,
    metrics: Arc<MetricsInner>,
) {
    let breaker = CircuitBreaker::default();
    let mut buf: Vec<Event> = Vec::with_capacity(cfg.batch_size);
    let mut ticker = tokio::time::interval(cfg.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                // Drain whatever is already queued, then flush and exit.
                while let Ok(event) = rx.try_recv() {
                    buf.push(event);
                }
                flush(&client, &cfg, &breaker, &metrics, &mut buf).await;
                debug!("event producer stopped");
                return;
            }
            maybe = rx.recv() => {
                match maybe {
                    Some(event) => {
                        buf.push(event);
                        if buf.len() >= cfg.batch_size {
                            flush(&client, &cfg, &breaker, &metrics, &mut buf).await;
                        }
                    }
                    None => {
                        flush(&client, &cfg, &breaker, &metrics, &mut buf).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&client, &cfg, &breaker, &metrics, &mut buf).await;
            }
        }
    }
}

async fn flush(
    client: &FabricClient,
    cfg: &ProducerConfig,
    breaker: &CircuitBreaker,
    metrics: &Arc<MetricsInner>,
    buf: &mut Vec<Event>,
) {
    if buf.is_empty() {
        return;
    }
    if !breaker.allow_request() {
        metrics.failures.fetch_add(1, Ordering::Relaxed);
        metrics.dropped.fetch_add(buf.len() as u64, Ordering::Relaxed);
        warn!(dropped = buf.len(), "circuit open, shedding batch");
        buf.clear();
        return;
    }

    let batch: Vec<Event> = std::mem::take(buf);
    let size = batch.len();

    let mut attempt = 0;
    loop {
        attempt += 1;
        match publish_batch(client, &batch).await {
            Ok(()) => {
                breaker.record_success();
                metrics.published.fetch_add(size as u64, Ordering::Relaxed);
                metrics.batches.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(err) => {
                metrics.failures.fetch_add(1, Ordering::Relaxed);
                if attempt < cfg.max_attempts && is_retryable(&err) {
                    metrics.retries.fetch_add(1, Ordering::Relaxed);
                    let backoff = Duration::from_millis(200 * (1 << attempt.min(5)));
                    warn!(attempt, error = %err, "batch publish failed, backing off");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                breaker.record_failure();
                metrics.dropped.fetch_add(size as u64, Ordering::Relaxed);
                warn!(dropped = size, error = %err, "batch publish abandoned");
                return;
            }
        }
    }
}

async fn publish_batch(client: &FabricClient, batch: &[Event]) -> Result<(), String> {
    let mut acks = Vec::with_capacity(batch.len());
    for event in batch {
        let subject = subjects::raw_event(event.severity, &event.source);
        let payload = serde_json::to_vec(event).map_err(|e| e.to_string())?;
        let ack = client
            .publish_async(subject, payload.into())
            .await
            .map_err(|e| e.to_string())?;
        acks.push(ack);
    }
    for ack in acks {
        ack.await.map_err(|e| e.to_string())?;
    }
    Ok(())
}
