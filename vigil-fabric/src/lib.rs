//! # Vigil Fabric — the stream backbone
//!
//! Wraps the JetStream client into the contract every service codes
//! against: per-subject ordered, persistent, at-least-once delivery with
//! durable work-queue consumer groups and explicit acknowledgement.
//! Producers on the capture edge go through [`EventProducer`], which sheds
//! load by dropping (and counting) instead of ever blocking a capture
//! loop; a circuit breaker keeps a dead bus from soaking up retries.

mod breaker;
mod client;
mod producer;

pub use breaker::CircuitBreaker;
pub use client::{FabricClient, FabricConfig};
pub use producer::{EventProducer, ProducerConfig, ProducerMetrics, PublishRejected};

use thiserror::Error;

pub type FabricResult<T> = Result<T, FabricError>;

#[derive(Error, Debug)]
pub enum FabricError {
    #[error("bus connect failed: {0}")]
    Connect(String),

    #[error("stream setup failed: {0}")]
    Stream(String),

    #[error("consumer setup failed: {0}")]
    Consumer(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("publish buffer full")]
    BufferFull,

    #[error("circuit breaker open")]
    CircuitOpen,

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors the publish path treats as transient and worth a retry.
pub(crate) fn is_retryable(err: &str) -> bool {
    const RETRYABLE: &[&str] = &[
        "connection refused",
        "connection closed",
        "timed out",
        "timeout",
        "no responders",
        "temporary",
    ];
    let lower = err.to_ascii_lowercase();
    RETRYABLE.iter().any(|p| lower.contains(p))
}
