//! # Vigil Ingest — HTTP and syslog entry into the pipeline
//!
//! Accepts agent/device payloads, normalizes them into the canonical
//! event, and hands them to the fabric's async publish path. Shedding is
//! explicit: a full publish buffer answers 503 so producers back off.

pub mod config;
pub mod http;
pub mod normalize;
pub mod syslog;

use vigil_core::Event;
use vigil_fabric::{EventProducer, FabricClient, PublishRejected};

/// Publishing seam for the gateway; the production impl wraps the fabric
/// producer, tests substitute a stub.
pub trait EventPublisher: Send + Sync + 'static {
    fn try_publish(&self, event: Event) -> Result<(), PublishRejected>;
    fn healthy(&self) -> bool;
}

pub struct FabricPublisher {
    pub producer: EventProducer,
    pub client: FabricClient,
}

impl EventPublisher for FabricPublisher {
    fn try_publish(&self, event: Event) -> Result<(), PublishRejected> {
        self.producer.try_publish(event)
    }

    fn healthy(&self) -> bool {
        self.client.is_connected()
    }
}
