//! # Vigil Archive — the analytical sink
//!
//! Consumes `events.enriched.>`, buffers up to a batch size or age, and
//! bulk-inserts into ClickHouse MergeTree tables. Acknowledgement is
//! withheld until a batch lands: a failed insert keeps the batch and its
//! unacked messages, so backpressure flows up the consumer naturally.

pub mod config;
pub mod schema;
pub mod sink;
pub mod worker;
