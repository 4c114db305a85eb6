//! # Vigil Correlate — rule evaluation over the event stream
//!
//! Rules are textual conditions compiled once at load into evaluable
//! programs; the hot path never interprets source text. The compiled set
//! sits behind an atomically swapped snapshot so reload never blocks
//! evaluation. Stateful rules additionally gate on a sliding-window
//! counter in the shared cache.

pub mod config;
pub mod engine;
pub mod rules;
pub mod worker;
