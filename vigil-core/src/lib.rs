//! # Vigil Core — canonical data model and shared plumbing
//!
//! Every service in the Vigil pipeline links against this crate. It defines
//! the canonical `Event`/`Alert`/`Rule`/`Playbook` records that travel the
//! bus, the subject hierarchy they travel on, and the small utilities
//! (ids, timestamps, env config) that keep the services consistent.

pub mod config;
pub mod error;
pub mod ids;
pub mod net;
pub mod subjects;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use ids::{generate_id, now_utc_ms};
pub use types::{Alert, AlertStatus, Event, EventStatus, HostInfo, Playbook, PlaybookStep, Rule, Severity};

/// Default grace period services allow in-flight work on shutdown.
pub const SHUTDOWN_GRACE_SECS: u64 = 5;
