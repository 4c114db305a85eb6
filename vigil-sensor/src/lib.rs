//! # Vigil Sensor — packet inspector and threat detector
//!
//! Captures frames from one or more interfaces, decodes
//! ethernet → IP → transport → payload in a single pass, applies deep
//! packet inspection to recognized application protocols, and runs the
//! stateful threat trackers. Inspection happens on a bounded worker pool;
//! every hand-off on the capture path is non-blocking with drop-on-full so
//! the capture loops never stall.

pub mod capture;
pub mod config;
pub mod decode;
pub mod detect;
pub mod dpi;
pub mod event;
pub mod inspector;

#[cfg(target_os = "linux")]
pub mod afpacket;
