//! # Vigil Agent — endpoint telemetry and response
//!
//! Runs on every monitored host: opens a mutually-authenticated bus
//! connection, launches the platform collector set, heartbeats host
//! telemetry, and executes orchestrator commands received on
//! `commands.<agent_id>`. Command effects are idempotent — redelivered
//! or repeated commands are safe.

pub mod collectors;
pub mod commands;
pub mod config;
