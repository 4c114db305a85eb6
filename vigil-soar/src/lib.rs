//! # Vigil SOAR — automated response orchestration
//!
//! Consumes alerts, matches them against loaded playbooks, and executes
//! each matching playbook's steps in order. Playbooks triggered by the
//! same alert run in parallel; steps within one playbook are serial, and
//! a step failure stops only its own playbook. The action registry is the
//! sole extension point.

pub mod actions;
pub mod config;
pub mod engine;
pub mod playbooks;
pub mod worker;
