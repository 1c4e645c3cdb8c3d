//! Shared domain types for Waypoint.
//!
//! This crate contains the types shared by every layer of the orchestrator:
//! workflow definitions, durable workflow instances (checkpoints), tool
//! descriptors, the failure taxonomy, and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror, schemars.

pub mod config;
pub mod error;
pub mod instance;
pub mod outcome;
pub mod tool;
pub mod workflow;
