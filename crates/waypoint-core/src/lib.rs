//! Orchestration core for Waypoint.
//!
//! Contains the tool registry, the step executor with its retry and fallback
//! policy, the checkpoint and output storage traits (with in-memory
//! implementations), and the workflow runner and resume controller that drive
//! them. Infrastructure adapters live in `waypoint-infra`.

pub mod repository;
pub mod tool;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
