//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (waypoint-infra) implements. The core crate never depends on any specific
//! storage technology; `memory` provides process-local implementations used by
//! tests and embedders.

pub mod checkpoint;
pub mod memory;
pub mod output;
