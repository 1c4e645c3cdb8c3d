//! Observability setup shared by Waypoint binaries.

pub mod tracing_setup;
