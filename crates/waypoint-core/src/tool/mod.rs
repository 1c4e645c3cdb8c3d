//! Declared external operations.
//!
//! - `registry` -- descriptor table, lookup, environment checks
//! - `schema` -- JSON Schema validation of tool inputs and outputs
//! - `invoker` -- the transport trait implemented by infra adapters

pub mod invoker;
pub mod registry;
pub mod schema;
