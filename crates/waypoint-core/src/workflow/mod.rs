//! Workflow engine core: definitions, binding, execution, and durable
//! checkpointing.
//!
//! - `definition` -- YAML parsing, validation, discovery, catalog
//! - `binding` -- `{{ params.* }}` / `{{ steps.*.output }}` input binding
//! - `retry` -- exponential backoff with jitter
//! - `executor` -- one step: timeout, retries, fallback, idempotency rule
//! - `checkpoint` -- write-before-advance over the record and output stores
//! - `runner` -- the sequential per-instance state machine
//! - `resume` -- crash recovery and explicit reopen of failed instances

pub mod binding;
pub mod checkpoint;
pub mod definition;
pub mod executor;
pub mod resume;
pub mod retry;
pub mod runner;
