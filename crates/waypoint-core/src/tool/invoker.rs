//! Transport trait for reaching a tool.
//!
//! The executor owns retry, fallback and timeout policy; an invoker performs
//! exactly one call and reports what happened. Infra provides process and HTTP
//! invokers; tests supply scripted ones.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;
use waypoint_types::outcome::FailureKind;
use waypoint_types::tool::ToolDescriptor;

/// Everything an invoker needs to perform one call.
#[derive(Debug, Clone, Copy)]
pub struct ToolCall<'a> {
    pub descriptor: &'a ToolDescriptor,
    pub input: &'a Value,
    pub instance_id: Uuid,
    pub step_index: usize,
    /// Stable across retries of the same step: sha256 of
    /// `instance_id:step_index:tool`, hex-encoded.
    pub idempotency_key: &'a str,
    /// Upper bound the executor will enforce. Invokers may pass it on to the
    /// transport (HTTP client timeout, etc.).
    pub timeout: Duration,
}

/// A single failed call, classified by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: FailureKind,
    pub message: String,
    /// The tool reports that part of its effect already happened.
    pub side_effect_committed: bool,
}

impl ToolError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            side_effect_committed: false,
        }
    }

    pub fn with_side_effect(mut self) -> Self {
        self.side_effect_committed = true;
        self
    }
}

/// Performs one invocation of a tool.
///
/// Uses native async fn in traits (Rust 2024 edition, RPITIT).
pub trait ToolInvoker: Send + Sync {
    fn invoke(&self, call: ToolCall<'_>) -> impl Future<Output = Result<Value, ToolError>> + Send;
}

impl<T: ToolInvoker> ToolInvoker for std::sync::Arc<T> {
    fn invoke(&self, call: ToolCall<'_>) -> impl Future<Output = Result<Value, ToolError>> + Send {
        (**self).invoke(call)
    }
}
