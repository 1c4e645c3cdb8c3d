//! Durable workflow instance (checkpoint) types.
//!
//! A `WorkflowInstance` is the persisted record of one execution of a
//! workflow. It is small by construction: completed steps carry an opaque
//! [`OutputHandle`] rather than the output payload itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::outcome::FailureKind;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    InProgress,
    Completed,
    Failed,
}

impl InstanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::InProgress => "in_progress",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Failed => "failed",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(InstanceStatus::InProgress),
            "completed" => Some(InstanceStatus::Completed),
            "failed" => Some(InstanceStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Step records
// ---------------------------------------------------------------------------

/// Opaque reference to a persisted step output (a path, a blob key, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputHandle(pub String);

impl OutputHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OutputHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A step that finished successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedStep {
    pub index: usize,
    pub name: String,
    pub completed_at: DateTime<Utc>,
    pub output: OutputHandle,
}

/// The step at which an instance failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedStep {
    pub index: usize,
    pub name: String,
    pub kind: FailureKind,
    pub error: String,
}

// ---------------------------------------------------------------------------
// WorkflowInstance
// ---------------------------------------------------------------------------

/// Durable record of one workflow execution.
///
/// Invariants maintained by every checkpoint store:
/// - while `in_progress`, `current_step == completed_steps.len()`;
/// - completed step indices are contiguous from 0;
/// - no step is appended once the status leaves `in_progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub workflow_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: InstanceStatus,
    pub total_steps: usize,
    pub current_step: usize,
    #[serde(default)]
    pub completed_steps: Vec<CompletedStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<FailedStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Parameters supplied at start, available to bindings as `params.*`.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Set by an operator cancel; honored at the next step boundary.
    #[serde(default)]
    pub cancel_requested: bool,
}

impl WorkflowInstance {
    /// Build a fresh in-progress instance.
    pub fn new(workflow_name: &str, total_steps: usize, params: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            workflow_name: workflow_name.to_string(),
            created_at: now,
            updated_at: now,
            status: InstanceStatus::InProgress,
            total_steps,
            current_step: 0,
            completed_steps: Vec::new(),
            failed_step: None,
            error: None,
            params,
            cancel_requested: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == InstanceStatus::InProgress
    }

    /// Completed fraction in `[0.0, 1.0]`.
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 1.0;
        }
        self.completed_steps.len() as f64 / self.total_steps as f64
    }

    /// Index of the last successfully completed step, if any.
    pub fn last_completed_index(&self) -> Option<usize> {
        self.completed_steps.last().map(|s| s.index)
    }

    /// Find the completed record for a step name.
    pub fn completed(&self, name: &str) -> Option<&CompletedStep> {
        self.completed_steps.iter().find(|s| s.name == name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
