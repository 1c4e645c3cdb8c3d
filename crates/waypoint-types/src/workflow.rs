//! Workflow definition types.
//!
//! A `WorkflowDefinition` is the immutable, declared shape of a workflow: a
//! name and an ordered list of steps. It is loaded once per run and never
//! mutated. Execution progress lives in [`crate::instance::WorkflowInstance`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::tool::CostClass;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// The declared shape of a workflow.
///
/// Steps execute strictly in declaration order; later steps may bind to the
/// outputs of earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowDefinition {
    /// Workflow name. At most one instance per name may be in progress.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered steps.
    pub steps: Vec<StepSpec>,
}

impl WorkflowDefinition {
    /// Find a step by name, returning its index and spec.
    pub fn step(&self, name: &str) -> Option<(usize, &StepSpec)> {
        self.steps.iter().enumerate().find(|(_, s)| s.name == name)
    }
}

// ---------------------------------------------------------------------------
// Step Spec
// ---------------------------------------------------------------------------

/// A single declared step.
///
/// `input` is a JSON template: literal values pass through unchanged, while
/// strings containing `{{ steps.<name>.output.<path> }}` or
/// `{{ params.<path> }}` expressions are bound at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepSpec {
    /// Step name, unique within the workflow.
    pub name: String,
    /// Name of the registered tool this step invokes.
    pub tool: String,
    /// Input binding template.
    #[serde(default = "empty_object")]
    pub input: serde_json::Value,
    /// Alternate tool with the same output contract, tried once after the
    /// primary tool's retries are exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    /// Step-level idempotency override. Can only lower the tool's declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotent: Option<bool>,
    /// Step-level cost class override. Can only raise the tool's declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_class: Option<CostClass>,
    /// Per-invocation timeout in seconds (defaults to the configured value).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
