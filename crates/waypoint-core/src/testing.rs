//! Test doubles shared by the executor, runner and resume tests.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;
use waypoint_types::config::RetryPolicy;
use waypoint_types::outcome::FailureKind;
use waypoint_types::tool::{CostClass, ToolDescriptor};
use waypoint_types::workflow::WorkflowDefinition;

use crate::repository::memory::{MemoryCheckpointStore, MemoryOutputStore};
use crate::tool::invoker::{ToolCall, ToolError, ToolInvoker};
use crate::tool::registry::ToolRegistry;
use crate::workflow::checkpoint::CheckpointManager;
use crate::workflow::definition::parse_workflow_yaml;
use crate::workflow::executor::StepExecutor;
use crate::workflow::runner::WorkflowRunner;

#[derive(Debug, Clone)]
enum Scripted {
    Reply(Result<Value, ToolError>),
    /// Never completes; used to simulate a hung tool or a crash mid-step.
    Hang,
}

#[derive(Debug, Default)]
struct ToolScript {
    queue: VecDeque<Scripted>,
    fallback: Option<Scripted>,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub tool: String,
    pub input: Value,
    pub instance_id: Uuid,
    pub step_index: usize,
    pub idempotency_key: String,
}

/// Replies from per-tool queues, then from a per-tool default.
#[derive(Debug, Default)]
pub struct ScriptedInvoker {
    scripts: Mutex<HashMap<String, ToolScript>>,
    log: Mutex<Vec<RecordedCall>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one reply for `tool`.
    pub fn push(&self, tool: &str, reply: Result<Value, ToolError>) {
        self.script(tool, |s| s.queue.push_back(Scripted::Reply(reply)));
    }

    /// Queue a call that never answers.
    pub fn push_hang(&self, tool: &str) {
        self.script(tool, |s| s.queue.push_back(Scripted::Hang));
    }

    /// Reply used once the queue for `tool` is empty.
    pub fn always(&self, tool: &str, reply: Result<Value, ToolError>) {
        self.script(tool, |s| s.fallback = Some(Scripted::Reply(reply)));
    }

    /// Every call to `tool` hangs.
    pub fn hang(&self, tool: &str) {
        self.script(tool, |s| s.fallback = Some(Scripted::Hang));
    }

    fn script(&self, tool: &str, f: impl FnOnce(&mut ToolScript)) {
        let mut scripts = self.scripts.lock().unwrap();
        f(scripts.entry(tool.to_string()).or_default());
    }

    pub fn calls(&self, tool: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|c| c.tool == tool).count()
    }

    pub fn calls_for_step(&self, step_index: usize) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.step_index == step_index)
            .count()
    }

    pub fn keys(&self, tool: &str) -> Vec<String> {
        self.recorded(tool).into_iter().map(|c| c.idempotency_key).collect()
    }

    pub fn recorded(&self, tool: &str) -> Vec<RecordedCall> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.tool == tool)
            .cloned()
            .collect()
    }
}

impl ToolInvoker for ScriptedInvoker {
    fn invoke(&self, call: ToolCall<'_>) -> impl Future<Output = Result<Value, ToolError>> + Send {
        let tool = call.descriptor.name.clone();
        self.log.lock().unwrap().push(RecordedCall {
            tool: tool.clone(),
            input: call.input.clone(),
            instance_id: call.instance_id,
            step_index: call.step_index,
            idempotency_key: call.idempotency_key.to_string(),
        });

        let next = {
            let mut scripts = self.scripts.lock().unwrap();
            scripts
                .get_mut(&tool)
                .and_then(|s| s.queue.pop_front().or_else(|| s.fallback.clone()))
        };

        async move {
            match next {
                Some(Scripted::Reply(reply)) => reply,
                Some(Scripted::Hang) => std::future::pending().await,
                None => Err(ToolError::new(
                    FailureKind::Unclassified,
                    format!("no scripted reply for '{tool}'"),
                )),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub type TestRunner =
    WorkflowRunner<Arc<MemoryCheckpointStore>, Arc<MemoryOutputStore>, Arc<ScriptedInvoker>>;

pub const DIGEST_YAML: &str = r#"
name: fetch-and-summarize
steps:
  - name: search
    tool: search
    input:
      query: "{{ params.target }}"
  - name: fetch
    tool: fetch_page
    fallback: fetch_page_lite
    input:
      url: "{{ steps.search.output.results.0.url }}"
  - name: summarize
    tool: summarize
    input:
      text: "{{ steps.fetch.output.content }}"
      title: "Summary of {{ params.target }}"
"#;

pub fn digest_definition() -> WorkflowDefinition {
    parse_workflow_yaml(DIGEST_YAML).unwrap()
}

/// The digest workflow with the `fetch` step's fallback removed.
pub fn digest_definition_without_fallback() -> WorkflowDefinition {
    let mut def = digest_definition();
    def.steps[1].fallback = None;
    def
}

pub fn digest_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(ToolDescriptor::new("search").with_idempotent(true))
        .unwrap();
    registry
        .register(ToolDescriptor::new("fetch_page").with_idempotent(true))
        .unwrap();
    registry
        .register(ToolDescriptor::new("fetch_page_lite").with_idempotent(true))
        .unwrap();
    registry
        .register(
            ToolDescriptor::new("summarize")
                .with_cost_class(CostClass::Paid)
                .with_required_env(&["SUMMARY_API_KEY"]),
        )
        .unwrap();
    registry
}

/// Runner over in-memory stores with every environment variable "set".
pub fn test_runner(
    registry: ToolRegistry,
    store: Arc<MemoryCheckpointStore>,
    outputs: Arc<MemoryOutputStore>,
    invoker: Arc<ScriptedInvoker>,
) -> TestRunner {
    let executor = StepExecutor::new(invoker, RetryPolicy::default(), Duration::from_secs(300))
        .with_env(Arc::new(|_| Some("set".to_string())));
    WorkflowRunner::new(
        Arc::new(registry),
        CheckpointManager::new(store, outputs),
        executor,
    )
}
