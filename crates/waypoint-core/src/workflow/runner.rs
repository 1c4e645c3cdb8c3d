//! Workflow runner: drives one instance from its current step to a terminal
//! state.
//!
//! The control loop is strictly sequential and writes before it advances:
//!
//! ```text
//! Idle --start--> Running(0) --Success--> persist --> Running(k+1) ...
//!                      |                                   |
//!                      +--Retryable/Fatal--> persist --> Failed
//!                                       last step ok --> Completed
//! ```
//!
//! Cancellation is honored at step boundaries only: an in-process
//! [`CancellationToken`] or a persisted `cancel_requested` flag (set by a
//! cancel from another process) stops the loop before the next step starts.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use waypoint_types::error::CheckpointError;
use waypoint_types::instance::{InstanceStatus, WorkflowInstance};
use waypoint_types::outcome::{FailureKind, FailureReason, Outcome};
use waypoint_types::workflow::{StepSpec, WorkflowDefinition};

use super::binding::{self, bind_inputs};
use super::checkpoint::{CheckpointManager, PersistError};
use super::definition::{WorkflowError, validate_definition};
use super::executor::{Execution, StepExecutor, StepInvocation};
use crate::repository::checkpoint::CheckpointRepository;
use crate::repository::output::OutputStore;
use crate::tool::invoker::ToolInvoker;
use crate::tool::registry::{RegistryError, ToolRegistry};

// ---------------------------------------------------------------------------
// Errors / results
// ---------------------------------------------------------------------------

/// Reasons the runner refuses to drive, or stops driving, an instance.
///
/// Step failures are not errors: they end the instance as `failed` and are
/// returned inside a [`RunReport`].
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Definition(#[from] WorkflowError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("instance {instance_id} belongs to workflow '{recorded}', not '{given}'")]
    WorkflowMismatch {
        instance_id: Uuid,
        recorded: String,
        given: String,
    },

    #[error(
        "workflow '{workflow}' now has {current} steps but instance {instance_id} was started with {recorded}"
    )]
    DefinitionChanged {
        instance_id: Uuid,
        workflow: String,
        recorded: usize,
        current: usize,
    },

    #[error("instance {0} is {1}")]
    NotRunnable(Uuid, InstanceStatus),
}

impl RunnerError {
    /// The checkpoint error at the root of this failure, if any.
    pub fn checkpoint(&self) -> Option<&CheckpointError> {
        match self {
            RunnerError::Persist(PersistError::Checkpoint(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<CheckpointError> for RunnerError {
    fn from(e: CheckpointError) -> Self {
        RunnerError::Persist(PersistError::Checkpoint(e))
    }
}

/// Final state of a driven instance.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub instance: WorkflowInstance,
    /// Steps executed by this call (excludes steps completed earlier).
    pub steps_executed: usize,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.instance.status == InstanceStatus::Completed
    }
}

/// Progress callbacks for operator surfaces. All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn instance_started(&self, _instance: &WorkflowInstance) {}
    fn step_started(&self, _index: usize, _step: &StepSpec) {}
    fn step_finished(&self, _index: usize, _step: &StepSpec, _execution: &Execution) {}
    fn instance_finished(&self, _instance: &WorkflowInstance) {}
}

// ---------------------------------------------------------------------------
// WorkflowRunner
// ---------------------------------------------------------------------------

pub struct WorkflowRunner<R, O, I>
where
    R: CheckpointRepository,
    O: OutputStore,
    I: ToolInvoker,
{
    registry: Arc<ToolRegistry>,
    checkpoints: CheckpointManager<R, O>,
    executor: StepExecutor<I>,
    cancellations: DashMap<Uuid, CancellationToken>,
    observer: Option<Arc<dyn RunObserver>>,
}

impl<R, O, I> WorkflowRunner<R, O, I>
where
    R: CheckpointRepository,
    O: OutputStore,
    I: ToolInvoker,
{
    pub fn new(
        registry: Arc<ToolRegistry>,
        checkpoints: CheckpointManager<R, O>,
        executor: StepExecutor<I>,
    ) -> Self {
        Self {
            registry,
            checkpoints,
            executor,
            cancellations: DashMap::new(),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn checkpoints(&self) -> &CheckpointManager<R, O> {
        &self.checkpoints
    }

    /// Create a new instance of `def` and drive it to a terminal state.
    ///
    /// Unknown tools and missing environment variables are rejected before
    /// the instance record is created.
    pub async fn start(&self, def: &WorkflowDefinition, params: Value) -> Result<RunReport, RunnerError> {
        validate_definition(def)?;
        self.preflight(def)?;

        let instance = self
            .checkpoints
            .begin(&def.name, def.steps.len(), params)
            .await?;
        self.drive(def, instance).await
    }

    /// Drive an existing in-progress instance from its `current_step`.
    pub async fn continue_instance(
        &self,
        def: &WorkflowDefinition,
        instance_id: Uuid,
    ) -> Result<RunReport, RunnerError> {
        let instance = self.checkpoints.repo().load(instance_id).await?;
        self.check_compatible(def, &instance)?;
        if !instance.is_active() {
            return Err(RunnerError::NotRunnable(instance.id, instance.status));
        }
        self.registry.ensure_workflow(def)?;

        tracing::info!(
            instance_id = %instance.id,
            workflow = %def.name,
            from_step = instance.current_step,
            "continuing instance"
        );
        self.drive(def, instance).await
    }

    /// Request cancellation. Takes effect at the next step boundary of
    /// whichever process is driving the instance.
    pub async fn cancel(&self, instance_id: Uuid) -> Result<WorkflowInstance, RunnerError> {
        let instance = self.checkpoints.repo().request_cancel(instance_id).await?;
        if let Some(token) = self.cancellations.get(&instance_id) {
            token.cancel();
        }
        tracing::info!(instance_id = %instance_id, "cancellation requested");
        Ok(instance)
    }

    /// Fail an in-progress instance as cancelled right away. Only safe when
    /// no process is driving it, e.g. an instance orphaned by a crash.
    pub async fn cancel_now(
        &self,
        def: &WorkflowDefinition,
        instance_id: Uuid,
    ) -> Result<WorkflowInstance, RunnerError> {
        let instance = self.checkpoints.repo().load(instance_id).await?;
        self.check_compatible(def, &instance)?;
        if !instance.is_active() {
            return Err(CheckpointError::NotActive(instance_id).into());
        }
        // Every step recorded but the run died before marking completion.
        let Some(step) = def.steps.get(instance.current_step) else {
            let instance = self.checkpoints.checkpoint_completed(instance_id).await?;
            tracing::info!(instance_id = %instance_id, "all steps recorded; instance completed instead of cancelled");
            return Ok(instance);
        };
        let instance = self
            .checkpoints
            .checkpoint_step_failed(
                instance_id,
                instance.current_step,
                &step.name,
                &FailureReason::new(FailureKind::Cancelled, "cancelled by operator"),
            )
            .await?;
        tracing::info!(instance_id = %instance_id, "instance cancelled");
        Ok(instance)
    }

    pub(crate) fn check_compatible(
        &self,
        def: &WorkflowDefinition,
        instance: &WorkflowInstance,
    ) -> Result<(), RunnerError> {
        if instance.workflow_name != def.name {
            return Err(RunnerError::WorkflowMismatch {
                instance_id: instance.id,
                recorded: instance.workflow_name.clone(),
                given: def.name.clone(),
            });
        }
        if instance.total_steps != def.steps.len() {
            return Err(RunnerError::DefinitionChanged {
                instance_id: instance.id,
                workflow: def.name.clone(),
                recorded: instance.total_steps,
                current: def.steps.len(),
            });
        }
        Ok(())
    }

    fn preflight(&self, def: &WorkflowDefinition) -> Result<(), RunnerError> {
        self.registry.ensure_workflow(def)?;
        let env = self.executor.env();
        for step in &def.steps {
            let descriptor = self.registry.resolve(&step.tool)?;
            self.registry.validate_environment_with(descriptor, &**env)?;
        }
        Ok(())
    }

    async fn drive(&self, def: &WorkflowDefinition, instance: WorkflowInstance) -> Result<RunReport, RunnerError> {
        let id = instance.id;
        let token = CancellationToken::new();
        self.cancellations.insert(id, token.clone());
        let result = self.drive_loop(def, instance, &token).await;
        self.cancellations.remove(&id);
        result
    }

    async fn drive_loop(
        &self,
        def: &WorkflowDefinition,
        mut instance: WorkflowInstance,
        token: &CancellationToken,
    ) -> Result<RunReport, RunnerError> {
        let id = instance.id;
        let mut steps_executed = 0;
        if let Some(observer) = &self.observer {
            observer.instance_started(&instance);
        }

        while instance.is_active() && instance.current_step < def.steps.len() {
            let index = instance.current_step;
            let step = &def.steps[index];

            if self.cancel_requested(id, token).await? {
                tracing::info!(instance_id = %id, step = %step.name, "cancelled at step boundary");
                instance = self
                    .checkpoints
                    .checkpoint_step_failed(
                        id,
                        index,
                        &step.name,
                        &FailureReason::new(FailureKind::Cancelled, "cancelled by operator"),
                    )
                    .await?;
                break;
            }

            if let Some(observer) = &self.observer {
                observer.step_started(index, step);
            }
            let execution = self.execute_step(&instance, index, step).await?;
            steps_executed += 1;
            if let Some(observer) = &self.observer {
                observer.step_finished(index, step, &execution);
            }

            instance = match execution.outcome {
                Outcome::Success { output, tool } => {
                    if tool != step.tool {
                        tracing::warn!(instance_id = %id, step = %step.name, tool = %tool, "step completed by fallback tool");
                    }
                    let instance = self
                        .checkpoints
                        .checkpoint_step_complete(id, index, &step.name, &output)
                        .await?;
                    tracing::info!(
                        instance_id = %id,
                        step = %step.name,
                        progress = format!("{}/{}", instance.current_step, instance.total_steps),
                        "step completed"
                    );
                    instance
                }
                Outcome::RetryableFailure(reason) | Outcome::FatalFailure(reason) => {
                    tracing::warn!(
                        instance_id = %id,
                        step = %step.name,
                        kind = %reason.kind,
                        error = %reason.message,
                        "step failed, instance failed"
                    );
                    self.checkpoints
                        .checkpoint_step_failed(id, index, &step.name, &reason)
                        .await?
                }
            };
        }

        if instance.is_active() && instance.current_step == instance.total_steps {
            instance = self.checkpoints.checkpoint_completed(id).await?;
        }
        if let Some(observer) = &self.observer {
            observer.instance_finished(&instance);
        }

        Ok(RunReport {
            instance,
            steps_executed,
        })
    }

    async fn cancel_requested(&self, id: Uuid, token: &CancellationToken) -> Result<bool, RunnerError> {
        if token.is_cancelled() {
            return Ok(true);
        }
        Ok(self.checkpoints.repo().load(id).await?.cancel_requested)
    }

    /// Resolve tools, bind inputs from persisted outputs, and execute.
    async fn execute_step(
        &self,
        instance: &WorkflowInstance,
        index: usize,
        step: &StepSpec,
    ) -> Result<Execution, RunnerError> {
        let primary = match self.registry.resolve(&step.tool) {
            Ok(d) => d,
            Err(e) => return Ok(fatal(FailureKind::UnknownTool, e.to_string())),
        };
        let fallback = match step.fallback.as_deref().map(|f| self.registry.resolve(f)) {
            None => None,
            Some(Ok(d)) => Some(d),
            Some(Err(e)) => return Ok(fatal(FailureKind::UnknownTool, e.to_string())),
        };

        let referenced = match binding::referenced_steps(&step.input) {
            Ok(r) => r,
            Err(e) => return Ok(fatal(FailureKind::InvalidInput, format!("binding failed: {e}"))),
        };
        let ctx = self.checkpoints.binding_context(instance, &referenced).await?;
        let input = match bind_inputs(&step.input, &ctx) {
            Ok(v) => v,
            Err(e) => return Ok(fatal(FailureKind::InvalidInput, format!("binding failed: {e}"))),
        };
        tracing::debug!(instance_id = %instance.id, step = %step.name, "inputs bound");

        Ok(self
            .executor
            .execute_step(StepInvocation {
                instance_id: instance.id,
                step_index: index,
                step,
                primary,
                fallback,
                input: &input,
            })
            .await)
    }
}

fn fatal(kind: FailureKind, message: String) -> Execution {
    Execution {
        outcome: Outcome::FatalFailure(FailureReason::new(kind, message)),
        attempts: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::{MemoryCheckpointStore, MemoryOutputStore};
    use crate::testing::{ScriptedInvoker, TestRunner, digest_definition, digest_registry, test_runner};
    use crate::tool::invoker::ToolError;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use waypoint_types::instance::{CompletedStep, OutputHandle};
    use waypoint_types::tool::ToolDescriptor;

    struct Harness {
        store: Arc<MemoryCheckpointStore>,
        outputs: Arc<MemoryOutputStore>,
        invoker: Arc<ScriptedInvoker>,
        runner: TestRunner,
    }

    fn harness() -> Harness {
        harness_with(digest_registry())
    }

    fn harness_with(registry: ToolRegistry) -> Harness {
        let store = Arc::new(MemoryCheckpointStore::new());
        let outputs = Arc::new(MemoryOutputStore::new());
        let invoker = Arc::new(ScriptedInvoker::new());
        let runner = test_runner(registry, store.clone(), outputs.clone(), invoker.clone());
        Harness {
            store,
            outputs,
            invoker,
            runner,
        }
    }

    fn script_happy_path(invoker: &ScriptedInvoker) {
        invoker.always(
            "search",
            Ok(json!({"results": [{"url": "https://acme.test/about"}]})),
        );
        invoker.always("fetch_page", Ok(json!({"content": "Acme builds rockets."})));
        invoker.always("summarize", Ok(json!({"summary": "Rockets."})));
    }

    #[tokio::test]
    async fn test_fetch_and_summarize_completes() {
        let h = harness();
        script_happy_path(&h.invoker);

        let report = h
            .runner
            .start(&digest_definition(), json!({"target": "acme"}))
            .await
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.steps_executed, 3);
        assert_eq!(report.instance.current_step, 3);
        let recorded: Vec<(usize, &str)> = report
            .instance
            .completed_steps
            .iter()
            .map(|s| (s.index, s.name.as_str()))
            .collect();
        assert_eq!(recorded, vec![(0, "search"), (1, "fetch"), (2, "summarize")]);

        let search = h.invoker.recorded("search");
        assert_eq!(search[0].input, json!({"query": "acme"}));
        let fetch = h.invoker.recorded("fetch_page");
        assert_eq!(fetch[0].input, json!({"url": "https://acme.test/about"}));
        let summarize = h.invoker.recorded("summarize");
        assert_eq!(
            summarize[0].input,
            json!({"text": "Acme builds rockets.", "title": "Summary of acme"})
        );

        let last = &report.instance.completed_steps[2];
        assert_eq!(h.outputs.get(&last.output).await.unwrap(), json!({"summary": "Rockets."}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_output_feeds_next_step() {
        let h = harness();
        script_happy_path(&h.invoker);
        h.invoker.always(
            "fetch_page",
            Err(ToolError::new(FailureKind::TransientNetwork, "connection reset")),
        );
        h.invoker
            .always("fetch_page_lite", Ok(json!({"content": "Lite text."})));

        let report = h
            .runner
            .start(&digest_definition(), json!({"target": "acme"}))
            .await
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(h.invoker.calls("fetch_page"), 3);
        assert_eq!(h.invoker.calls("fetch_page_lite"), 1);
        assert_eq!(
            h.invoker.recorded("summarize")[0].input["text"],
            json!("Lite text.")
        );
    }

    #[tokio::test]
    async fn test_second_start_conflicts_without_creating_record() {
        let h = harness();
        let active = h
            .store
            .start("fetch-and-summarize", 3, json!({}))
            .await
            .unwrap();

        let err = h
            .runner
            .start(&digest_definition(), json!({"target": "acme"}))
            .await
            .unwrap_err();

        assert!(matches!(
            err.checkpoint(),
            Some(CheckpointError::AlreadyActive { instance_id, .. }) if *instance_id == active
        ));
        assert_eq!(h.store.len(), 1);
        assert_eq!(h.invoker.calls("search"), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_refuses_start() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolDescriptor::new("search")).unwrap();
        let h = harness_with(registry);

        let err = h
            .runner
            .start(&digest_definition(), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Registry(RegistryError::UnknownStepTool { .. })));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_env_refuses_start() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let invoker = Arc::new(ScriptedInvoker::new());
        let executor = StepExecutor::new(
            invoker.clone(),
            waypoint_types::config::RetryPolicy::default(),
            Duration::from_secs(5),
        )
        .with_env(Arc::new(|_| None));
        let runner = WorkflowRunner::new(
            Arc::new(digest_registry()),
            CheckpointManager::new(store.clone(), Arc::new(MemoryOutputStore::new())),
            executor,
        );

        let err = runner.start(&digest_definition(), json!({})).await.unwrap_err();
        match err {
            RunnerError::Registry(RegistryError::MissingEnv { tool, missing }) => {
                assert_eq!(tool, "summarize");
                assert_eq!(missing, vec!["SUMMARY_API_KEY".to_string()]);
            }
            other => panic!("expected MissingEnv, got {other:?}"),
        }
        assert!(store.is_empty());
        assert_eq!(invoker.calls("search"), 0);
    }

    #[tokio::test]
    async fn test_fatal_failure_stops_at_step() {
        let h = harness();
        script_happy_path(&h.invoker);
        h.invoker.always(
            "fetch_page",
            Err(ToolError::new(FailureKind::AuthFailure, "403 from origin")),
        );

        let report = h
            .runner
            .start(&digest_definition(), json!({"target": "acme"}))
            .await
            .unwrap();

        let inst = report.instance;
        assert_eq!(inst.status, InstanceStatus::Failed);
        assert_eq!(inst.completed_steps.len(), 1);
        assert_eq!(inst.current_step, 1);
        let failed = inst.failed_step.unwrap();
        assert_eq!((failed.index, failed.name.as_str()), (1, "fetch"));
        assert_eq!(failed.kind, FailureKind::AuthFailure);
        assert_eq!(h.invoker.calls("fetch_page"), 1);
        assert_eq!(h.invoker.calls("fetch_page_lite"), 0);
        assert_eq!(h.invoker.calls("summarize"), 0);
        assert_eq!(report.steps_executed, 2);
    }

    #[tokio::test]
    async fn test_unresolvable_binding_is_invalid_input() {
        let h = harness();
        h.invoker.always("search", Ok(json!({"results": []})));

        let report = h
            .runner
            .start(&digest_definition(), json!({"target": "acme"}))
            .await
            .unwrap();

        let failed = report.instance.failed_step.unwrap();
        assert_eq!(failed.index, 1);
        assert_eq!(failed.kind, FailureKind::InvalidInput);
        assert_eq!(h.invoker.calls("fetch_page"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_honored_at_next_step_boundary() {
        let h = harness();
        script_happy_path(&h.invoker);
        // First search attempt fails so the step sits in backoff for ~2s.
        h.invoker.push(
            "search",
            Err(ToolError::new(FailureKind::RateLimited, "429")),
        );

        let def = digest_definition();
        let cancelled: Mutex<Option<Uuid>> = Mutex::new(None);
        let run = h.runner.start(&def, json!({"target": "acme"}));
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let active = h.store.list_active_or_failed().await.unwrap();
            let id = active[0].id;
            h.runner.cancel(id).await.unwrap();
            *cancelled.lock().unwrap() = Some(id);
        };
        let (report, ()) = tokio::join!(run, cancel);
        let report = report.unwrap();

        assert_eq!(Some(report.instance.id), *cancelled.lock().unwrap());
        // The in-flight step finished; the next one never started.
        assert_eq!(h.invoker.calls("search"), 2);
        assert_eq!(h.invoker.calls("fetch_page"), 0);
        assert_eq!(report.instance.status, InstanceStatus::Failed);
        assert_eq!(report.instance.completed_steps.len(), 1);
        let failed = report.instance.failed_step.unwrap();
        assert_eq!(failed.kind, FailureKind::Cancelled);
        assert_eq!(failed.index, 1);
    }

    #[tokio::test]
    async fn test_persisted_cancel_flag_stops_continue() {
        let h = harness();
        script_happy_path(&h.invoker);
        let id = h
            .store
            .start("fetch-and-summarize", 3, json!({"target": "acme"}))
            .await
            .unwrap();
        h.store.request_cancel(id).await.unwrap();

        let report = h
            .runner
            .continue_instance(&digest_definition(), id)
            .await
            .unwrap();
        assert_eq!(report.steps_executed, 0);
        assert_eq!(
            report.instance.failed_step.unwrap().kind,
            FailureKind::Cancelled
        );
        assert_eq!(h.invoker.calls("search"), 0);
    }

    #[tokio::test]
    async fn test_cancel_terminal_instance_is_conflict() {
        let h = harness();
        script_happy_path(&h.invoker);
        let report = h
            .runner
            .start(&digest_definition(), json!({"target": "acme"}))
            .await
            .unwrap();

        let err = h.runner.cancel(report.instance.id).await.unwrap_err();
        assert!(matches!(err.checkpoint(), Some(CheckpointError::NotActive(_))));
    }

    #[tokio::test]
    async fn test_cancel_now_fails_orphaned_instance() {
        let h = harness();
        let def = digest_definition();
        let id = h.store.start(&def.name, 3, json!({})).await.unwrap();

        let inst = h.runner.cancel_now(&def, id).await.unwrap();
        assert_eq!(inst.status, InstanceStatus::Failed);
        let failed = inst.failed_step.unwrap();
        assert_eq!((failed.index, failed.name.as_str()), (0, "search"));
        assert_eq!(failed.kind, FailureKind::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_now_completes_fully_recorded_instance() {
        let h = harness();
        let def = digest_definition();
        let id = h.store.start(&def.name, 3, json!({})).await.unwrap();
        for (index, step) in def.steps.iter().enumerate() {
            h.store
                .append_step(
                    id,
                    CompletedStep {
                        index,
                        name: step.name.clone(),
                        completed_at: chrono::Utc::now(),
                        output: OutputHandle(format!("{id}/{index:02}_{}.json", step.name)),
                    },
                )
                .await
                .unwrap();
        }

        let inst = h.runner.cancel_now(&def, id).await.unwrap();
        assert_eq!(inst.status, InstanceStatus::Completed);
        assert!(inst.failed_step.is_none());
        assert_eq!(inst.completed_steps.len(), 3);
    }

    #[tokio::test]
    async fn test_continue_refuses_changed_definition() {
        let h = harness();
        let id = h
            .store
            .start("fetch-and-summarize", 2, json!({}))
            .await
            .unwrap();

        let err = h
            .runner
            .continue_instance(&digest_definition(), id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RunnerError::DefinitionChanged { recorded: 2, current: 3, .. }
        ));
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl RunObserver for RecordingObserver {
        fn instance_started(&self, instance: &WorkflowInstance) {
            self.events.lock().unwrap().push(format!("start@{}", instance.current_step));
        }
        fn step_started(&self, index: usize, step: &StepSpec) {
            self.events.lock().unwrap().push(format!("{index}:{}", step.name));
        }
        fn step_finished(&self, _index: usize, _step: &StepSpec, execution: &Execution) {
            self.events
                .lock()
                .unwrap()
                .push(format!("ok={}", execution.outcome.is_success()));
        }
        fn instance_finished(&self, instance: &WorkflowInstance) {
            self.events.lock().unwrap().push(instance.status.to_string());
        }
    }

    #[tokio::test]
    async fn test_observer_sees_each_step() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let outputs = Arc::new(MemoryOutputStore::new());
        let invoker = Arc::new(ScriptedInvoker::new());
        script_happy_path(&invoker);
        let observer = Arc::new(RecordingObserver::default());
        let runner = test_runner(digest_registry(), store, outputs, invoker)
            .with_observer(observer.clone());

        runner.start(&digest_definition(), json!({"target": "acme"})).await.unwrap();

        let events = observer.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "start@0", "0:search", "ok=true", "1:fetch", "ok=true", "2:summarize", "ok=true",
                "completed",
            ]
        );
    }
}
