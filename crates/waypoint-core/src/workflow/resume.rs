//! Resume controller: finds interrupted instances and hands them back to the
//! runner at their first incomplete step.
//!
//! `in_progress` instances (typically left behind by a crash) resume directly.
//! `failed` instances are only resumed on explicit request, through the
//! store's `reopen`, so an operator decides whether a failed paid step runs
//! again. Completed steps are never re-executed: the runner starts from
//! `current_step` and rebinds inputs from persisted outputs.

use thiserror::Error;
use uuid::Uuid;
use waypoint_types::instance::{InstanceStatus, WorkflowInstance};
use waypoint_types::workflow::WorkflowDefinition;

use super::definition::WorkflowCatalog;
use super::runner::{RunReport, RunnerError, WorkflowRunner};
use crate::repository::checkpoint::CheckpointRepository;
use crate::repository::output::OutputStore;
use crate::tool::invoker::ToolInvoker;

#[derive(Debug, Error)]
pub enum ResumeError {
    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("instance {0} failed; resuming it requires an explicit reopen")]
    NeedsReopen(Uuid),

    #[error("instance {0} already completed")]
    AlreadyCompleted(Uuid),
}

/// Whether `resume` may reopen a failed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    ActiveOnly,
    ReopenFailed,
}

/// What `recover` did with one in-progress instance.
#[derive(Debug)]
pub enum Recovery {
    Resumed(RunReport),
    /// No loaded definition matches the instance's workflow name.
    Skipped { reason: String },
    Errored(RunnerError),
}

#[derive(Debug)]
pub struct RecoveryEntry {
    pub instance_id: Uuid,
    pub workflow: String,
    pub recovery: Recovery,
}

pub struct ResumeController<'a, R, O, I>
where
    R: CheckpointRepository,
    O: OutputStore,
    I: ToolInvoker,
{
    runner: &'a WorkflowRunner<R, O, I>,
}

impl<'a, R, O, I> ResumeController<'a, R, O, I>
where
    R: CheckpointRepository,
    O: OutputStore,
    I: ToolInvoker,
{
    pub fn new(runner: &'a WorkflowRunner<R, O, I>) -> Self {
        Self { runner }
    }

    /// Instances that are `in_progress` or `failed`, oldest first.
    pub async fn scan(&self) -> Result<Vec<WorkflowInstance>, RunnerError> {
        Ok(self.runner.checkpoints().repo().list_active_or_failed().await?)
    }

    /// Continue one instance from its first incomplete step.
    pub async fn resume(
        &self,
        def: &WorkflowDefinition,
        instance_id: Uuid,
        mode: ResumeMode,
    ) -> Result<RunReport, ResumeError> {
        let repo = self.runner.checkpoints().repo();
        let instance = repo.load(instance_id).await.map_err(RunnerError::from)?;
        self.runner.check_compatible(def, &instance)?;

        match instance.status {
            InstanceStatus::Completed => return Err(ResumeError::AlreadyCompleted(instance_id)),
            InstanceStatus::Failed if mode == ResumeMode::ActiveOnly => {
                return Err(ResumeError::NeedsReopen(instance_id));
            }
            InstanceStatus::Failed => {
                self.runner
                    .registry()
                    .ensure_workflow(def)
                    .map_err(RunnerError::from)?;
                let reopened = repo.reopen(instance_id).await.map_err(RunnerError::from)?;
                tracing::info!(
                    instance_id = %instance_id,
                    workflow = %def.name,
                    from_step = reopened.current_step,
                    "reopened failed instance"
                );
            }
            InstanceStatus::InProgress => {}
        }

        tracing::info!(instance_id = %instance_id, workflow = %def.name, "resuming instance");
        Ok(self.runner.continue_instance(def, instance_id).await?)
    }

    /// Startup scan: resume every `in_progress` instance whose workflow is in
    /// `catalog`. Failed instances are left alone. Instances are driven one
    /// after another; a failure on one does not stop the others.
    pub async fn recover(&self, catalog: &WorkflowCatalog) -> Result<Vec<RecoveryEntry>, RunnerError> {
        let mut entries = Vec::new();
        for instance in self.scan().await? {
            if !instance.is_active() {
                continue;
            }
            let recovery = match catalog.get(&instance.workflow_name) {
                Err(e) => {
                    tracing::warn!(
                        instance_id = %instance.id,
                        workflow = %instance.workflow_name,
                        "no definition for interrupted instance, skipping"
                    );
                    Recovery::Skipped {
                        reason: e.to_string(),
                    }
                }
                Ok(def) => match self.runner.continue_instance(def, instance.id).await {
                    Ok(report) => Recovery::Resumed(report),
                    Err(e) => {
                        tracing::error!(instance_id = %instance.id, error = %e, "recovery failed");
                        Recovery::Errored(e)
                    }
                },
            };
            entries.push(RecoveryEntry {
                instance_id: instance.id,
                workflow: instance.workflow_name,
                recovery,
            });
        }
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::repository::memory::{MemoryCheckpointStore, MemoryOutputStore};
    use crate::testing::{
        ScriptedInvoker, digest_definition, digest_definition_without_fallback, digest_registry,
        test_runner,
    };
    use crate::tool::invoker::ToolError;
    use serde_json::json;
    use waypoint_types::error::CheckpointError;
    use waypoint_types::outcome::FailureKind;

    fn happy(invoker: &ScriptedInvoker) {
        invoker.always(
            "search",
            Ok(json!({"results": [{"url": "https://acme.test"}]})),
        );
        invoker.always("fetch_page", Ok(json!({"content": "page"})));
        invoker.always("summarize", Ok(json!({"summary": "short"})));
    }

    fn catalog() -> WorkflowCatalog {
        let mut catalog = WorkflowCatalog::default();
        catalog
            .insert(PathBuf::from("digest.yaml"), digest_definition())
            .unwrap();
        catalog
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_mid_step_resumes_without_repeating_completed_steps() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let outputs = Arc::new(MemoryOutputStore::new());
        let def = digest_definition();

        // First process: step 0 completes, step 1 hangs, process "dies".
        let first = Arc::new(ScriptedInvoker::new());
        happy(&first);
        first.push_hang("fetch_page");
        let runner = test_runner(digest_registry(), store.clone(), outputs.clone(), first.clone());
        let crashed = tokio::time::timeout(
            Duration::from_secs(10),
            runner.start(&def, json!({"target": "acme"})),
        )
        .await;
        assert!(crashed.is_err());
        drop(runner);

        // Second process: scan finds the instance at step 1.
        let second = Arc::new(ScriptedInvoker::new());
        happy(&second);
        let runner = test_runner(digest_registry(), store.clone(), outputs.clone(), second.clone());
        let controller = ResumeController::new(&runner);

        let pending = controller.scan().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].current_step, 1);
        assert_eq!(pending[0].status, InstanceStatus::InProgress);

        let report = controller
            .resume(&def, pending[0].id, ResumeMode::ActiveOnly)
            .await
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.steps_executed, 2);
        assert_eq!(second.calls_for_step(0), 0);
        assert_eq!(second.calls("fetch_page"), 1);
        assert_eq!(second.calls("summarize"), 1);
        // Step 1 was rebound from the step 0 output persisted by the first run.
        assert_eq!(
            second.recorded("fetch_page")[0].input,
            json!({"url": "https://acme.test"})
        );
        // The idempotency key survives the restart.
        assert_eq!(
            first.keys("fetch_page")[0],
            second.keys("fetch_page")[0]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_fetch_fails_then_reopens_to_completion() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let outputs = Arc::new(MemoryOutputStore::new());
        let invoker = Arc::new(ScriptedInvoker::new());
        happy(&invoker);
        invoker.hang("fetch_page");
        let runner = test_runner(digest_registry(), store.clone(), outputs, invoker.clone());
        let def = digest_definition_without_fallback();

        let report = runner.start(&def, json!({"target": "acme"})).await.unwrap();
        let inst = &report.instance;
        assert_eq!(inst.status, InstanceStatus::Failed);
        let failed = inst.failed_step.as_ref().unwrap();
        assert_eq!((failed.index, failed.name.as_str()), (1, "fetch"));
        assert_eq!(failed.kind, FailureKind::Timeout);
        assert_eq!(inst.completed_steps.len(), 1);
        assert_eq!(inst.completed_steps[0].name, "search");
        assert_eq!(invoker.calls("fetch_page"), 3);
        assert_eq!(invoker.calls("fetch_page_lite"), 0);
        assert_eq!(invoker.calls("summarize"), 0);

        // The operator fixes the page fetcher.
        invoker.always("fetch_page", Ok(json!({"content": "page"})));
        let report = ResumeController::new(&runner)
            .resume(&def, inst.id, ResumeMode::ReopenFailed)
            .await
            .unwrap();

        assert!(report.succeeded());
        assert_eq!(report.instance.status, InstanceStatus::Completed);
        assert!(report.instance.failed_step.is_none());
        let indices: Vec<usize> = report.instance.completed_steps.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(invoker.calls("search"), 1);
        assert_eq!(invoker.calls("fetch_page"), 4);
        assert_eq!(invoker.calls("summarize"), 1);
    }

    #[tokio::test]
    async fn test_failed_instance_needs_reopen() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let outputs = Arc::new(MemoryOutputStore::new());
        let invoker = Arc::new(ScriptedInvoker::new());
        happy(&invoker);
        invoker.push(
            "summarize",
            Err(ToolError::new(FailureKind::AuthFailure, "bad key")),
        );
        let runner = test_runner(digest_registry(), store.clone(), outputs, invoker.clone());
        let def = digest_definition();

        let failed = runner.start(&def, json!({"target": "acme"})).await.unwrap();
        assert_eq!(failed.instance.status, InstanceStatus::Failed);
        let id = failed.instance.id;

        let controller = ResumeController::new(&runner);
        let err = controller
            .resume(&def, id, ResumeMode::ActiveOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, ResumeError::NeedsReopen(e) if e == id));
        assert_eq!(store.load(id).await.unwrap().status, InstanceStatus::Failed);

        let report = controller
            .resume(&def, id, ResumeMode::ReopenFailed)
            .await
            .unwrap();
        assert!(report.succeeded());
        assert_eq!(report.steps_executed, 1);
        assert_eq!(invoker.calls("search"), 1);
        assert_eq!(invoker.calls("fetch_page"), 1);
        assert_eq!(invoker.calls("summarize"), 2);
    }

    #[tokio::test]
    async fn test_reopen_blocked_by_other_active_instance() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.always(
            "search",
            Err(ToolError::new(FailureKind::InvalidInput, "bad query")),
        );
        let runner = test_runner(
            digest_registry(),
            store.clone(),
            Arc::new(MemoryOutputStore::new()),
            invoker,
        );
        let def = digest_definition();
        let failed = runner.start(&def, json!({})).await.unwrap().instance.id;
        let active = store.start(&def.name, 3, json!({})).await.unwrap();

        let err = ResumeController::new(&runner)
            .resume(&def, failed, ResumeMode::ReopenFailed)
            .await
            .unwrap_err();
        match err {
            ResumeError::Runner(e) => assert!(matches!(
                e.checkpoint(),
                Some(CheckpointError::AlreadyActive { instance_id, .. }) if *instance_id == active
            )),
            other => panic!("expected AlreadyActive, got {other:?}"),
        }
        assert_eq!(store.load(failed).await.unwrap().status, InstanceStatus::Failed);
    }

    #[tokio::test]
    async fn test_completed_instance_is_not_resumed() {
        let invoker = Arc::new(ScriptedInvoker::new());
        happy(&invoker);
        let runner = test_runner(
            digest_registry(),
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(MemoryOutputStore::new()),
            invoker,
        );
        let def = digest_definition();
        let id = runner.start(&def, json!({"target": "x"})).await.unwrap().instance.id;

        let err = ResumeController::new(&runner)
            .resume(&def, id, ResumeMode::ReopenFailed)
            .await
            .unwrap_err();
        assert!(matches!(err, ResumeError::AlreadyCompleted(_)));
    }

    #[tokio::test]
    async fn test_definition_drift_leaves_failed_instance_untouched() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let invoker = Arc::new(ScriptedInvoker::new());
        let runner = test_runner(
            digest_registry(),
            store.clone(),
            Arc::new(MemoryOutputStore::new()),
            invoker,
        );
        let def = digest_definition();
        let id = store.start(&def.name, 5, json!({})).await.unwrap();
        store
            .mark_failed(
                id,
                waypoint_types::instance::FailedStep {
                    index: 0,
                    name: "search".to_string(),
                    kind: FailureKind::Timeout,
                    error: "timed out".to_string(),
                },
            )
            .await
            .unwrap();

        let err = ResumeController::new(&runner)
            .resume(&def, id, ResumeMode::ReopenFailed)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResumeError::Runner(RunnerError::DefinitionChanged { .. })
        ));
        assert_eq!(store.load(id).await.unwrap().status, InstanceStatus::Failed);
    }

    #[tokio::test]
    async fn test_recover_resumes_known_in_progress_instances_only() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let invoker = Arc::new(ScriptedInvoker::new());
        happy(&invoker);
        let runner = test_runner(
            digest_registry(),
            store.clone(),
            Arc::new(MemoryOutputStore::new()),
            invoker.clone(),
        );

        let known = store
            .start("fetch-and-summarize", 3, json!({"target": "acme"}))
            .await
            .unwrap();
        let orphan = store.start("retired-workflow", 2, json!({})).await.unwrap();
        let failed = store.start("another", 1, json!({})).await.unwrap();
        store
            .mark_failed(
                failed,
                waypoint_types::instance::FailedStep {
                    index: 0,
                    name: "a".to_string(),
                    kind: FailureKind::Timeout,
                    error: "timed out".to_string(),
                },
            )
            .await
            .unwrap();

        let entries = ResumeController::new(&runner)
            .recover(&catalog())
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);

        let by_id = |id: Uuid| entries.iter().find(|e| e.instance_id == id).unwrap();
        assert!(matches!(
            &by_id(known).recovery,
            Recovery::Resumed(report) if report.succeeded()
        ));
        assert!(matches!(&by_id(orphan).recovery, Recovery::Skipped { .. }));
        assert_eq!(store.load(failed).await.unwrap().status, InstanceStatus::Failed);
        assert_eq!(store.load(orphan).await.unwrap().status, InstanceStatus::InProgress);
    }
}
