//! Durable checkpoint manager for workflow execution state.
//!
//! Wraps a [`CheckpointRepository`] and an [`OutputStore`] to give the runner
//! one write-before-advance API: a step's output is persisted first, then the
//! step is appended to the instance record. A crash between the two leaves an
//! orphaned output file and a record that still points at the step, which is
//! simply re-executed on resume.

use std::collections::BTreeSet;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;
use waypoint_types::error::{CheckpointError, OutputStoreError};
use waypoint_types::instance::{CompletedStep, FailedStep, WorkflowInstance};
use waypoint_types::outcome::FailureReason;

use super::binding::BindingContext;
use crate::repository::checkpoint::CheckpointRepository;
use crate::repository::output::OutputStore;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Output(#[from] OutputStoreError),
}

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Generic over the record and output stores so it works with any backend
/// (file, SQLite, in-memory). Every transition is durable before the method
/// returns.
pub struct CheckpointManager<R: CheckpointRepository, O: OutputStore> {
    repo: R,
    outputs: O,
}

impl<R: CheckpointRepository, O: OutputStore> CheckpointManager<R, O> {
    pub fn new(repo: R, outputs: O) -> Self {
        Self { repo, outputs }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn outputs(&self) -> &O {
        &self.outputs
    }

    /// Create the instance record and return it as persisted.
    pub async fn begin(
        &self,
        workflow_name: &str,
        total_steps: usize,
        params: Value,
    ) -> Result<WorkflowInstance, PersistError> {
        let id = self.repo.start(workflow_name, total_steps, params).await?;
        let instance = self.repo.load(id).await?;
        tracing::info!(instance_id = %id, workflow = workflow_name, total_steps, "instance started");
        Ok(instance)
    }

    /// Persist a step's output, then record the step as completed.
    pub async fn checkpoint_step_complete(
        &self,
        instance_id: Uuid,
        index: usize,
        name: &str,
        output: &Value,
    ) -> Result<WorkflowInstance, PersistError> {
        let handle = self.outputs.put(instance_id, index, name, output).await?;
        let instance = self
            .repo
            .append_step(
                instance_id,
                CompletedStep {
                    index,
                    name: name.to_string(),
                    completed_at: Utc::now(),
                    output: handle,
                },
            )
            .await?;

        tracing::debug!(instance_id = %instance_id, step = name, index, "checkpointed step complete");
        Ok(instance)
    }

    /// Record the step the instance failed at.
    pub async fn checkpoint_step_failed(
        &self,
        instance_id: Uuid,
        index: usize,
        name: &str,
        reason: &FailureReason,
    ) -> Result<WorkflowInstance, PersistError> {
        let instance = self
            .repo
            .mark_failed(
                instance_id,
                FailedStep {
                    index,
                    name: name.to_string(),
                    kind: reason.kind,
                    error: reason.message.clone(),
                },
            )
            .await?;

        tracing::debug!(instance_id = %instance_id, step = name, kind = %reason.kind, "checkpointed step failed");
        Ok(instance)
    }

    pub async fn checkpoint_completed(&self, instance_id: Uuid) -> Result<WorkflowInstance, PersistError> {
        let instance = self.repo.mark_completed(instance_id).await?;
        tracing::info!(instance_id = %instance_id, workflow = %instance.workflow_name, "instance completed");
        Ok(instance)
    }

    /// Build the binding context for a step: instance params plus the
    /// persisted outputs of the steps it references.
    pub async fn binding_context(
        &self,
        instance: &WorkflowInstance,
        referenced: &BTreeSet<String>,
    ) -> Result<BindingContext, PersistError> {
        let mut ctx = BindingContext::new(instance.params.clone());
        for name in referenced {
            // Unrecorded steps stay absent; binding reports them.
            if let Some(done) = instance.completed(name) {
                let output = self.outputs.get(&done.output).await?;
                ctx.insert_step_output(name, output);
            }
        }
        Ok(ctx)
    }
}
