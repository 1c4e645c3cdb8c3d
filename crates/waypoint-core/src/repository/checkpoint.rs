//! Checkpoint store trait and the state-transition rules every backend shares.
//!
//! A backend is responsible for durability and for serializing writers; the
//! rules for which transitions are legal live in [`transition`] so that the
//! file, SQLite and in-memory stores cannot drift apart.

use std::future::Future;

use serde_json::Value;
use uuid::Uuid;
use waypoint_types::error::CheckpointError;
use waypoint_types::instance::{CompletedStep, FailedStep, WorkflowInstance};

/// Durable storage for workflow instances.
///
/// Every mutating method returns only after the new state is durable, and
/// returns the record as persisted. Uses native async fn in traits (Rust 2024
/// edition, no async_trait macro).
pub trait CheckpointRepository: Send + Sync {
    /// Create an in-progress instance at step 0.
    ///
    /// Fails with `AlreadyActive` (and creates nothing) if another instance of
    /// `workflow_name` is in progress.
    fn start(
        &self,
        workflow_name: &str,
        total_steps: usize,
        params: Value,
    ) -> impl Future<Output = Result<Uuid, CheckpointError>> + Send;

    /// Record a completed step. `step.index` must equal `current_step`.
    fn append_step(
        &self,
        id: Uuid,
        step: CompletedStep,
    ) -> impl Future<Output = Result<WorkflowInstance, CheckpointError>> + Send;

    /// Move an in-progress instance to `failed`. Repeating the call on an
    /// already failed instance is a no-op.
    fn mark_failed(
        &self,
        id: Uuid,
        failed: FailedStep,
    ) -> impl Future<Output = Result<WorkflowInstance, CheckpointError>> + Send;

    /// Move an in-progress instance with every step recorded to `completed`.
    fn mark_completed(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<WorkflowInstance, CheckpointError>> + Send;

    fn load(&self, id: Uuid) -> impl Future<Output = Result<WorkflowInstance, CheckpointError>> + Send;

    /// All instances whose status is `in_progress` or `failed`, oldest first.
    fn list_active_or_failed(
        &self,
    ) -> impl Future<Output = Result<Vec<WorkflowInstance>, CheckpointError>> + Send;

    /// All instances of one workflow, newest first.
    fn list_for_workflow(
        &self,
        workflow_name: &str,
    ) -> impl Future<Output = Result<Vec<WorkflowInstance>, CheckpointError>> + Send;

    /// Return a failed instance to `in_progress` at its failed step, keeping
    /// completed steps. Subject to the single-active-instance rule.
    fn reopen(&self, id: Uuid) -> impl Future<Output = Result<WorkflowInstance, CheckpointError>> + Send;

    /// Persist an operator's cancel request on an in-progress instance.
    fn request_cancel(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<WorkflowInstance, CheckpointError>> + Send;
}

impl<T: CheckpointRepository> CheckpointRepository for std::sync::Arc<T> {
    fn start(
        &self,
        workflow_name: &str,
        total_steps: usize,
        params: Value,
    ) -> impl Future<Output = Result<Uuid, CheckpointError>> + Send {
        (**self).start(workflow_name, total_steps, params)
    }

    fn append_step(
        &self,
        id: Uuid,
        step: CompletedStep,
    ) -> impl Future<Output = Result<WorkflowInstance, CheckpointError>> + Send {
        (**self).append_step(id, step)
    }

    fn mark_failed(
        &self,
        id: Uuid,
        failed: FailedStep,
    ) -> impl Future<Output = Result<WorkflowInstance, CheckpointError>> + Send {
        (**self).mark_failed(id, failed)
    }

    fn mark_completed(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<WorkflowInstance, CheckpointError>> + Send {
        (**self).mark_completed(id)
    }

    fn load(&self, id: Uuid) -> impl Future<Output = Result<WorkflowInstance, CheckpointError>> + Send {
        (**self).load(id)
    }

    fn list_active_or_failed(
        &self,
    ) -> impl Future<Output = Result<Vec<WorkflowInstance>, CheckpointError>> + Send {
        (**self).list_active_or_failed()
    }

    fn list_for_workflow(
        &self,
        workflow_name: &str,
    ) -> impl Future<Output = Result<Vec<WorkflowInstance>, CheckpointError>> + Send {
        (**self).list_for_workflow(workflow_name)
    }

    fn reopen(&self, id: Uuid) -> impl Future<Output = Result<WorkflowInstance, CheckpointError>> + Send {
        (**self).reopen(id)
    }

    fn request_cancel(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<WorkflowInstance, CheckpointError>> + Send {
        (**self).request_cancel(id)
    }
}

// ---------------------------------------------------------------------------
// Transition rules
// ---------------------------------------------------------------------------

/// Pure state transitions on a loaded record.
///
/// Backends load the record, apply one of these, and persist the result
/// atomically. Each function leaves the record untouched when it errors.
pub mod transition {
    use chrono::Utc;
    use uuid::Uuid;
    use waypoint_types::error::CheckpointError;
    use waypoint_types::instance::{CompletedStep, FailedStep, InstanceStatus, WorkflowInstance};

    /// Reject a start when any of `existing` is an in-progress instance of
    /// `workflow_name`.
    pub fn ensure_no_active<'a>(
        workflow_name: &str,
        existing: impl IntoIterator<Item = &'a WorkflowInstance>,
    ) -> Result<(), CheckpointError> {
        match existing
            .into_iter()
            .find(|i| i.workflow_name == workflow_name && i.is_active())
        {
            Some(active) => Err(CheckpointError::AlreadyActive {
                workflow: workflow_name.to_string(),
                instance_id: active.id,
            }),
            None => Ok(()),
        }
    }

    pub fn append_step(inst: &mut WorkflowInstance, step: CompletedStep) -> Result<(), CheckpointError> {
        ensure_active(inst)?;
        if step.index != inst.current_step || step.index >= inst.total_steps {
            return Err(CheckpointError::OutOfOrder {
                expected: inst.current_step,
                got: step.index,
            });
        }
        inst.completed_steps.push(step);
        inst.current_step += 1;
        inst.updated_at = Utc::now();
        Ok(())
    }

    /// Returns `false` when the instance was already failed and nothing
    /// changed.
    pub fn mark_failed(inst: &mut WorkflowInstance, failed: FailedStep) -> Result<bool, CheckpointError> {
        match inst.status {
            InstanceStatus::Failed => Ok(false),
            InstanceStatus::Completed => Err(CheckpointError::NotActive(inst.id)),
            InstanceStatus::InProgress => {
                inst.error = Some(format!("step '{}' failed: {}", failed.name, failed.error));
                inst.failed_step = Some(failed);
                inst.status = InstanceStatus::Failed;
                inst.updated_at = Utc::now();
                Ok(true)
            }
        }
    }

    pub fn mark_completed(inst: &mut WorkflowInstance) -> Result<(), CheckpointError> {
        ensure_active(inst)?;
        if inst.current_step != inst.total_steps {
            return Err(CheckpointError::IncompleteSteps {
                current: inst.current_step,
                total: inst.total_steps,
            });
        }
        inst.status = InstanceStatus::Completed;
        inst.updated_at = Utc::now();
        Ok(())
    }

    /// The caller checks the single-active rule with [`ensure_no_active`]
    /// before applying this.
    pub fn reopen(inst: &mut WorkflowInstance) -> Result<(), CheckpointError> {
        if inst.status != InstanceStatus::Failed {
            return Err(CheckpointError::NotFailed(inst.id));
        }
        inst.status = InstanceStatus::InProgress;
        inst.current_step = inst.completed_steps.len();
        inst.failed_step = None;
        inst.error = None;
        inst.cancel_requested = false;
        inst.updated_at = Utc::now();
        Ok(())
    }

    pub fn request_cancel(inst: &mut WorkflowInstance) -> Result<(), CheckpointError> {
        ensure_active(inst)?;
        inst.cancel_requested = true;
        inst.updated_at = Utc::now();
        Ok(())
    }

    fn ensure_active(inst: &WorkflowInstance) -> Result<(), CheckpointError> {
        if inst.is_active() {
            Ok(())
        } else {
            Err(CheckpointError::NotActive(inst.id))
        }
    }

    /// `list_active_or_failed` filter.
    pub fn is_resumable_status(inst: &WorkflowInstance) -> bool {
        matches!(inst.status, InstanceStatus::InProgress | InstanceStatus::Failed)
    }

    /// Guard for the `reopen` single-active check: ignore the instance being
    /// reopened.
    pub fn others(id: Uuid) -> impl Fn(&&WorkflowInstance) -> bool {
        move |i| i.id != id
    }
}

#[cfg(test)]
mod tests {
    use super::transition;
    use chrono::Utc;
    use serde_json::json;
    use waypoint_types::error::CheckpointError;
    use waypoint_types::instance::{
        CompletedStep, FailedStep, InstanceStatus, OutputHandle, WorkflowInstance,
    };
    use waypoint_types::outcome::FailureKind;

    fn completed(index: usize) -> CompletedStep {
        CompletedStep {
            index,
            name: format!("s{index}"),
            completed_at: Utc::now(),
            output: OutputHandle(format!("out/{index}")),
        }
    }

    fn failed(index: usize) -> FailedStep {
        FailedStep {
            index,
            name: format!("s{index}"),
            kind: FailureKind::AuthFailure,
            error: "401".to_string(),
        }
    }

    #[test]
    fn test_append_in_order_advances_cursor() {
        let mut inst = WorkflowInstance::new("wf", 2, json!({}));
        transition::append_step(&mut inst, completed(0)).unwrap();
        assert_eq!(inst.current_step, 1);
        assert_eq!(inst.completed_steps.len(), 1);
    }

    #[test]
    fn test_append_out_of_order_leaves_record_unchanged() {
        let mut inst = WorkflowInstance::new("wf", 3, json!({}));
        let before = inst.clone();
        let err = transition::append_step(&mut inst, completed(1)).unwrap_err();
        assert!(matches!(err, CheckpointError::OutOfOrder { expected: 0, got: 1 }));
        assert_eq!(inst, before);
    }

    #[test]
    fn test_append_past_total_is_out_of_order() {
        let mut inst = WorkflowInstance::new("wf", 1, json!({}));
        transition::append_step(&mut inst, completed(0)).unwrap();
        let err = transition::append_step(&mut inst, completed(1)).unwrap_err();
        assert!(matches!(err, CheckpointError::OutOfOrder { .. }));
    }

    #[test]
    fn test_mark_completed_requires_all_steps() {
        let mut inst = WorkflowInstance::new("wf", 2, json!({}));
        transition::append_step(&mut inst, completed(0)).unwrap();
        let err = transition::mark_completed(&mut inst).unwrap_err();
        assert!(matches!(err, CheckpointError::IncompleteSteps { current: 1, total: 2 }));
        assert_eq!(inst.status, InstanceStatus::InProgress);
    }

    #[test]
    fn test_mark_failed_is_idempotent() {
        let mut inst = WorkflowInstance::new("wf", 2, json!({}));
        assert!(transition::mark_failed(&mut inst, failed(0)).unwrap());
        let snapshot = inst.clone();
        assert!(!transition::mark_failed(&mut inst, failed(0)).unwrap());
        assert_eq!(inst, snapshot);
        assert_eq!(inst.error.as_deref(), Some("step 's0' failed: 401"));
    }

    #[test]
    fn test_no_append_after_terminal() {
        let mut inst = WorkflowInstance::new("wf", 1, json!({}));
        transition::mark_failed(&mut inst, failed(0)).unwrap();
        let err = transition::append_step(&mut inst, completed(0)).unwrap_err();
        assert!(matches!(err, CheckpointError::NotActive(_)));
    }

    #[test]
    fn test_mark_failed_on_completed_rejected() {
        let mut inst = WorkflowInstance::new("wf", 1, json!({}));
        transition::append_step(&mut inst, completed(0)).unwrap();
        transition::mark_completed(&mut inst).unwrap();
        assert!(matches!(
            transition::mark_failed(&mut inst, failed(0)),
            Err(CheckpointError::NotActive(_))
        ));
    }

    #[test]
    fn test_reopen_keeps_completed_steps() {
        let mut inst = WorkflowInstance::new("wf", 3, json!({}));
        transition::append_step(&mut inst, completed(0)).unwrap();
        transition::mark_failed(&mut inst, failed(1)).unwrap();

        transition::reopen(&mut inst).unwrap();
        assert_eq!(inst.status, InstanceStatus::InProgress);
        assert_eq!(inst.current_step, 1);
        assert_eq!(inst.completed_steps.len(), 1);
        assert!(inst.failed_step.is_none());
        assert!(inst.error.is_none());

        assert!(matches!(
            transition::reopen(&mut inst),
            Err(CheckpointError::NotFailed(_))
        ));
    }

    #[test]
    fn test_ensure_no_active() {
        let a = WorkflowInstance::new("wf", 1, json!({}));
        let mut b = WorkflowInstance::new("other", 1, json!({}));
        assert!(transition::ensure_no_active("other", [&a]).is_ok());

        let err = transition::ensure_no_active("wf", [&a, &b]).unwrap_err();
        assert!(matches!(err, CheckpointError::AlreadyActive { instance_id, .. } if instance_id == a.id));

        b.status = InstanceStatus::Failed;
        assert!(transition::ensure_no_active("other", [&b]).is_ok());
    }
}
