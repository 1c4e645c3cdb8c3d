use thiserror::Error;
use uuid::Uuid;

/// Errors from checkpoint store operations (used by trait definitions in waypoint-core).
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("workflow '{workflow}' already has an active instance {instance_id}")]
    AlreadyActive { workflow: String, instance_id: Uuid },

    #[error("instance {0} is not in progress")]
    NotActive(Uuid),

    #[error("step index {got} is out of order (expected {expected})")]
    OutOfOrder { expected: usize, got: usize },

    #[error("instance has {current} of {total} steps completed")]
    IncompleteSteps { current: usize, total: usize },

    #[error("instance {0} is not failed")]
    NotFailed(Uuid),

    #[error("instance not found: {0}")]
    NotFound(Uuid),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CheckpointError {
    /// Conflicts are caller errors against current state, not storage faults.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CheckpointError::AlreadyActive { .. }
                | CheckpointError::NotActive(_)
                | CheckpointError::OutOfOrder { .. }
                | CheckpointError::IncompleteSteps { .. }
                | CheckpointError::NotFailed(_)
        )
    }
}

/// Errors from step output storage.
#[derive(Debug, Error)]
pub enum OutputStoreError {
    #[error("output not found: {0}")]
    NotFound(String),

    #[error("output storage error: {0}")]
    Storage(String),
}
