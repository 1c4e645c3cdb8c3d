//! Process exit codes.
//!
//! | code | meaning |
//! |------|---------|
//! | 0 | success |
//! | 1 | validation: unknown workflow, instance or tool, bad arguments, refused confirmation |
//! | 2 | conflict with current state (`AlreadyActive`, `NotActive`, ...) |
//! | 3 | internal or storage error |
//! | 4 | the command ran a workflow and the instance ended `failed` |

use std::fmt;
use std::process::ExitCode;

use uuid::Uuid;
use waypoint_core::tool::registry::RegistryError;
use waypoint_core::workflow::binding::BindingError;
use waypoint_core::workflow::checkpoint::PersistError;
use waypoint_core::workflow::definition::WorkflowError;
use waypoint_core::workflow::resume::ResumeError;
use waypoint_core::workflow::runner::RunnerError;
use waypoint_types::error::CheckpointError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Success,
    Validation,
    Conflict,
    Internal,
    WorkflowFailed,
}

impl ExitClass {
    pub fn code(self) -> u8 {
        match self {
            ExitClass::Success => 0,
            ExitClass::Validation => 1,
            ExitClass::Conflict => 2,
            ExitClass::Internal => 3,
            ExitClass::WorkflowFailed => 4,
        }
    }
}

impl From<ExitClass> for ExitCode {
    fn from(class: ExitClass) -> Self {
        ExitCode::from(class.code())
    }
}

/// A caller mistake detected by the CLI itself.
#[derive(Debug)]
pub struct UsageError(pub String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UsageError {}

/// The command was accepted and the instance it drove ended `failed`.
#[derive(Debug)]
pub struct WorkflowFailed {
    pub instance_id: Uuid,
    pub reason: String,
}

impl fmt::Display for WorkflowFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance {} failed: {}", self.instance_id, self.reason)
    }
}

impl std::error::Error for WorkflowFailed {}

/// Map an error to its exit class by the first recognized error in its chain.
pub fn classify(err: &anyhow::Error) -> ExitClass {
    for cause in err.chain() {
        if cause.downcast_ref::<WorkflowFailed>().is_some() {
            return ExitClass::WorkflowFailed;
        }
        if cause.downcast_ref::<UsageError>().is_some() {
            return ExitClass::Validation;
        }
        if let Some(e) = cause.downcast_ref::<ResumeError>() {
            return match e {
                ResumeError::NeedsReopen(_) => ExitClass::Validation,
                ResumeError::AlreadyCompleted(_) => ExitClass::Conflict,
                ResumeError::Runner(inner) => runner_class(inner),
            };
        }
        if let Some(e) = cause.downcast_ref::<RunnerError>() {
            return runner_class(e);
        }
        if let Some(e) = cause.downcast_ref::<CheckpointError>() {
            return checkpoint_class(e);
        }
        if let Some(e) = cause.downcast_ref::<RegistryError>() {
            return registry_class(e);
        }
        if cause.downcast_ref::<WorkflowError>().is_some() || cause.downcast_ref::<BindingError>().is_some() {
            return ExitClass::Validation;
        }
    }
    ExitClass::Internal
}

fn runner_class(e: &RunnerError) -> ExitClass {
    match e {
        RunnerError::Definition(WorkflowError::IoError(_)) => ExitClass::Internal,
        RunnerError::Definition(_) => ExitClass::Validation,
        RunnerError::Registry(inner) => registry_class(inner),
        RunnerError::Persist(PersistError::Checkpoint(inner)) => checkpoint_class(inner),
        RunnerError::Persist(PersistError::Output(_)) => ExitClass::Internal,
        RunnerError::WorkflowMismatch { .. } | RunnerError::DefinitionChanged { .. } => {
            ExitClass::Validation
        }
        RunnerError::NotRunnable(..) => ExitClass::Conflict,
    }
}

fn checkpoint_class(e: &CheckpointError) -> ExitClass {
    if e.is_conflict() {
        ExitClass::Conflict
    } else if matches!(e, CheckpointError::NotFound(_)) {
        ExitClass::Validation
    } else {
        ExitClass::Internal
    }
}

fn registry_class(e: &RegistryError) -> ExitClass {
    match e {
        RegistryError::Io(_) => ExitClass::Internal,
        _ => ExitClass::Validation,
    }
}
