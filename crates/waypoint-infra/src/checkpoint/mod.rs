//! Checkpoint storage backends.
//!
//! [`CheckpointBackend`] picks the file or SQLite store from configuration so
//! that callers can hold one concrete type. The SQLite store itself lives in
//! [`crate::sqlite`].

pub mod file;

use std::path::Path;

use serde_json::Value;
use uuid::Uuid;
use waypoint_core::repository::checkpoint::CheckpointRepository;
use waypoint_types::config::{StoreBackend, WaypointConfig};
use waypoint_types::error::CheckpointError;
use waypoint_types::instance::{CompletedStep, FailedStep, WorkflowInstance};

use crate::config::database_url;
use crate::sqlite::checkpoint::SqliteCheckpointStore;
use crate::sqlite::pool::CheckpointDb;
use file::FileCheckpointStore;

/// The configured checkpoint store.
pub enum CheckpointBackend {
    File(FileCheckpointStore),
    Sqlite(SqliteCheckpointStore),
}

impl CheckpointBackend {
    /// Open the store selected by `config.store` under `data_dir`.
    pub async fn open(config: &WaypointConfig, data_dir: &Path) -> Result<Self, CheckpointError> {
        match config.store {
            StoreBackend::File => Ok(Self::File(FileCheckpointStore::new(data_dir))),
            StoreBackend::Sqlite => {
                let pool = CheckpointDb::open(&database_url(data_dir))
                    .await
                    .map_err(|e| CheckpointError::Storage(format!("open database: {e}")))?;
                Ok(Self::Sqlite(SqliteCheckpointStore::new(pool)))
            }
        }
    }

    pub fn kind(&self) -> StoreBackend {
        match self {
            Self::File(_) => StoreBackend::File,
            Self::Sqlite(_) => StoreBackend::Sqlite,
        }
    }
}

impl CheckpointRepository for CheckpointBackend {
    async fn start(
        &self,
        workflow_name: &str,
        total_steps: usize,
        params: Value,
    ) -> Result<Uuid, CheckpointError> {
        match self {
            Self::File(s) => s.start(workflow_name, total_steps, params).await,
            Self::Sqlite(s) => s.start(workflow_name, total_steps, params).await,
        }
    }

    async fn append_step(&self, id: Uuid, step: CompletedStep) -> Result<WorkflowInstance, CheckpointError> {
        match self {
            Self::File(s) => s.append_step(id, step).await,
            Self::Sqlite(s) => s.append_step(id, step).await,
        }
    }

    async fn mark_failed(&self, id: Uuid, failed: FailedStep) -> Result<WorkflowInstance, CheckpointError> {
        match self {
            Self::File(s) => s.mark_failed(id, failed).await,
            Self::Sqlite(s) => s.mark_failed(id, failed).await,
        }
    }

    async fn mark_completed(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        match self {
            Self::File(s) => s.mark_completed(id).await,
            Self::Sqlite(s) => s.mark_completed(id).await,
        }
    }

    async fn load(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        match self {
            Self::File(s) => s.load(id).await,
            Self::Sqlite(s) => s.load(id).await,
        }
    }

    async fn list_active_or_failed(&self) -> Result<Vec<WorkflowInstance>, CheckpointError> {
        match self {
            Self::File(s) => s.list_active_or_failed().await,
            Self::Sqlite(s) => s.list_active_or_failed().await,
        }
    }

    async fn list_for_workflow(&self, workflow_name: &str) -> Result<Vec<WorkflowInstance>, CheckpointError> {
        match self {
            Self::File(s) => s.list_for_workflow(workflow_name).await,
            Self::Sqlite(s) => s.list_for_workflow(workflow_name).await,
        }
    }

    async fn reopen(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        match self {
            Self::File(s) => s.reopen(id).await,
            Self::Sqlite(s) => s.reopen(id).await,
        }
    }

    async fn request_cancel(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        match self {
            Self::File(s) => s.request_cancel(id).await,
            Self::Sqlite(s) => s.request_cancel(id).await,
        }
    }
}
