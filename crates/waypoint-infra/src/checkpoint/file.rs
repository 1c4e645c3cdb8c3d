//! JSON-file checkpoint store.
//!
//! One pretty-printed record per instance at
//! `<data_dir>/checkpoints/<instance_id>.json`, readable by an operator while
//! no process is running. Mutations are serialized within the process by a
//! write lock and made durable with [`atomic_write_json`] before returning.
//! Concurrent writers in separate processes are not coordinated; use the
//! SQLite backend for that.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;
use waypoint_core::repository::checkpoint::{CheckpointRepository, transition};
use waypoint_types::error::CheckpointError;
use waypoint_types::instance::{CompletedStep, FailedStep, WorkflowInstance};

use crate::filesystem::atomic_write_json;

fn storage_err(context: &str, err: impl std::fmt::Display) -> CheckpointError {
    CheckpointError::Storage(format!("{context}: {err}"))
}

pub struct FileCheckpointStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCheckpointStore {
    /// Store records under `{data_dir}/checkpoints`.
    pub fn new(data_dir: &Path) -> Self {
        Self::at(data_dir.join("checkpoints"))
    }

    /// Store records directly under `root`.
    pub fn at(root: PathBuf) -> Self {
        Self {
            root,
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn read(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        let path = self.record_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(id));
            }
            Err(e) => return Err(storage_err(&format!("read {}", path.display()), e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| storage_err(&format!("parse {}", path.display()), e))
    }

    async fn write(&self, inst: &WorkflowInstance) -> Result<(), CheckpointError> {
        let path = self.record_path(inst.id);
        atomic_write_json(&path, inst)
            .await
            .map_err(|e| storage_err(&format!("write {}", path.display()), e))?;
        tracing::debug!(instance_id = %inst.id, status = %inst.status, path = %path.display(), "checkpoint written");
        Ok(())
    }

    /// Every readable record. Unparseable files are skipped with a warning so
    /// one corrupt record does not hide the rest.
    async fn read_all(&self) -> Result<Vec<WorkflowInstance>, CheckpointError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(&format!("list {}", self.root.display()), e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_err("list checkpoints", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint");
                    continue;
                }
            };
            match serde_json::from_slice::<WorkflowInstance>(&bytes) {
                Ok(inst) => records.push(inst),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping corrupt checkpoint");
                }
            }
        }
        Ok(records)
    }

    /// Load, mutate and persist one record under the write lock.
    async fn update<T>(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut WorkflowInstance) -> Result<T, CheckpointError>,
    ) -> Result<(WorkflowInstance, T), CheckpointError> {
        let _guard = self.write_lock.lock().await;
        let mut inst = self.read(id).await?;
        let changed = apply(&mut inst)?;
        self.write(&inst).await?;
        Ok((inst, changed))
    }
}

impl CheckpointRepository for FileCheckpointStore {
    async fn start(
        &self,
        workflow_name: &str,
        total_steps: usize,
        params: Value,
    ) -> Result<Uuid, CheckpointError> {
        let _guard = self.write_lock.lock().await;
        let existing = self.read_all().await?;
        transition::ensure_no_active(workflow_name, &existing)?;

        let inst = WorkflowInstance::new(workflow_name, total_steps, params);
        self.write(&inst).await?;
        Ok(inst.id)
    }

    async fn append_step(&self, id: Uuid, step: CompletedStep) -> Result<WorkflowInstance, CheckpointError> {
        self.update(id, |inst| transition::append_step(inst, step))
            .await
            .map(|(inst, _)| inst)
    }

    async fn mark_failed(&self, id: Uuid, failed: FailedStep) -> Result<WorkflowInstance, CheckpointError> {
        let _guard = self.write_lock.lock().await;
        let mut inst = self.read(id).await?;
        if transition::mark_failed(&mut inst, failed)? {
            self.write(&inst).await?;
        }
        Ok(inst)
    }

    async fn mark_completed(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        self.update(id, transition::mark_completed)
            .await
            .map(|(inst, _)| inst)
    }

    async fn load(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        self.read(id).await
    }

    async fn list_active_or_failed(&self) -> Result<Vec<WorkflowInstance>, CheckpointError> {
        let mut list: Vec<WorkflowInstance> = self
            .read_all()
            .await?
            .into_iter()
            .filter(transition::is_resumable_status)
            .collect();
        list.sort_by_key(|i| (i.created_at, i.id));
        Ok(list)
    }

    async fn list_for_workflow(&self, workflow_name: &str) -> Result<Vec<WorkflowInstance>, CheckpointError> {
        let mut list: Vec<WorkflowInstance> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|i| i.workflow_name == workflow_name)
            .collect();
        list.sort_by_key(|i| std::cmp::Reverse((i.created_at, i.id)));
        Ok(list)
    }

    async fn reopen(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        let _guard = self.write_lock.lock().await;
        let mut inst = self.read(id).await?;
        transition::reopen(&mut inst)?;

        let existing = self.read_all().await?;
        transition::ensure_no_active(
            &inst.workflow_name,
            existing.iter().filter(transition::others(id)),
        )?;

        self.write(&inst).await?;
        Ok(inst)
    }

    async fn request_cancel(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        self.update(id, transition::request_cancel)
            .await
            .map(|(inst, _)| inst)
    }
}
