//! Process-local checkpoint and output stores.
//!
//! Not durable across restarts. Used by tests and by embedders that only need
//! the runner's retry and fallback behavior.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use uuid::Uuid;
use waypoint_types::error::{CheckpointError, OutputStoreError};
use waypoint_types::instance::{CompletedStep, FailedStep, OutputHandle, WorkflowInstance};

use super::checkpoint::{CheckpointRepository, transition};
use super::output::{OutputStore, output_handle};

// ---------------------------------------------------------------------------
// MemoryCheckpointStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: Mutex<HashMap<Uuid, WorkflowInstance>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records ever created (any status).
    pub fn len(&self) -> usize {
        self.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, WorkflowInstance>>, CheckpointError> {
        self.records
            .lock()
            .map_err(|_| CheckpointError::Storage("checkpoint store lock poisoned".to_string()))
    }

    /// Load, mutate and store one record under the lock.
    fn update<T>(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut WorkflowInstance) -> Result<T, CheckpointError>,
    ) -> Result<WorkflowInstance, CheckpointError> {
        let mut records = self.lock()?;
        let mut inst = records.get(&id).cloned().ok_or(CheckpointError::NotFound(id))?;
        apply(&mut inst)?;
        records.insert(id, inst.clone());
        Ok(inst)
    }
}

impl CheckpointRepository for MemoryCheckpointStore {
    async fn start(
        &self,
        workflow_name: &str,
        total_steps: usize,
        params: Value,
    ) -> Result<Uuid, CheckpointError> {
        let mut records = self.lock()?;
        transition::ensure_no_active(workflow_name, records.values())?;
        let inst = WorkflowInstance::new(workflow_name, total_steps, params);
        let id = inst.id;
        records.insert(id, inst);
        Ok(id)
    }

    async fn append_step(&self, id: Uuid, step: CompletedStep) -> Result<WorkflowInstance, CheckpointError> {
        self.update(id, |inst| transition::append_step(inst, step))
    }

    async fn mark_failed(&self, id: Uuid, failed: FailedStep) -> Result<WorkflowInstance, CheckpointError> {
        self.update(id, |inst| transition::mark_failed(inst, failed))
    }

    async fn mark_completed(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        self.update(id, transition::mark_completed)
    }

    async fn load(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        self.lock()?.get(&id).cloned().ok_or(CheckpointError::NotFound(id))
    }

    async fn list_active_or_failed(&self) -> Result<Vec<WorkflowInstance>, CheckpointError> {
        let mut list: Vec<WorkflowInstance> = self
            .lock()?
            .values()
            .filter(|i| transition::is_resumable_status(i))
            .cloned()
            .collect();
        list.sort_by_key(|i| (i.created_at, i.id));
        Ok(list)
    }

    async fn list_for_workflow(&self, workflow_name: &str) -> Result<Vec<WorkflowInstance>, CheckpointError> {
        let mut list: Vec<WorkflowInstance> = self
            .lock()?
            .values()
            .filter(|i| i.workflow_name == workflow_name)
            .cloned()
            .collect();
        list.sort_by_key(|i| std::cmp::Reverse((i.created_at, i.id)));
        Ok(list)
    }

    async fn reopen(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        let mut records = self.lock()?;
        let mut inst = records.get(&id).cloned().ok_or(CheckpointError::NotFound(id))?;
        transition::reopen(&mut inst)?;
        transition::ensure_no_active(
            &inst.workflow_name,
            records.values().filter(transition::others(id)),
        )?;
        records.insert(id, inst.clone());
        Ok(inst)
    }

    async fn request_cancel(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        self.update(id, transition::request_cancel)
    }
}

// ---------------------------------------------------------------------------
// MemoryOutputStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryOutputStore {
    outputs: Mutex<HashMap<OutputHandle, Value>>,
}

impl MemoryOutputStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputStore for MemoryOutputStore {
    async fn put(
        &self,
        instance_id: Uuid,
        step_index: usize,
        step_name: &str,
        output: &Value,
    ) -> Result<OutputHandle, OutputStoreError> {
        let handle = output_handle(instance_id, step_index, step_name);
        self.outputs
            .lock()
            .map_err(|_| OutputStoreError::Storage("output store lock poisoned".to_string()))?
            .insert(handle.clone(), output.clone());
        Ok(handle)
    }

    async fn get(&self, handle: &OutputHandle) -> Result<Value, OutputStoreError> {
        self.outputs
            .lock()
            .map_err(|_| OutputStoreError::Storage("output store lock poisoned".to_string()))?
            .get(handle)
            .cloned()
            .ok_or_else(|| OutputStoreError::NotFound(handle.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
