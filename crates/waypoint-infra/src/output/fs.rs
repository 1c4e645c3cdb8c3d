//! Filesystem output store.
//!
//! Outputs live at `<data_dir>/outputs/<instance_id>/<NN>_<step>.json`; the
//! handle is the path relative to the outputs root.

use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use uuid::Uuid;
use waypoint_core::repository::output::{OutputStore, output_handle};
use waypoint_types::error::OutputStoreError;
use waypoint_types::instance::OutputHandle;

use crate::filesystem::atomic_write_json;

pub struct FsOutputStore {
    root: PathBuf,
}

impl FsOutputStore {
    /// Store outputs under `{data_dir}/outputs`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("outputs"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a handle. Handles that would escape the root are
    /// rejected.
    pub fn path_for(&self, handle: &OutputHandle) -> Result<PathBuf, OutputStoreError> {
        let rel = Path::new(handle.as_str());
        let confined = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !confined || rel.as_os_str().is_empty() {
            return Err(OutputStoreError::NotFound(handle.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

impl OutputStore for FsOutputStore {
    async fn put(
        &self,
        instance_id: Uuid,
        step_index: usize,
        step_name: &str,
        output: &Value,
    ) -> Result<OutputHandle, OutputStoreError> {
        let handle = output_handle(instance_id, step_index, step_name);
        let path = self.path_for(&handle)?;
        atomic_write_json(&path, output)
            .await
            .map_err(|e| OutputStoreError::Storage(format!("write {}: {e}", path.display())))?;
        tracing::debug!(instance_id = %instance_id, step = step_name, path = %path.display(), "output written");
        Ok(handle)
    }

    async fn get(&self, handle: &OutputHandle) -> Result<Value, OutputStoreError> {
        let path = self.path_for(handle)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OutputStoreError::NotFound(handle.to_string()));
            }
            Err(e) => {
                return Err(OutputStoreError::Storage(format!("read {}: {e}", path.display())));
            }
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| OutputStoreError::Storage(format!("parse {}: {e}", path.display())))
    }
}
