//! Step output storage trait.
//!
//! Outputs are kept out of the checkpoint record; the record only carries the
//! [`OutputHandle`] returned by [`OutputStore::put`]. A handle must stay
//! readable for as long as the instance record exists.

use std::future::Future;

use serde_json::Value;
use uuid::Uuid;
use waypoint_types::error::OutputStoreError;
use waypoint_types::instance::OutputHandle;

/// Durable storage for step outputs.
pub trait OutputStore: Send + Sync {
    /// Persist one step's output and return its handle. Writing the same
    /// `(instance_id, step_index)` again replaces the previous payload.
    fn put(
        &self,
        instance_id: Uuid,
        step_index: usize,
        step_name: &str,
        output: &Value,
    ) -> impl Future<Output = Result<OutputHandle, OutputStoreError>> + Send;

    fn get(&self, handle: &OutputHandle) -> impl Future<Output = Result<Value, OutputStoreError>> + Send;
}

impl<T: OutputStore> OutputStore for std::sync::Arc<T> {
    fn put(
        &self,
        instance_id: Uuid,
        step_index: usize,
        step_name: &str,
        output: &Value,
    ) -> impl Future<Output = Result<OutputHandle, OutputStoreError>> + Send {
        (**self).put(instance_id, step_index, step_name, output)
    }

    fn get(&self, handle: &OutputHandle) -> impl Future<Output = Result<Value, OutputStoreError>> + Send {
        (**self).get(handle)
    }
}

/// Relative handle used by every built-in store:
/// `<instance_id>/<NN>_<step_name>.json`.
pub fn output_handle(instance_id: Uuid, step_index: usize, step_name: &str) -> OutputHandle {
    let safe: String = step_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    OutputHandle(format!("{instance_id}/{step_index:02}_{safe}.json"))
}
