//! SQLite checkpoint repository implementation.
//!
//! Implements `CheckpointRepository` from `waypoint-core`. Each instance is one
//! row whose `record` column holds the same JSON the file store writes;
//! `workflow_name`, `status` and the timestamps are duplicated into columns for
//! indexing. Every mutation is a single transaction on the writer pool, and the
//! partial unique index on in-progress names enforces the single-active rule
//! even between processes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;
use waypoint_core::repository::checkpoint::{CheckpointRepository, transition};
use waypoint_types::error::CheckpointError;
use waypoint_types::instance::{CompletedStep, FailedStep, InstanceStatus, WorkflowInstance};

use super::pool::CheckpointDb;

/// SQLite-backed implementation of `CheckpointRepository`.
pub struct SqliteCheckpointStore {
    pool: CheckpointDb,
}

impl SqliteCheckpointStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: CheckpointDb) -> Self {
        Self { pool }
    }

    /// Load, mutate and persist one record in a single write transaction.
    async fn update<T>(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut WorkflowInstance) -> Result<T, CheckpointError>,
    ) -> Result<(WorkflowInstance, T), CheckpointError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let row = sqlx::query("SELECT record FROM workflow_instances WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_err)?
            .ok_or(CheckpointError::NotFound(id))?;
        let mut inst = InstanceRow::from_row(&row)?.into_instance()?;

        let result = apply(&mut inst)?;
        write_row(&mut tx, &inst).await?;

        tx.commit().await.map_err(query_err)?;
        tracing::debug!(instance_id = %id, status = %inst.status, current_step = inst.current_step, "checkpoint committed");
        Ok((inst, result))
    }

    async fn select_many(&self, sql: &str, bind: Option<&str>) -> Result<Vec<WorkflowInstance>, CheckpointError> {
        let mut query = sqlx::query(sql);
        if let Some(value) = bind {
            query = query.bind(value.to_string());
        }
        let rows = query.fetch_all(&self.pool.reader).await.map_err(query_err)?;
        rows.iter()
            .map(|row| InstanceRow::from_row(row)?.into_instance())
            .collect()
    }

    async fn active_id(&self, workflow_name: &str) -> Result<Option<Uuid>, CheckpointError> {
        let row = sqlx::query(
            "SELECT id FROM workflow_instances WHERE workflow_name = ? AND status = 'in_progress'",
        )
        .bind(workflow_name)
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(query_err)?;

        row.map(|r| {
            let id: String = r.try_get("id").map_err(query_err)?;
            parse_uuid(&id)
        })
        .transpose()
    }

    /// Turn a unique-index violation into `AlreadyActive`, naming the
    /// instance that holds the slot.
    async fn conflict_or(&self, workflow_name: &str, err: sqlx::Error) -> CheckpointError {
        if !is_unique_violation(&err) {
            return query_err(err);
        }
        match self.active_id(workflow_name).await {
            Ok(Some(instance_id)) => CheckpointError::AlreadyActive {
                workflow: workflow_name.to_string(),
                instance_id,
            },
            Ok(None) => query_err(err),
            Err(e) => e,
        }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct InstanceRow {
    record: String,
}

impl InstanceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, CheckpointError> {
        Ok(Self {
            record: row.try_get("record").map_err(query_err)?,
        })
    }

    fn into_instance(self) -> Result<WorkflowInstance, CheckpointError> {
        serde_json::from_str(&self.record)
            .map_err(|e| CheckpointError::Storage(format!("invalid checkpoint record JSON: {e}")))
    }
}

async fn write_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    inst: &WorkflowInstance,
) -> Result<(), CheckpointError> {
    sqlx::query(
        "UPDATE workflow_instances SET status = ?, updated_at = ?, record = ? WHERE id = ?",
    )
    .bind(inst.status.as_str())
    .bind(format_datetime(&inst.updated_at))
    .bind(encode(inst)?)
    .bind(inst.id.to_string())
    .execute(&mut **tx)
    .await
    .map_err(query_err)?;
    Ok(())
}

fn encode(inst: &WorkflowInstance) -> Result<String, CheckpointError> {
    serde_json::to_string(inst).map_err(|e| CheckpointError::Storage(format!("encode record: {e}")))
}

fn query_err(e: sqlx::Error) -> CheckpointError {
    CheckpointError::Storage(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.message().contains("UNIQUE"),
        _ => false,
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, CheckpointError> {
    s.parse::<Uuid>()
        .map_err(|e| CheckpointError::Storage(format!("invalid UUID: {e}")))
}

/// Fixed-width RFC 3339 so lexical order matches time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl CheckpointRepository for SqliteCheckpointStore {
    async fn start(
        &self,
        workflow_name: &str,
        total_steps: usize,
        params: Value,
    ) -> Result<Uuid, CheckpointError> {
        if let Some(instance_id) = self.active_id(workflow_name).await? {
            return Err(CheckpointError::AlreadyActive {
                workflow: workflow_name.to_string(),
                instance_id,
            });
        }

        let inst = WorkflowInstance::new(workflow_name, total_steps, params);
        let result = sqlx::query(
            "INSERT INTO workflow_instances (id, workflow_name, status, created_at, updated_at, record)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(inst.id.to_string())
        .bind(&inst.workflow_name)
        .bind(InstanceStatus::InProgress.as_str())
        .bind(format_datetime(&inst.created_at))
        .bind(format_datetime(&inst.updated_at))
        .bind(encode(&inst)?)
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(inst.id),
            Err(e) => Err(self.conflict_or(workflow_name, e).await),
        }
    }

    async fn append_step(&self, id: Uuid, step: CompletedStep) -> Result<WorkflowInstance, CheckpointError> {
        self.update(id, |inst| transition::append_step(inst, step))
            .await
            .map(|(inst, _)| inst)
    }

    async fn mark_failed(&self, id: Uuid, failed: FailedStep) -> Result<WorkflowInstance, CheckpointError> {
        self.update(id, |inst| transition::mark_failed(inst, failed))
            .await
            .map(|(inst, _)| inst)
    }

    async fn mark_completed(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        self.update(id, transition::mark_completed)
            .await
            .map(|(inst, _)| inst)
    }

    async fn load(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        let row = sqlx::query("SELECT record FROM workflow_instances WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?
            .ok_or(CheckpointError::NotFound(id))?;
        InstanceRow::from_row(&row)?.into_instance()
    }

    async fn list_active_or_failed(&self) -> Result<Vec<WorkflowInstance>, CheckpointError> {
        self.select_many(
            "SELECT record FROM workflow_instances
             WHERE status IN ('in_progress', 'failed')
             ORDER BY created_at ASC, id ASC",
            None,
        )
        .await
    }

    async fn list_for_workflow(&self, workflow_name: &str) -> Result<Vec<WorkflowInstance>, CheckpointError> {
        self.select_many(
            "SELECT record FROM workflow_instances
             WHERE workflow_name = ?
             ORDER BY created_at DESC, id DESC",
            Some(workflow_name),
        )
        .await
    }

    async fn reopen(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let row = sqlx::query("SELECT record FROM workflow_instances WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_err)?
            .ok_or(CheckpointError::NotFound(id))?;
        let mut inst = InstanceRow::from_row(&row)?.into_instance()?;
        transition::reopen(&mut inst)?;

        if let Err(e) = write_row(&mut tx, &inst).await {
            // The unique index refused a second in-progress row for this name.
            drop(tx);
            return match self.active_id(&inst.workflow_name).await? {
                Some(instance_id) if instance_id != id => Err(CheckpointError::AlreadyActive {
                    workflow: inst.workflow_name.clone(),
                    instance_id,
                }),
                _ => Err(e),
            };
        }

        tx.commit().await.map_err(query_err)?;
        Ok(inst)
    }

    async fn request_cancel(&self, id: Uuid) -> Result<WorkflowInstance, CheckpointError> {
        self.update(id, transition::request_cancel)
            .await
            .map(|(inst, _)| inst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waypoint_types::instance::OutputHandle;
    use waypoint_types::outcome::FailureKind;

    async fn test_store(dir: &tempfile::TempDir) -> SqliteCheckpointStore {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        SqliteCheckpointStore::new(CheckpointDb::open(&url).await.unwrap())
    }

    fn step(index: usize, name: &str) -> CompletedStep {
        CompletedStep {
            index,
            name: name.to_string(),
            completed_at: Utc::now(),
            output: OutputHandle(format!("x/{index:02}_{name}.json")),
        }
    }

    fn failure(index: usize) -> FailedStep {
        FailedStep {
            index,
            name: "fetch".to_string(),
            kind: FailureKind::AuthFailure,
            error: "401 unauthorized".to_string(),
        }
    }

    #[tokio::test]
    async fn test_start_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        let id = store.start("digest", 2, json!({"target": "acme"})).await.unwrap();
        let inst = store.load(id).await.unwrap();
        assert_eq!(inst.workflow_name, "digest");
        assert_eq!(inst.status, InstanceStatus::InProgress);
        assert_eq!(inst.params["target"], "acme");
    }

    #[tokio::test]
    async fn test_second_active_instance_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        let first = store.start("digest", 2, json!({})).await.unwrap();
        let err = store.start("digest", 2, json!({})).await.unwrap_err();
        assert!(matches!(err, CheckpointError::AlreadyActive { instance_id, .. } if instance_id == first));

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM workflow_instances")
            .fetch_one(&store.pool.reader)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_unique_index_blocks_direct_insert() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        store.start("digest", 1, json!({})).await.unwrap();

        // Simulates a second process that skipped the pre-check.
        let err = sqlx::query(
            "INSERT INTO workflow_instances (id, workflow_name, status, created_at, updated_at, record)
             VALUES ('x', 'digest', 'in_progress', '', '', '{}')",
        )
        .execute(&store.pool.writer)
        .await
        .unwrap_err();
        assert!(is_unique_violation(&err));
        assert!(matches!(
            store.conflict_or("digest", err).await,
            CheckpointError::AlreadyActive { .. }
        ));
    }

    #[tokio::test]
    async fn test_append_complete_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let id = store.start("digest", 2, json!({})).await.unwrap();

        let err = store.append_step(id, step(1, "fetch")).await.unwrap_err();
        assert!(matches!(err, CheckpointError::OutOfOrder { expected: 0, got: 1 }));

        store.append_step(id, step(0, "search")).await.unwrap();
        let err = store.mark_completed(id).await.unwrap_err();
        assert!(matches!(err, CheckpointError::IncompleteSteps { current: 1, total: 2 }));

        store.append_step(id, step(1, "fetch")).await.unwrap();
        let done = store.mark_completed(id).await.unwrap();
        assert_eq!(done.status, InstanceStatus::Completed);
        assert_eq!(done.completed_steps.len(), 2);

        assert!(store.list_active_or_failed().await.unwrap().is_empty());
        // The name is free again.
        store.start("digest", 2, json!({})).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_then_reopened() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let id = store.start("digest", 3, json!({})).await.unwrap();
        store.append_step(id, step(0, "search")).await.unwrap();

        let failed = store.mark_failed(id, failure(1)).await.unwrap();
        assert_eq!(failed.status, InstanceStatus::Failed);
        assert_eq!(failed.failed_step.as_ref().unwrap().kind, FailureKind::AuthFailure);
        let again = store.mark_failed(id, failure(1)).await.unwrap();
        assert_eq!(again.status, InstanceStatus::Failed);

        let listed = store.list_active_or_failed().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);

        let reopened = store.reopen(id).await.unwrap();
        assert_eq!(reopened.status, InstanceStatus::InProgress);
        assert_eq!(reopened.current_step, 1);
        assert!(reopened.failed_step.is_none());
    }

    #[tokio::test]
    async fn test_reopen_blocked_by_active_instance() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let old = store.start("digest", 2, json!({})).await.unwrap();
        store.mark_failed(old, failure(0)).await.unwrap();
        let fresh = store.start("digest", 2, json!({})).await.unwrap();

        let err = store.reopen(old).await.unwrap_err();
        assert!(matches!(err, CheckpointError::AlreadyActive { instance_id, .. } if instance_id == fresh));
        assert_eq!(store.load(old).await.unwrap().status, InstanceStatus::Failed);
    }

    #[tokio::test]
    async fn test_list_for_workflow_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let a = store.start("digest", 0, json!({})).await.unwrap();
        store.mark_completed(a).await.unwrap();
        let b = store.start("digest", 0, json!({})).await.unwrap();
        store.start("other", 1, json!({})).await.unwrap();

        let ids: Vec<Uuid> = store
            .list_for_workflow("digest")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![b, a]);
    }

    #[tokio::test]
    async fn test_request_cancel_and_missing_instance() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;
        let id = store.start("digest", 1, json!({})).await.unwrap();
        assert!(store.request_cancel(id).await.unwrap().cancel_requested);
        assert!(store.load(id).await.unwrap().cancel_requested);

        assert!(matches!(
            store.request_cancel(Uuid::nil()).await,
            Err(CheckpointError::NotFound(_))
        ));
    }
}
