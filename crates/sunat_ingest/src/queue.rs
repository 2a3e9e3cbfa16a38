//! Durable task queue
//!
//! Phase 1 appends PENDING tasks; Phase 2 takes a snapshot of them and marks
//! each one PROCESSED or ERROR. Both are terminal: a failed file comes back
//! only as a new PENDING row. One orchestrator process is assumed, so there
//! is no claiming or leasing.

use super::db::{open_sqlite, open_sqlite_memory};
use super::error::{IngestError, Result};
use super::provenance::ProvenanceLocator;
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Processed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processed => "PROCESSED",
            TaskStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(TaskStatus::Pending),
            "PROCESSED" => Ok(TaskStatus::Processed),
            "ERROR" => Ok(TaskStatus::Error),
            other => Err(IngestError::InvalidState(format!("unknown task status: {}", other))),
        }
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    file_name: String,
    provenance: String,
    status: String,
    created_at: String,
    updated_at: String,
    error_message: Option<String>,
}

/// A queued unit of work.
///
/// The provenance is kept as stored; decoding happens when the task runs so a
/// bad locator fails that task alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: i64,
    pub file_name: String,
    pub provenance: String,
    pub status: TaskStatus,
    pub created_at: String,
    pub updated_at: String,
    pub error_message: Option<String>,
}

impl Task {
    pub fn locator(&self) -> Result<ProvenanceLocator> {
        ProvenanceLocator::decode(&self.provenance)
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = IngestError;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: row.id,
            file_name: row.file_name,
            provenance: row.provenance,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            error_message: row.error_message,
        })
    }
}

/// What `enqueue` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created(i64),
    /// An identical PENDING task already existed
    AlreadyPending(i64),
}

impl EnqueueOutcome {
    pub fn task_id(&self) -> i64 {
        match self {
            EnqueueOutcome::Created(id) | EnqueueOutcome::AlreadyPending(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, EnqueueOutcome::Created(_))
    }
}

/// Queue counters by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct QueueStats {
    pub pending: i64,
    pub processed: i64,
    pub error: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.pending + self.processed + self.error
    }
}

const TASK_COLUMNS: &str =
    "id, file_name, provenance, status, created_at, updated_at, error_message";

pub struct TaskQueue {
    pool: SqlitePool,
}

impl TaskQueue {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let queue = Self::new(open_sqlite(path).await?);
        queue.ensure_schema().await?;
        Ok(queue)
    }

    pub async fn open_in_memory() -> Result<Self> {
        let queue = Self::new(open_sqlite_memory().await?);
        queue.ensure_schema().await?;
        Ok(queue)
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_name TEXT NOT NULL,
                provenance TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status, id)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Append a PENDING task, unless an identical one is already pending.
    pub async fn enqueue(&self, file_name: &str, provenance: &ProvenanceLocator) -> Result<EnqueueOutcome> {
        let encoded = provenance.encode()?;
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM tasks
            WHERE file_name = ? AND provenance = ? AND status = 'PENDING'
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(file_name)
        .bind(&encoded)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(id) = existing {
            tx.commit().await?;
            debug!(task_id = id, file = %file_name, "Task already pending");
            return Ok(EnqueueOutcome::AlreadyPending(id));
        }

        let now = Utc::now().to_rfc3339();
        let id = sqlx::query(
            r#"
            INSERT INTO tasks (file_name, provenance, status, created_at, updated_at)
            VALUES (?, ?, 'PENDING', ?, ?)
            "#,
        )
        .bind(file_name)
        .bind(&encoded)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;
        info!(task_id = id, file = %file_name, provenance = %provenance, "Task enqueued");
        Ok(EnqueueOutcome::Created(id))
    }

    /// Snapshot of every PENDING task, oldest first.
    pub async fn dequeue_pending(&self) -> Result<Vec<Task>> {
        self.list(Some(TaskStatus::Pending), None).await
    }

    /// Move a PENDING task to a terminal status.
    pub async fn mark(&self, task_id: i64, status: TaskStatus, error_message: Option<&str>) -> Result<()> {
        if !status.is_terminal() {
            return Err(IngestError::InvalidState(format!(
                "task {} cannot be marked {}",
                task_id, status
            )));
        }

        let now = Utc::now().to_rfc3339();
        let rows_affected = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?,
                updated_at = ?,
                error_message = ?
            WHERE id = ? AND status = 'PENDING'
            "#,
        )
        .bind(status.as_str())
        .bind(&now)
        .bind(error_message)
        .bind(task_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(IngestError::InvalidState(format!(
                "task {} is not pending",
                task_id
            )));
        }
        debug!(task_id, status = %status, "Task marked");
        Ok(())
    }

    /// Re-enqueue an ERROR task as a new PENDING row. The failed row stays.
    pub async fn requeue(&self, task_id: i64) -> Result<EnqueueOutcome> {
        let task = self
            .get(task_id)
            .await?
            .ok_or_else(|| IngestError::InvalidState(format!("task {} not found", task_id)))?;

        if task.status != TaskStatus::Error {
            return Err(IngestError::InvalidState(format!(
                "task {} is {}, only ERROR tasks can be retried",
                task_id, task.status
            )));
        }

        let outcome = self.enqueue(&task.file_name, &task.locator()?).await?;
        info!(task_id, new_task_id = outcome.task_id(), "Task requeued");
        Ok(outcome)
    }

    pub async fn get(&self, task_id: i64) -> Result<Option<Task>> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS);
        let row: Option<TaskRow> = sqlx::query_as(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Task::try_from).transpose()
    }

    /// Tasks ordered by id, optionally filtered by status.
    pub async fn list(&self, status: Option<TaskStatus>, limit: Option<i64>) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE (?1 IS NULL OR status = ?1) ORDER BY id ASC LIMIT ?2",
            TASK_COLUMNS
        );
        let rows: Vec<TaskRow> = sqlx::query_as(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(limit.unwrap_or(-1))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let stats: QueueStats = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'PENDING') as pending,
                COUNT(*) FILTER (WHERE status = 'PROCESSED') as processed,
                COUNT(*) FILTER (WHERE status = 'ERROR') as error
            FROM tasks
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }
}
