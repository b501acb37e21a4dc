//! Task record store: the mirror of every submitted job

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use transcribe_core::{TaskKind, TaskRecord, TaskStatus};

use crate::db::Database;
use crate::error::PersistenceError;

/// Partial update applied atomically by [`TaskStore::update`]
#[derive(Debug, Default, Clone)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<f32>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

/// Status counts for one file's tasks, used by the recovery subsystem to
/// re-derive a consistent file state
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskAggregate {
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
}

impl TaskAggregate {
    pub fn active(&self) -> i64 {
        self.pending + self.in_progress
    }

    pub fn total(&self) -> i64 {
        self.pending + self.in_progress + self.completed + self.failed
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, record: &TaskRecord) -> Result<(), PersistenceError>;

    async fn get(&self, id: &str) -> Result<Option<TaskRecord>, PersistenceError>;

    /// Atomic update. Progress is monotone within a run: a lower value is
    /// kept only when the same update re-enters `in_progress` from
    /// `pending` (a retry). Terminal statuses stamp `completed_at`.
    async fn update(&self, id: &str, update: TaskUpdate) -> Result<TaskRecord, PersistenceError>;

    async fn mark_failed(&self, id: &str, message: &str) -> Result<(), PersistenceError>;

    async fn list_for_file(&self, media_file_id: i64)
        -> Result<Vec<TaskRecord>, PersistenceError>;

    async fn active_for_file(
        &self,
        media_file_id: i64,
    ) -> Result<Vec<TaskRecord>, PersistenceError>;

    async fn aggregate_for_file(
        &self,
        media_file_id: i64,
    ) -> Result<TaskAggregate, PersistenceError>;

    /// Active tasks whose `updated_at` predates the cutoff (stuck probe)
    async fn active_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, PersistenceError>;

    /// Every active task, consulted by boot-time orphan detection
    async fn all_active(&self) -> Result<Vec<TaskRecord>, PersistenceError>;
}

#[derive(Clone)]
pub struct PgTaskStore {
    db: Database,
}

impl PgTaskStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn row_to_task(row: &PgRow) -> Result<TaskRecord, PersistenceError> {
    let task_type: String = row.try_get("task_type")?;
    let status: String = row.try_get("status")?;
    Ok(TaskRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        media_file_id: row.try_get("media_file_id")?,
        task_type: TaskKind::parse(&task_type)?,
        status: TaskStatus::parse(&status)?,
        progress: row.try_get("progress")?,
        result: row.try_get("result")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, record: &TaskRecord) -> Result<(), PersistenceError> {
        let pool = self.db.pool().await;
        sqlx::query(
            "INSERT INTO tasks
                (id, user_id, media_file_id, task_type, status, progress, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7)",
        )
        .bind(&record.id)
        .bind(record.user_id)
        .bind(record.media_file_id)
        .bind(record.task_type.as_str())
        .bind(record.status.as_str())
        .bind(record.progress)
        .bind(record.created_at)
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<TaskRecord>, PersistenceError> {
        let pool = self.db.pool().await;
        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&pool)
            .await?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn update(&self, id: &str, update: TaskUpdate) -> Result<TaskRecord, PersistenceError> {
        let pool = self.db.pool().await;
        let mut tx = pool.begin().await?;

        let row = sqlx::query("SELECT * FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| PersistenceError::not_found("task", id))?;
        let current = row_to_task(&row)?;

        let new_status = update.status.unwrap_or(current.status);
        // A retry re-entry is the only place progress may regress
        let retry_reentry =
            current.status == TaskStatus::Pending && new_status == TaskStatus::InProgress;
        let new_progress = match update.progress {
            Some(p) if retry_reentry => p.clamp(0.0, 1.0),
            Some(p) => p.clamp(0.0, 1.0).max(current.progress),
            None => current.progress,
        };

        let now = Utc::now();
        let completed_at = if new_status.is_terminal() && current.completed_at.is_none() {
            Some(now)
        } else {
            current.completed_at
        };

        let row = sqlx::query(
            "UPDATE tasks
             SET status = $2, progress = $3,
                 error_message = COALESCE($4, error_message),
                 result = COALESCE($5, result),
                 updated_at = $6, completed_at = $7
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(new_status.as_str())
        .bind(new_progress)
        .bind(&update.error_message)
        .bind(&update.result)
        .bind(now)
        .bind(completed_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row_to_task(&row)
    }

    async fn mark_failed(&self, id: &str, message: &str) -> Result<(), PersistenceError> {
        self.update(
            id,
            TaskUpdate {
                status: Some(TaskStatus::Failed),
                error_message: Some(message.to_string()),
                ..Default::default()
            },
        )
        .await?;
        Ok(())
    }

    async fn list_for_file(
        &self,
        media_file_id: i64,
    ) -> Result<Vec<TaskRecord>, PersistenceError> {
        let pool = self.db.pool().await;
        let rows = sqlx::query("SELECT * FROM tasks WHERE media_file_id = $1 ORDER BY created_at")
            .bind(media_file_id)
            .fetch_all(&pool)
            .await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn active_for_file(
        &self,
        media_file_id: i64,
    ) -> Result<Vec<TaskRecord>, PersistenceError> {
        let pool = self.db.pool().await;
        let rows = sqlx::query(
            "SELECT * FROM tasks
             WHERE media_file_id = $1 AND status IN ('pending', 'in_progress')
             ORDER BY created_at",
        )
        .bind(media_file_id)
        .fetch_all(&pool)
        .await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn aggregate_for_file(
        &self,
        media_file_id: i64,
    ) -> Result<TaskAggregate, PersistenceError> {
        let pool = self.db.pool().await;
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS n FROM tasks WHERE media_file_id = $1 GROUP BY status")
                .bind(media_file_id)
                .fetch_all(&pool)
                .await?;

        let mut agg = TaskAggregate::default();
        for row in &rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            match TaskStatus::parse(&status)? {
                TaskStatus::Pending => agg.pending = n,
                TaskStatus::InProgress => agg.in_progress = n,
                TaskStatus::Completed => agg.completed = n,
                TaskStatus::Failed => agg.failed = n,
            }
        }
        Ok(agg)
    }

    async fn active_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, PersistenceError> {
        let pool = self.db.pool().await;
        let rows = sqlx::query(
            "SELECT * FROM tasks
             WHERE status IN ('pending', 'in_progress') AND updated_at < $1
             ORDER BY updated_at",
        )
        .bind(cutoff)
        .fetch_all(&pool)
        .await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn all_active(&self) -> Result<Vec<TaskRecord>, PersistenceError> {
        let pool = self.db.pool().await;
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE status IN ('pending', 'in_progress') ORDER BY created_at",
        )
        .fetch_all(&pool)
        .await?;
        rows.iter().map(row_to_task).collect()
    }
}
