//! Media file store: CRUD, lifecycle transitions, and recovery queries

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use transcribe_core::{FileStatus, MediaFile};
use uuid::Uuid;

use crate::db::Database;
use crate::error::PersistenceError;

/// Fields supplied at ingest time
#[derive(Debug, Clone)]
pub struct NewMediaFile {
    pub user_id: i64,
    pub filename: String,
    pub storage_path: String,
    pub content_type: String,
    pub file_size: i64,
    pub duration: Option<f64>,
    pub title: Option<String>,
    pub source_url: Option<String>,
    pub file_hash: Option<String>,
}

#[async_trait]
pub trait MediaFileStore: Send + Sync {
    /// Insert a new file in `Pending`. Rejects a duplicate `file_hash` for
    /// the same user unless every other copy is in a failed state.
    async fn create(&self, new: NewMediaFile) -> Result<MediaFile, PersistenceError>;

    async fn get(&self, id: i64) -> Result<Option<MediaFile>, PersistenceError>;

    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<MediaFile>, PersistenceError>;

    /// Apply a lifecycle transition and its side effects: entering
    /// `Processing` stamps `task_started_at`; `Completed` stamps
    /// `completed_at` and clears the error; `Error` keeps the message set
    /// via [`set_error`]; `Orphaned` stamps `last_recovery_attempt`.
    async fn transition(&self, id: i64, to: FileStatus) -> Result<MediaFile, PersistenceError>;

    /// Move to `Error` with a categorized message
    async fn set_error(&self, id: i64, message: &str) -> Result<(), PersistenceError>;

    /// Recovery gave up: move to `Orphaned`, optionally flag for deletion
    async fn mark_orphaned(&self, id: i64, force_delete: bool) -> Result<(), PersistenceError>;

    async fn increment_recovery_attempts(&self, id: i64) -> Result<i32, PersistenceError>;

    async fn set_force_delete_eligible(&self, id: i64) -> Result<(), PersistenceError>;

    async fn set_duration(&self, id: i64, duration: f64) -> Result<(), PersistenceError>;

    async fn set_waveform_data(
        &self,
        id: i64,
        waveform: serde_json::Value,
    ) -> Result<(), PersistenceError>;

    async fn set_file_facts(
        &self,
        id: i64,
        file_size: i64,
        file_hash: &str,
    ) -> Result<(), PersistenceError>;

    async fn list_by_status(&self, status: FileStatus) -> Result<Vec<MediaFile>, PersistenceError>;

    /// Files in `Processing` whose `task_started_at` predates the cutoff
    async fn processing_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MediaFile>, PersistenceError>;

    /// Files in `Processing` uploaded before the cutoff (abandoned check)
    async fn uploaded_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MediaFile>, PersistenceError>;

    /// Orphans whose last recovery attempt is older than the threshold
    async fn orphaned_older_than(
        &self,
        threshold: Duration,
    ) -> Result<Vec<MediaFile>, PersistenceError>;

    /// Files flagged `force_delete_eligible` in a failed state
    async fn force_delete_candidates(&self) -> Result<Vec<MediaFile>, PersistenceError>;

    async fn count_by_status(&self) -> Result<Vec<(FileStatus, i64)>, PersistenceError>;

    /// Delete the row; owned entities cascade in the schema
    async fn delete(&self, id: i64) -> Result<(), PersistenceError>;
}

/// PostgreSQL implementation
#[derive(Clone)]
pub struct PgMediaFileStore {
    db: Database,
}

impl PgMediaFileStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

pub(crate) fn row_to_media_file(row: &PgRow) -> Result<MediaFile, PersistenceError> {
    let status: String = row.try_get("status")?;
    Ok(MediaFile {
        id: row.try_get("id")?,
        uuid: row.try_get("uuid")?,
        user_id: row.try_get("user_id")?,
        filename: row.try_get("filename")?,
        storage_path: row.try_get("storage_path")?,
        file_size: row.try_get("file_size")?,
        duration: row.try_get("duration")?,
        content_type: row.try_get("content_type")?,
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        description: row.try_get("description")?,
        source_url: row.try_get("source_url")?,
        status: FileStatus::parse(&status)?,
        recovery_attempts: row.try_get("recovery_attempts")?,
        upload_time: row.try_get("upload_time")?,
        task_started_at: row.try_get("task_started_at")?,
        completed_at: row.try_get("completed_at")?,
        last_recovery_attempt: row.try_get("last_recovery_attempt")?,
        last_error_message: row.try_get("last_error_message")?,
        force_delete_eligible: row.try_get("force_delete_eligible")?,
        waveform_data: row.try_get("waveform_data")?,
        thumbnail_path: row.try_get("thumbnail_path")?,
        file_hash: row.try_get("file_hash")?,
        metadata_raw: row.try_get("metadata_raw")?,
        metadata_important: row.try_get("metadata_important")?,
    })
}

const SELECT_FILE: &str = "SELECT * FROM media_files";

#[async_trait]
impl MediaFileStore for PgMediaFileStore {
    async fn create(&self, new: NewMediaFile) -> Result<MediaFile, PersistenceError> {
        let pool = self.db.pool().await;
        let mut tx = pool.begin().await?;

        // Duplicate-hash check: only non-failed copies block a re-upload
        if let Some(ref hash) = new.file_hash {
            let blocking: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM media_files
                 WHERE user_id = $1 AND file_hash = $2
                   AND status NOT IN ('error', 'cancelled', 'orphaned')
                 LIMIT 1",
            )
            .bind(new.user_id)
            .bind(hash)
            .fetch_optional(&mut *tx)
            .await?;

            if blocking.is_some() {
                return Err(PersistenceError::DuplicateHash {
                    hash: hash.clone(),
                    user_id: new.user_id,
                });
            }
        }

        let row = sqlx::query(
            "INSERT INTO media_files
                (uuid, user_id, filename, storage_path, content_type, file_size,
                 duration, title, source_url, file_hash, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending')
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(&new.filename)
        .bind(&new.storage_path)
        .bind(&new.content_type)
        .bind(new.file_size)
        .bind(new.duration)
        .bind(&new.title)
        .bind(&new.source_url)
        .bind(&new.file_hash)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row_to_media_file(&row)
    }

    async fn get(&self, id: i64) -> Result<Option<MediaFile>, PersistenceError> {
        let pool = self.db.pool().await;
        let row = sqlx::query(&format!("{SELECT_FILE} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&pool)
            .await?;
        row.as_ref().map(row_to_media_file).transpose()
    }

    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<MediaFile>, PersistenceError> {
        let pool = self.db.pool().await;
        let row = sqlx::query(&format!("{SELECT_FILE} WHERE uuid = $1"))
            .bind(uuid)
            .fetch_optional(&pool)
            .await?;
        row.as_ref().map(row_to_media_file).transpose()
    }

    async fn transition(&self, id: i64, to: FileStatus) -> Result<MediaFile, PersistenceError> {
        let pool = self.db.pool().await;
        let mut tx = pool.begin().await?;

        let row = sqlx::query("SELECT status FROM media_files WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| PersistenceError::not_found("media file", id))?;
        let from = FileStatus::parse(row.try_get::<String, _>("status")?.as_str())?;

        if from != to && !from.can_transition_to(to) {
            return Err(PersistenceError::InvalidTransition {
                file_id: id,
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        let now = Utc::now();
        let row = match to {
            FileStatus::Processing => {
                sqlx::query(
                    "UPDATE media_files SET status = $2, task_started_at = $3
                     WHERE id = $1 RETURNING *",
                )
                .bind(id)
                .bind(to.as_str())
                .bind(now)
                .fetch_one(&mut *tx)
                .await?
            },
            FileStatus::Completed => {
                sqlx::query(
                    "UPDATE media_files
                     SET status = $2, completed_at = $3, last_error_message = NULL
                     WHERE id = $1 RETURNING *",
                )
                .bind(id)
                .bind(to.as_str())
                .bind(now)
                .fetch_one(&mut *tx)
                .await?
            },
            FileStatus::Orphaned => {
                sqlx::query(
                    "UPDATE media_files SET status = $2, last_recovery_attempt = $3
                     WHERE id = $1 RETURNING *",
                )
                .bind(id)
                .bind(to.as_str())
                .bind(now)
                .fetch_one(&mut *tx)
                .await?
            },
            _ => {
                sqlx::query("UPDATE media_files SET status = $2 WHERE id = $1 RETURNING *")
                    .bind(id)
                    .bind(to.as_str())
                    .fetch_one(&mut *tx)
                    .await?
            },
        };

        tx.commit().await?;
        row_to_media_file(&row)
    }

    async fn set_error(&self, id: i64, message: &str) -> Result<(), PersistenceError> {
        let pool = self.db.pool().await;
        sqlx::query(
            "UPDATE media_files SET status = 'error', last_error_message = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(message)
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn mark_orphaned(&self, id: i64, force_delete: bool) -> Result<(), PersistenceError> {
        let pool = self.db.pool().await;
        sqlx::query(
            "UPDATE media_files
             SET status = 'orphaned', last_recovery_attempt = $2, force_delete_eligible = $3
             WHERE id = $1",
        )
        .bind(id)
        .bind(Utc::now())
        .bind(force_delete)
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn increment_recovery_attempts(&self, id: i64) -> Result<i32, PersistenceError> {
        let pool = self.db.pool().await;
        let attempts: i32 = sqlx::query_scalar(
            "UPDATE media_files
             SET recovery_attempts = recovery_attempts + 1, last_recovery_attempt = $2
             WHERE id = $1
             RETURNING recovery_attempts",
        )
        .bind(id)
        .bind(Utc::now())
        .fetch_one(&pool)
        .await?;
        Ok(attempts)
    }

    async fn set_force_delete_eligible(&self, id: i64) -> Result<(), PersistenceError> {
        let pool = self.db.pool().await;
        sqlx::query("UPDATE media_files SET force_delete_eligible = TRUE WHERE id = $1")
            .bind(id)
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn set_duration(&self, id: i64, duration: f64) -> Result<(), PersistenceError> {
        let pool = self.db.pool().await;
        sqlx::query("UPDATE media_files SET duration = $2 WHERE id = $1")
            .bind(id)
            .bind(duration)
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn set_waveform_data(
        &self,
        id: i64,
        waveform: serde_json::Value,
    ) -> Result<(), PersistenceError> {
        let pool = self.db.pool().await;
        sqlx::query("UPDATE media_files SET waveform_data = $2 WHERE id = $1")
            .bind(id)
            .bind(waveform)
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn set_file_facts(
        &self,
        id: i64,
        file_size: i64,
        file_hash: &str,
    ) -> Result<(), PersistenceError> {
        let pool = self.db.pool().await;
        sqlx::query("UPDATE media_files SET file_size = $2, file_hash = $3 WHERE id = $1")
            .bind(id)
            .bind(file_size)
            .bind(file_hash)
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn list_by_status(&self, status: FileStatus) -> Result<Vec<MediaFile>, PersistenceError> {
        let pool = self.db.pool().await;
        let rows = sqlx::query(&format!("{SELECT_FILE} WHERE status = $1 ORDER BY id"))
            .bind(status.as_str())
            .fetch_all(&pool)
            .await?;
        rows.iter().map(row_to_media_file).collect()
    }

    async fn processing_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MediaFile>, PersistenceError> {
        let pool = self.db.pool().await;
        let rows = sqlx::query(&format!(
            "{SELECT_FILE} WHERE status = 'processing' AND task_started_at < $1 ORDER BY id"
        ))
        .bind(cutoff)
        .fetch_all(&pool)
        .await?;
        rows.iter().map(row_to_media_file).collect()
    }

    async fn uploaded_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MediaFile>, PersistenceError> {
        let pool = self.db.pool().await;
        let rows = sqlx::query(&format!(
            "{SELECT_FILE} WHERE status = 'processing' AND upload_time < $1 ORDER BY id"
        ))
        .bind(cutoff)
        .fetch_all(&pool)
        .await?;
        rows.iter().map(row_to_media_file).collect()
    }

    async fn orphaned_older_than(
        &self,
        threshold: Duration,
    ) -> Result<Vec<MediaFile>, PersistenceError> {
        let pool = self.db.pool().await;
        let cutoff = Utc::now() - threshold;
        let rows = sqlx::query(&format!(
            "{SELECT_FILE} WHERE status = 'orphaned' AND last_recovery_attempt < $1 ORDER BY id"
        ))
        .bind(cutoff)
        .fetch_all(&pool)
        .await?;
        rows.iter().map(row_to_media_file).collect()
    }

    async fn force_delete_candidates(&self) -> Result<Vec<MediaFile>, PersistenceError> {
        let pool = self.db.pool().await;
        let rows = sqlx::query(&format!(
            "{SELECT_FILE} WHERE force_delete_eligible AND status IN ('orphaned', 'error')
             ORDER BY id"
        ))
        .fetch_all(&pool)
        .await?;
        rows.iter().map(row_to_media_file).collect()
    }

    async fn count_by_status(&self) -> Result<Vec<(FileStatus, i64)>, PersistenceError> {
        let pool = self.db.pool().await;
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM media_files GROUP BY status")
            .fetch_all(&pool)
            .await?;
        rows.iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                let n: i64 = row.try_get("n")?;
                Ok((FileStatus::parse(&status)?, n))
            })
            .collect()
    }

    async fn delete(&self, id: i64) -> Result<(), PersistenceError> {
        let pool = self.db.pool().await;
        sqlx::query("DELETE FROM media_files WHERE id = $1")
            .bind(id)
            .execute(&pool)
            .await?;
        Ok(())
    }
}
