//! Transcript segment store

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use transcribe_core::TranscriptSegment;

use crate::db::Database;
use crate::error::PersistenceError;

/// Segment fields as produced by the transcription stage
#[derive(Debug, Clone)]
pub struct NewSegment {
    pub speaker_id: Option<i64>,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub confidence: Option<f32>,
}

#[async_trait]
pub trait SegmentStore: Send + Sync {
    /// Replace a file's segments in one transaction
    async fn replace_for_file(
        &self,
        media_file_id: i64,
        segments: &[NewSegment],
    ) -> Result<usize, PersistenceError>;

    /// All segments for a file, ordered by start time
    async fn list_for_file(
        &self,
        media_file_id: i64,
    ) -> Result<Vec<TranscriptSegment>, PersistenceError>;

    async fn count_for_file(&self, media_file_id: i64) -> Result<i64, PersistenceError>;
}

#[derive(Clone)]
pub struct PgSegmentStore {
    db: Database,
}

impl PgSegmentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn row_to_segment(row: &PgRow) -> Result<TranscriptSegment, PersistenceError> {
    Ok(TranscriptSegment {
        id: row.try_get("id")?,
        media_file_id: row.try_get("media_file_id")?,
        speaker_id: row.try_get("speaker_id")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        text: row.try_get("text")?,
        confidence: row.try_get("confidence")?,
    })
}

#[async_trait]
impl SegmentStore for PgSegmentStore {
    async fn replace_for_file(
        &self,
        media_file_id: i64,
        segments: &[NewSegment],
    ) -> Result<usize, PersistenceError> {
        let pool = self.db.pool().await;
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM transcript_segments WHERE media_file_id = $1")
            .bind(media_file_id)
            .execute(&mut *tx)
            .await?;

        for seg in segments {
            sqlx::query(
                "INSERT INTO transcript_segments
                     (media_file_id, speaker_id, start_time, end_time, text, confidence)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(media_file_id)
            .bind(seg.speaker_id)
            .bind(seg.start_time)
            .bind(seg.end_time)
            .bind(&seg.text)
            .bind(seg.confidence)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(segments.len())
    }

    async fn list_for_file(
        &self,
        media_file_id: i64,
    ) -> Result<Vec<TranscriptSegment>, PersistenceError> {
        let pool = self.db.pool().await;
        let rows = sqlx::query(
            "SELECT * FROM transcript_segments WHERE media_file_id = $1 ORDER BY start_time",
        )
        .bind(media_file_id)
        .fetch_all(&pool)
        .await?;
        rows.iter().map(row_to_segment).collect()
    }

    async fn count_for_file(&self, media_file_id: i64) -> Result<i64, PersistenceError> {
        let pool = self.db.pool().await;
        let n = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transcript_segments WHERE media_file_id = $1",
        )
        .bind(media_file_id)
        .fetch_one(&pool)
        .await?;
        Ok(n)
    }
}
