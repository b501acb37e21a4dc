//! Speaker, speaker profile, and cross-file match stores

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::Row;
use transcribe_core::{Speaker, SpeakerMatch, SpeakerProfile};

use crate::db::Database;
use crate::error::PersistenceError;

/// Naming fields applied when a match or a user resolves a speaker
#[derive(Debug, Default, Clone)]
pub struct SpeakerNaming {
    pub display_name: Option<String>,
    pub suggested_name: Option<String>,
    pub confidence: Option<f32>,
    pub verified: Option<bool>,
    /// `Some(None)` clears the profile link
    pub profile_id: Option<Option<i64>>,
}

#[async_trait]
pub trait SpeakerStore: Send + Sync {
    /// Insert per-file speaker rows for the given diarization labels,
    /// returning them in input order
    async fn create_for_file(
        &self,
        media_file_id: i64,
        user_id: i64,
        labels: &[String],
    ) -> Result<Vec<Speaker>, PersistenceError>;

    async fn get(&self, id: i64) -> Result<Option<Speaker>, PersistenceError>;

    async fn list_for_file(&self, media_file_id: i64) -> Result<Vec<Speaker>, PersistenceError>;

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Speaker>, PersistenceError>;

    async fn list_for_profile(&self, profile_id: i64) -> Result<Vec<Speaker>, PersistenceError>;

    /// Apply naming/verification/profile updates
    async fn apply_naming(&self, id: i64, naming: SpeakerNaming) -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait SpeakerProfileStore: Send + Sync {
    async fn create(&self, profile: &SpeakerProfile) -> Result<SpeakerProfile, PersistenceError>;

    async fn get(&self, id: i64) -> Result<Option<SpeakerProfile>, PersistenceError>;

    /// Case-insensitive name lookup within a user's profiles
    async fn find_by_name(
        &self,
        user_id: i64,
        name: &str,
    ) -> Result<Option<SpeakerProfile>, PersistenceError>;

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<SpeakerProfile>, PersistenceError>;

    async fn set_embedding_count(&self, id: i64, count: i32) -> Result<(), PersistenceError>;

    /// Delete the profile; speakers keep their rows with `profile_id`
    /// nulled by the schema
    async fn delete(&self, id: i64) -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait SpeakerMatchStore: Send + Sync {
    /// Upsert with max-confidence semantics; the pair is stored ordered so
    /// concurrent upserts commute
    async fn upsert(&self, m: SpeakerMatch) -> Result<(), PersistenceError>;

    async fn list_for_speaker(&self, speaker_id: i64)
        -> Result<Vec<SpeakerMatch>, PersistenceError>;
}

#[derive(Clone)]
pub struct PgSpeakerStore {
    db: Database,
}

#[derive(Clone)]
pub struct PgSpeakerProfileStore {
    db: Database,
}

#[derive(Clone)]
pub struct PgSpeakerMatchStore {
    db: Database,
}

impl PgSpeakerStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl PgSpeakerProfileStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl PgSpeakerMatchStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn row_to_speaker(row: &PgRow) -> Result<Speaker, PersistenceError> {
    Ok(Speaker {
        id: row.try_get("id")?,
        media_file_id: row.try_get("media_file_id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        display_name: row.try_get("display_name")?,
        suggested_name: row.try_get("suggested_name")?,
        confidence: row.try_get("confidence")?,
        verified: row.try_get("verified")?,
        profile_id: row.try_get("profile_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_profile(row: &PgRow) -> Result<SpeakerProfile, PersistenceError> {
    Ok(SpeakerProfile {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        embedding_count: row.try_get("embedding_count")?,
        last_embedding_update: row.try_get("last_embedding_update")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl SpeakerStore for PgSpeakerStore {
    async fn create_for_file(
        &self,
        media_file_id: i64,
        user_id: i64,
        labels: &[String],
    ) -> Result<Vec<Speaker>, PersistenceError> {
        let pool = self.db.pool().await;
        let mut tx = pool.begin().await?;
        let mut speakers = Vec::with_capacity(labels.len());

        for label in labels {
            let row = sqlx::query(
                "INSERT INTO speakers (media_file_id, user_id, name)
                 VALUES ($1, $2, $3) RETURNING *",
            )
            .bind(media_file_id)
            .bind(user_id)
            .bind(label)
            .fetch_one(&mut *tx)
            .await?;
            speakers.push(row_to_speaker(&row)?);
        }

        tx.commit().await?;
        Ok(speakers)
    }

    async fn get(&self, id: i64) -> Result<Option<Speaker>, PersistenceError> {
        let pool = self.db.pool().await;
        let row = sqlx::query("SELECT * FROM speakers WHERE id = $1")
            .bind(id)
            .fetch_optional(&pool)
            .await?;
        row.as_ref().map(row_to_speaker).transpose()
    }

    async fn list_for_file(&self, media_file_id: i64) -> Result<Vec<Speaker>, PersistenceError> {
        let pool = self.db.pool().await;
        let rows = sqlx::query("SELECT * FROM speakers WHERE media_file_id = $1 ORDER BY id")
            .bind(media_file_id)
            .fetch_all(&pool)
            .await?;
        rows.iter().map(row_to_speaker).collect()
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Speaker>, PersistenceError> {
        let pool = self.db.pool().await;
        let rows = sqlx::query("SELECT * FROM speakers WHERE user_id = $1 ORDER BY id")
            .bind(user_id)
            .fetch_all(&pool)
            .await?;
        rows.iter().map(row_to_speaker).collect()
    }

    async fn list_for_profile(&self, profile_id: i64) -> Result<Vec<Speaker>, PersistenceError> {
        let pool = self.db.pool().await;
        let rows = sqlx::query("SELECT * FROM speakers WHERE profile_id = $1 ORDER BY id")
            .bind(profile_id)
            .fetch_all(&pool)
            .await?;
        rows.iter().map(row_to_speaker).collect()
    }

    async fn apply_naming(&self, id: i64, naming: SpeakerNaming) -> Result<(), PersistenceError> {
        let pool = self.db.pool().await;
        let mut tx = pool.begin().await?;

        let row = sqlx::query("SELECT * FROM speakers WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| PersistenceError::not_found("speaker", id))?;
        let current = row_to_speaker(&row)?;

        // a linked profile must belong to the same user
        if let Some(Some(profile_id)) = naming.profile_id {
            let owner: Option<i64> =
                sqlx::query_scalar("SELECT user_id FROM speaker_profiles WHERE id = $1")
                    .bind(profile_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            match owner {
                Some(uid) if uid == current.user_id => {},
                Some(_) | None => {
                    return Err(PersistenceError::not_found("speaker profile", profile_id))
                },
            }
        }

        let display_name = naming.display_name.or(current.display_name);
        let suggested_name = naming.suggested_name.or(current.suggested_name);
        let confidence = naming.confidence.or(current.confidence);
        let verified = naming.verified.unwrap_or(current.verified);
        let profile_id = match naming.profile_id {
            Some(p) => p,
            None => current.profile_id,
        };

        sqlx::query(
            "UPDATE speakers
             SET display_name = $2, suggested_name = $3, confidence = $4,
                 verified = $5, profile_id = $6
             WHERE id = $1",
        )
        .bind(id)
        .bind(&display_name)
        .bind(&suggested_name)
        .bind(confidence)
        .bind(verified)
        .bind(profile_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl SpeakerProfileStore for PgSpeakerProfileStore {
    async fn create(&self, profile: &SpeakerProfile) -> Result<SpeakerProfile, PersistenceError> {
        let pool = self.db.pool().await;
        let row = sqlx::query(
            "INSERT INTO speaker_profiles (user_id, name, description)
             VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(profile.user_id)
        .bind(&profile.name)
        .bind(&profile.description)
        .fetch_one(&pool)
        .await?;
        row_to_profile(&row)
    }

    async fn get(&self, id: i64) -> Result<Option<SpeakerProfile>, PersistenceError> {
        let pool = self.db.pool().await;
        let row = sqlx::query("SELECT * FROM speaker_profiles WHERE id = $1")
            .bind(id)
            .fetch_optional(&pool)
            .await?;
        row.as_ref().map(row_to_profile).transpose()
    }

    async fn find_by_name(
        &self,
        user_id: i64,
        name: &str,
    ) -> Result<Option<SpeakerProfile>, PersistenceError> {
        let pool = self.db.pool().await;
        let row = sqlx::query(
            "SELECT * FROM speaker_profiles WHERE user_id = $1 AND LOWER(name) = LOWER($2)",
        )
        .bind(user_id)
        .bind(name)
        .fetch_optional(&pool)
        .await?;
        row.as_ref().map(row_to_profile).transpose()
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<SpeakerProfile>, PersistenceError> {
        let pool = self.db.pool().await;
        let rows = sqlx::query("SELECT * FROM speaker_profiles WHERE user_id = $1 ORDER BY name")
            .bind(user_id)
            .fetch_all(&pool)
            .await?;
        rows.iter().map(row_to_profile).collect()
    }

    async fn set_embedding_count(&self, id: i64, count: i32) -> Result<(), PersistenceError> {
        let pool = self.db.pool().await;
        sqlx::query(
            "UPDATE speaker_profiles
             SET embedding_count = $2, last_embedding_update = $3
             WHERE id = $1",
        )
        .bind(id)
        .bind(count)
        .bind(Utc::now())
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), PersistenceError> {
        let pool = self.db.pool().await;
        sqlx::query("DELETE FROM speaker_profiles WHERE id = $1")
            .bind(id)
            .execute(&pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SpeakerMatchStore for PgSpeakerMatchStore {
    async fn upsert(&self, m: SpeakerMatch) -> Result<(), PersistenceError> {
        let pool = self.db.pool().await;
        sqlx::query(
            "INSERT INTO speaker_matches (speaker1_id, speaker2_id, confidence, updated_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (speaker1_id, speaker2_id)
             DO UPDATE SET
                 confidence = GREATEST(speaker_matches.confidence, EXCLUDED.confidence),
                 updated_at = CASE
                     WHEN EXCLUDED.confidence > speaker_matches.confidence
                     THEN EXCLUDED.updated_at
                     ELSE speaker_matches.updated_at
                 END",
        )
        .bind(m.speaker1_id)
        .bind(m.speaker2_id)
        .bind(m.confidence)
        .bind(m.updated_at)
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn list_for_speaker(
        &self,
        speaker_id: i64,
    ) -> Result<Vec<SpeakerMatch>, PersistenceError> {
        let pool = self.db.pool().await;
        let rows = sqlx::query(
            "SELECT * FROM speaker_matches
             WHERE speaker1_id = $1 OR speaker2_id = $1
             ORDER BY confidence DESC",
        )
        .bind(speaker_id)
        .fetch_all(&pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(SpeakerMatch {
                    speaker1_id: row.try_get("speaker1_id")?,
                    speaker2_id: row.try_get("speaker2_id")?,
                    confidence: row.try_get("confidence")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }
}
