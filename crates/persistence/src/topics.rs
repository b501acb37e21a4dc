//! Topic suggestion store

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::HashMap;
use transcribe_core::{SuggestionStatus, TopicItem, TopicSuggestion};

use crate::db::Database;
use crate::error::PersistenceError;

#[async_trait]
pub trait TopicStore: Send + Sync {
    /// Insert or replace the suggestion set for a file; re-running topic
    /// extraction overwrites the previous pending set
    async fn upsert(&self, suggestion: &TopicSuggestion) -> Result<TopicSuggestion, PersistenceError>;

    async fn get_for_file(
        &self,
        media_file_id: i64,
    ) -> Result<Option<TopicSuggestion>, PersistenceError>;

    /// Record the user's decision on one suggested item
    async fn record_decision(
        &self,
        media_file_id: i64,
        item_name: &str,
        decision: &str,
    ) -> Result<(), PersistenceError>;

    /// Reject the whole suggestion set
    async fn reject(&self, media_file_id: i64) -> Result<(), PersistenceError>;
}

#[derive(Clone)]
pub struct PgTopicStore {
    db: Database,
}

impl PgTopicStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn row_to_suggestion(row: &PgRow) -> Result<TopicSuggestion, PersistenceError> {
    let status: String = row.try_get("status")?;
    let tags: serde_json::Value = row.try_get("suggested_tags")?;
    let collections: serde_json::Value = row.try_get("suggested_collections")?;
    let decisions: serde_json::Value = row.try_get("user_decisions")?;
    Ok(TopicSuggestion {
        id: row.try_get("id")?,
        media_file_id: row.try_get("media_file_id")?,
        suggested_tags: serde_json::from_value::<Vec<TopicItem>>(tags)?,
        suggested_collections: serde_json::from_value::<Vec<TopicItem>>(collections)?,
        status: match status.as_str() {
            "rejected" => SuggestionStatus::Rejected,
            _ => SuggestionStatus::Pending,
        },
        user_decisions: serde_json::from_value::<HashMap<String, String>>(decisions)?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl TopicStore for PgTopicStore {
    async fn upsert(
        &self,
        suggestion: &TopicSuggestion,
    ) -> Result<TopicSuggestion, PersistenceError> {
        let pool = self.db.pool().await;
        let row = sqlx::query(
            "INSERT INTO topic_suggestions
                 (media_file_id, suggested_tags, suggested_collections, status, user_decisions)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (media_file_id) DO UPDATE SET
                 suggested_tags = EXCLUDED.suggested_tags,
                 suggested_collections = EXCLUDED.suggested_collections,
                 status = EXCLUDED.status,
                 user_decisions = EXCLUDED.user_decisions
             RETURNING *",
        )
        .bind(suggestion.media_file_id)
        .bind(serde_json::to_value(&suggestion.suggested_tags)?)
        .bind(serde_json::to_value(&suggestion.suggested_collections)?)
        .bind(suggestion.status.as_str())
        .bind(serde_json::to_value(&suggestion.user_decisions)?)
        .fetch_one(&pool)
        .await?;
        row_to_suggestion(&row)
    }

    async fn get_for_file(
        &self,
        media_file_id: i64,
    ) -> Result<Option<TopicSuggestion>, PersistenceError> {
        let pool = self.db.pool().await;
        let row = sqlx::query("SELECT * FROM topic_suggestions WHERE media_file_id = $1")
            .bind(media_file_id)
            .fetch_optional(&pool)
            .await?;
        row.as_ref().map(row_to_suggestion).transpose()
    }

    async fn record_decision(
        &self,
        media_file_id: i64,
        item_name: &str,
        decision: &str,
    ) -> Result<(), PersistenceError> {
        let pool = self.db.pool().await;
        sqlx::query(
            "UPDATE topic_suggestions
             SET user_decisions = user_decisions || jsonb_build_object($2::text, $3::text)
             WHERE media_file_id = $1",
        )
        .bind(media_file_id)
        .bind(item_name)
        .bind(decision)
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn reject(&self, media_file_id: i64) -> Result<(), PersistenceError> {
        let pool = self.db.pool().await;
        sqlx::query("UPDATE topic_suggestions SET status = 'rejected' WHERE media_file_id = $1")
            .bind(media_file_id)
            .execute(&pool)
            .await?;
        Ok(())
    }
}
