//! Persistence error type

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("duplicate upload: file hash {hash} already exists for user {user_id}")]
    DuplicateHash { hash: String, user_id: i64 },

    #[error("invalid lifecycle transition for file {file_id}: {from} -> {to}")]
    InvalidTransition {
        file_id: i64,
        from: String,
        to: String,
    },

    #[error("domain error: {0}")]
    Domain(#[from] transcribe_core::CoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PersistenceError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
