//! User store

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use transcribe_core::{User, UserRole};
use uuid::Uuid;

use crate::db::Database;
use crate::error::PersistenceError;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: &User) -> Result<User, PersistenceError>;

    async fn get(&self, id: i64) -> Result<Option<User>, PersistenceError>;

    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<User>, PersistenceError>;

    async fn set_active(&self, id: i64, active: bool) -> Result<(), PersistenceError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: Database,
}

impl PgUserStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn row_to_user(row: &PgRow) -> Result<User, PersistenceError> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        uuid: row.try_get("uuid")?,
        role: UserRole::parse(&role),
        active: row.try_get("active")?,
    })
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: &User) -> Result<User, PersistenceError> {
        let pool = self.db.pool().await;
        let row = sqlx::query(
            "INSERT INTO users (uuid, role, active) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(user.uuid)
        .bind(user.role.as_str())
        .bind(user.active)
        .fetch_one(&pool)
        .await?;
        row_to_user(&row)
    }

    async fn get(&self, id: i64) -> Result<Option<User>, PersistenceError> {
        let pool = self.db.pool().await;
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<User>, PersistenceError> {
        let pool = self.db.pool().await;
        let row = sqlx::query("SELECT * FROM users WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn set_active(&self, id: i64, active: bool) -> Result<(), PersistenceError> {
        let pool = self.db.pool().await;
        sqlx::query("UPDATE users SET active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&pool)
            .await?;
        Ok(())
    }
}
