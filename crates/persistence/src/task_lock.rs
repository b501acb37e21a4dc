//! Best-effort distributed locks for periodic tasks
//!
//! Lease rows keyed by task name prevent overlapping beat runs across
//! processes. The lock is advisory: when the store is unreachable the
//! protected path runs without it, matching the recovery scheduler's
//! skip-not-queue contract.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::Database;
use crate::error::PersistenceError;

/// Outcome of a guarded run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Lock held (or store unavailable); the closure ran
    Ran,
    /// Another holder owns the lease; the run was skipped
    Skipped,
}

#[async_trait]
pub trait TaskLockManager: Send + Sync {
    /// Try to take the lease. Returns a holder token on success, `None`
    /// when the lock is already held.
    async fn acquire(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<String>, PersistenceError>;

    async fn release(&self, name: &str, holder: &str) -> Result<(), PersistenceError>;

    async fn is_locked(&self, name: &str) -> Result<bool, PersistenceError>;
}

#[derive(Clone)]
pub struct PgTaskLockManager {
    db: Database,
}

impl PgTaskLockManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Run `f` under the named lock. Overlapping runs are skipped rather
    /// than queued; a lock-store failure degrades to running unlocked.
    pub async fn run_locked<F, Fut, T>(
        &self,
        name: &str,
        ttl: Duration,
        f: F,
    ) -> Result<(LockOutcome, Option<T>), PersistenceError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = T> + Send,
        T: Send,
    {
        let holder = match self.acquire(name, ttl).await {
            Ok(Some(holder)) => Some(holder),
            Ok(None) => {
                tracing::info!(lock = name, "Lock already held, skipping run");
                return Ok((LockOutcome::Skipped, None));
            },
            Err(e) => {
                tracing::warn!(lock = name, error = %e, "Lock store unavailable, running without lock");
                None
            },
        };

        let result = f().await;

        if let Some(holder) = holder {
            if let Err(e) = self.release(name, &holder).await {
                tracing::error!(lock = name, error = %e, "Failed to release lock");
            }
        }

        Ok((LockOutcome::Ran, Some(result)))
    }
}

#[async_trait]
impl TaskLockManager for PgTaskLockManager {
    async fn acquire(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<Option<String>, PersistenceError> {
        let pool = self.db.pool().await;
        let holder = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();

        // Expired leases are fair game; a live lease blocks
        let taken: Option<String> = sqlx::query_scalar(
            "INSERT INTO task_locks (name, holder, expires_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (name) DO UPDATE
                 SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
                 WHERE task_locks.expires_at < NOW()
             RETURNING holder",
        )
        .bind(name)
        .bind(&holder)
        .bind(expires_at)
        .fetch_optional(&pool)
        .await?;

        match taken {
            Some(h) if h == holder => {
                tracing::debug!(lock = name, "Acquired lock");
                Ok(Some(holder))
            },
            _ => Ok(None),
        }
    }

    async fn release(&self, name: &str, holder: &str) -> Result<(), PersistenceError> {
        let pool = self.db.pool().await;
        sqlx::query("DELETE FROM task_locks WHERE name = $1 AND holder = $2")
            .bind(name)
            .bind(holder)
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn is_locked(&self, name: &str) -> Result<bool, PersistenceError> {
        let pool = self.db.pool().await;
        let live: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM task_locks WHERE name = $1 AND expires_at >= NOW()",
        )
        .bind(name)
        .fetch_optional(&pool)
        .await?;
        Ok(live.is_some())
    }
}
