//! System settings store with typed accessors
//!
//! Runtime toggles are read through here at task time, never from ambient
//! configuration, so operators can change limits without a restart.

use async_trait::async_trait;
use sqlx::Row;
use transcribe_core::settings::keys;
use transcribe_core::SystemSetting;

use crate::db::Database;
use crate::error::PersistenceError;

/// Retry limits consulted by the recovery subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// 0 = unlimited
    pub max_retries: i32,
    pub retry_limit_enabled: bool,
}

impl RetryConfig {
    /// `should_retry(n)` = `!limit_enabled ∨ n < max_retries`
    pub fn should_retry(&self, retry_count: i32) -> bool {
        !self.retry_limit_enabled || retry_count < self.max_retries
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: transcribe_config::constants::retry::DEFAULT_MAX_RETRIES,
            retry_limit_enabled: transcribe_config::constants::retry::DEFAULT_RETRY_LIMIT_ENABLED,
        }
    }
}

/// Garbage word filter settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GarbageCleanupConfig {
    pub enabled: bool,
    pub max_word_length: i32,
}

impl Default for GarbageCleanupConfig {
    fn default() -> Self {
        Self {
            enabled: transcribe_config::constants::retry::DEFAULT_GARBAGE_CLEANUP_ENABLED,
            max_word_length: transcribe_config::constants::retry::DEFAULT_MAX_WORD_LENGTH,
        }
    }
}

#[async_trait]
pub trait SystemSettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    async fn set(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
    ) -> Result<SystemSetting, PersistenceError>;

    async fn get_all(&self) -> Result<Vec<SystemSetting>, PersistenceError>;

    /// Integer parse with fallback; malformed values log and use the default
    async fn get_int(&self, key: &str, default: i32) -> Result<i32, PersistenceError> {
        match self.get(key).await? {
            Some(v) => Ok(v.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(key, value = %v, default, "Setting is not an integer, using default");
                default
            })),
            None => Ok(default),
        }
    }

    /// Boolean parse: true/1/yes/on (case-insensitive)
    async fn get_bool(&self, key: &str, default: bool) -> Result<bool, PersistenceError> {
        match self.get(key).await? {
            Some(v) => Ok(matches!(
                v.trim().to_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            )),
            None => Ok(default),
        }
    }

    async fn retry_config(&self) -> Result<RetryConfig, PersistenceError> {
        let defaults = RetryConfig::default();
        Ok(RetryConfig {
            max_retries: self.get_int(keys::MAX_RETRIES, defaults.max_retries).await?,
            retry_limit_enabled: self
                .get_bool(keys::RETRY_LIMIT_ENABLED, defaults.retry_limit_enabled)
                .await?,
        })
    }

    async fn garbage_cleanup_config(&self) -> Result<GarbageCleanupConfig, PersistenceError> {
        let defaults = GarbageCleanupConfig::default();
        Ok(GarbageCleanupConfig {
            enabled: self
                .get_bool(keys::GARBAGE_CLEANUP_ENABLED, defaults.enabled)
                .await?,
            max_word_length: self
                .get_int(keys::MAX_WORD_LENGTH, defaults.max_word_length)
                .await?,
        })
    }

    /// Whether a file with `retry_count` prior recoveries gets another try
    async fn should_retry(&self, retry_count: i32) -> Result<bool, PersistenceError> {
        Ok(self.retry_config().await?.should_retry(retry_count))
    }
}

#[derive(Clone)]
pub struct PgSystemSettingsStore {
    db: Database,
}

impl PgSystemSettingsStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SystemSettingsStore for PgSystemSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let pool = self.db.pool().await;
        let value = sqlx::query_scalar("SELECT value FROM system_settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&pool)
            .await?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
    ) -> Result<SystemSetting, PersistenceError> {
        let pool = self.db.pool().await;
        let row = sqlx::query(
            "INSERT INTO system_settings (key, value, description, updated_at)
             VALUES ($1, $2, $3, NOW())
             ON CONFLICT (key) DO UPDATE SET
                 value = EXCLUDED.value,
                 description = COALESCE(EXCLUDED.description, system_settings.description),
                 updated_at = NOW()
             RETURNING key, value, description, updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(description)
        .fetch_one(&pool)
        .await?;

        Ok(SystemSetting {
            key: row.try_get("key")?,
            value: row.try_get("value")?,
            description: row.try_get("description")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn get_all(&self) -> Result<Vec<SystemSetting>, PersistenceError> {
        let pool = self.db.pool().await;
        let rows = sqlx::query("SELECT * FROM system_settings ORDER BY key")
            .fetch_all(&pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(SystemSetting {
                    key: row.try_get("key")?,
                    value: row.try_get("value")?,
                    description: row.try_get("description")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_guard() {
        let cfg = RetryConfig {
            max_retries: 3,
            retry_limit_enabled: true,
        };
        assert!(cfg.should_retry(0));
        assert!(cfg.should_retry(2));
        assert!(!cfg.should_retry(3));
        assert!(!cfg.should_retry(7));
    }

    #[test]
    fn disabled_limit_always_retries() {
        let cfg = RetryConfig {
            max_retries: 0,
            retry_limit_enabled: false,
        };
        assert!(cfg.should_retry(1_000));
    }

    #[test]
    fn zero_with_limit_enabled_never_retries() {
        let cfg = RetryConfig {
            max_retries: 0,
            retry_limit_enabled: true,
        };
        assert!(!cfg.should_retry(0));
    }
}
