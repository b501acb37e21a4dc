//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{endpoints, llm, recovery, speaker};
use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub speaker: SpeakerConfig,
}

/// Relational store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Idle connections are dropped after this many seconds so worker
    /// processes never reuse a connection across GPU context loss
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: endpoints::DATABASE_DEFAULT.clone(),
            max_connections: 10,
            idle_timeout_secs: 60,
            max_lifetime_secs: 1800,
        }
    }
}

/// Vector + full-text search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Qdrant endpoint
    pub endpoint: String,
    /// Collection holding speaker and profile embeddings
    pub speaker_collection: String,
    /// Voice embedding dimension
    pub vector_dim: usize,
    /// API key (optional)
    pub api_key: Option<String>,
    /// Directory for the Tantivy summary index
    pub summary_index_dir: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::QDRANT_DEFAULT.clone(),
            speaker_collection: "speaker_embeddings".to_string(),
            vector_dim: speaker::VOICE_EMBEDDING_DIM,
            api_key: None,
            summary_index_dir: "data/summary_index".to_string(),
        }
    }
}

/// Object store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory (filesystem backend) or bucket name
    pub bucket: String,
    /// Internal host as seen by workers
    pub internal_host: Option<String>,
    /// Externally visible host substituted into presigned URLs
    pub external_host: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "data/media".to_string(),
            internal_host: None,
            external_host: None,
        }
    }
}

/// Chat-completion backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: endpoints::LLM_DEFAULT.clone(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: llm::DEFAULT_MAX_TOKENS,
            temperature: llm::DEFAULT_TEMPERATURE,
            timeout_secs: llm::DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Recovery subsystem thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub stuck_threshold_hours: i64,
    pub abandoned_threshold_hours: i64,
    pub orphan_threshold_hours: i64,
    pub max_recovery_attempts: i32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            stuck_threshold_hours: recovery::STUCK_THRESHOLD_HOURS,
            abandoned_threshold_hours: recovery::ABANDONED_THRESHOLD_HOURS,
            orphan_threshold_hours: recovery::ORPHAN_THRESHOLD_HOURS,
            max_recovery_attempts: recovery::MAX_RECOVERY_ATTEMPTS,
        }
    }
}

/// Speaker identity engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerConfig {
    pub high_confidence: f32,
    pub medium_confidence: f32,
    pub embedding_dim: usize,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            high_confidence: speaker::HIGH_CONFIDENCE,
            medium_confidence: speaker::MEDIUM_CONFIDENCE,
            embedding_dim: speaker::VOICE_EMBEDDING_DIM,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.speaker.medium_confidence > self.speaker.high_confidence {
            return Err(ConfigError::InvalidValue {
                field: "speaker.medium_confidence".to_string(),
                reason: "must not exceed high_confidence".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.speaker.high_confidence) {
            return Err(ConfigError::InvalidValue {
                field: "speaker.high_confidence".to_string(),
                reason: "must be within [0, 1]".to_string(),
            });
        }
        if self.recovery.max_recovery_attempts < 0 {
            return Err(ConfigError::InvalidValue {
                field: "recovery.max_recovery_attempts".to_string(),
                reason: "must be non-negative".to_string(),
            });
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "database.max_connections".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings from `config/default.toml`, an optional environment file,
/// and `TRANSCRIBE__`-prefixed environment variables (highest precedence).
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("TRANSCRIBE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let mut settings: Settings = config.try_deserialize()?;

    apply_named_env_overrides(&mut settings);
    settings.validate()?;

    Ok(settings)
}

/// Deployment scripts drive the core through a handful of well-known bare
/// environment variables; they override anything the files set.
fn apply_named_env_overrides(settings: &mut Settings) {
    fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
        std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
    }

    if let Some(v) = env_parse("MAX_RECOVERY_ATTEMPTS") {
        settings.recovery.max_recovery_attempts = v;
    }
    if let Some(v) = env_parse("STUCK_THRESHOLD_HOURS") {
        settings.recovery.stuck_threshold_hours = v;
    }
    if let Some(v) = env_parse("ABANDONED_THRESHOLD_HOURS") {
        settings.recovery.abandoned_threshold_hours = v;
    }
    if let Some(v) = env_parse("ORPHAN_THRESHOLD_HOURS") {
        settings.recovery.orphan_threshold_hours = v;
    }
    if let Some(v) = env_parse("HIGH_CONFIDENCE") {
        settings.speaker.high_confidence = v;
    }
    if let Some(v) = env_parse("MEDIUM_CONFIDENCE") {
        settings.speaker.medium_confidence = v;
    }
    if let Some(v) = env_parse("EMBEDDING_DIMENSION") {
        settings.speaker.embedding_dim = v;
        settings.search.vector_dim = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.speaker.high_confidence, 0.75);
        assert_eq!(settings.speaker.medium_confidence, 0.50);
        assert_eq!(settings.recovery.max_recovery_attempts, 3);
        assert_eq!(settings.search.vector_dim, 512);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let mut settings = Settings::default();
        settings.speaker.medium_confidence = 0.9;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_pool_rejected() {
        let mut settings = Settings::default();
        settings.database.max_connections = 0;
        assert!(settings.validate().is_err());
    }
}
