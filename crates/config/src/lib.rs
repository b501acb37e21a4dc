//! Configuration for the transcription pipeline
//!
//! Static deployment configuration loads from files and environment
//! variables into [`Settings`]. Runtime-adjustable limits (retry budgets,
//! garbage filter) deliberately do NOT live here: they are read from the
//! system-settings store at task time so toggles apply without a restart.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, DatabaseConfig, LlmConfig, RecoveryConfig, SearchConfig, Settings,
    SpeakerConfig, StorageConfig,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    ParseError(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
