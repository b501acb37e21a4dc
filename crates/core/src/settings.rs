//! Runtime-adjustable system settings
//!
//! Settings are plain key/value strings in the relational store so that
//! toggles take effect without a restart. Typed access lives in the
//! persistence crate; this module only defines the entity and the keys the
//! core consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Keys consulted by the pipeline at task time
pub mod keys {
    /// Max transcription retries before a file is orphaned; 0 = unlimited
    pub const MAX_RETRIES: &str = "transcription.max_retries";
    /// When false, the retry limit is bypassed entirely
    pub const RETRY_LIMIT_ENABLED: &str = "transcription.retry_limit_enabled";
    /// Enables the garbage word filter on new transcripts
    pub const GARBAGE_CLEANUP_ENABLED: &str = "transcription.garbage_cleanup_enabled";
    /// Words longer than this with no whitespace are treated as garbage
    pub const MAX_WORD_LENGTH: &str = "transcription.max_word_length";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSetting {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SystemSetting {
    pub fn new(key: &str, value: &str, description: Option<&str>) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            description: description.map(str::to_string),
            updated_at: Some(Utc::now()),
        }
    }
}
