//! Media file entity and lifecycle state machine

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::CoreError;

/// Media file processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum FileStatus {
    /// Uploaded, waiting for the pipeline to pick it up
    #[default]
    Pending,
    /// At least one stage is running
    Processing,
    /// Transcription finished successfully
    Completed,
    /// Transcription failed; `last_error_message` carries the category
    Error,
    /// User requested cancellation; in-flight tasks have not yet observed it
    Cancelling,
    /// All tasks observed the cancellation and stopped
    Cancelled,
    /// Recovery gave up on this file after exhausting its retry budget
    Orphaned,
}

/// Allowed lifecycle transitions. `Orphaned` is reachable from any state via
/// recovery (`abandon`), which bypasses this table.
static STATUS_TRANSITIONS: Lazy<HashMap<FileStatus, &'static [FileStatus]>> = Lazy::new(|| {
    use FileStatus::*;
    let mut map = HashMap::new();
    map.insert(Pending, &[Processing, Cancelling] as &[_]);
    map.insert(Processing, &[Completed, Error, Cancelling] as &[_]);
    map.insert(Completed, &[] as &[_]);
    map.insert(Error, &[Pending] as &[_]);
    map.insert(Cancelling, &[Cancelled] as &[_]);
    map.insert(Cancelled, &[] as &[_]);
    map.insert(Orphaned, &[Pending] as &[_]);
    map
});

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Orphaned => "orphaned",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "cancelling" => Ok(Self::Cancelling),
            "cancelled" => Ok(Self::Cancelled),
            "orphaned" => Ok(Self::Orphaned),
            other => Err(CoreError::UnknownStatus {
                kind: "file",
                value: other.to_string(),
            }),
        }
    }

    /// Regular transitions permitted from this status
    pub fn allowed_transitions(&self) -> &'static [FileStatus] {
        STATUS_TRANSITIONS.get(self).copied().unwrap_or(&[])
    }

    /// Whether `target` is reachable in one step. Recovery may additionally
    /// move any status to `Orphaned`.
    pub fn can_transition_to(&self, target: FileStatus) -> bool {
        target == FileStatus::Orphaned || self.allowed_transitions().contains(&target)
    }

    /// Terminal statuses never leave via the regular pipeline, only via a
    /// manual retry (`Error`, `Orphaned`) or deletion.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Error | Self::Cancelled | Self::Orphaned
        )
    }

    /// Statuses that do not block re-uploading the same content hash
    pub fn releases_hash(&self) -> bool {
        matches!(self, Self::Error | Self::Cancelled | Self::Orphaned)
    }
}

/// Waveform resolutions rendered for different client sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformResolution {
    Small,
    Medium,
    Large,
}

impl WaveformResolution {
    pub const ALL: [WaveformResolution; 3] = [Self::Small, Self::Medium, Self::Large];

    /// Number of buckets rendered at this resolution
    pub fn samples(&self) -> usize {
        match self {
            Self::Small => 500,
            Self::Medium => 1000,
            Self::Large => 2000,
        }
    }

    /// Key under which this resolution is stored in `waveform_data`
    pub fn cache_key(&self) -> String {
        format!("waveform_{}", self.samples())
    }
}

/// A single ingested audio/video file and its processing state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFile {
    pub id: i64,
    /// Externally visible identifier; never expose the internal id
    pub uuid: Uuid,
    pub user_id: i64,
    pub filename: String,
    /// Object-store key of the original upload
    pub storage_path: String,
    pub file_size: i64,
    pub duration: Option<f64>,
    pub content_type: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub source_url: Option<String>,
    pub status: FileStatus,
    pub recovery_attempts: i32,
    pub upload_time: DateTime<Utc>,
    pub task_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_recovery_attempt: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    pub force_delete_eligible: bool,
    /// Resolution key -> bucketed peaks, filled by the waveform stage
    pub waveform_data: Option<serde_json::Value>,
    pub thumbnail_path: Option<String>,
    /// SHA-256 of the content, used for per-user duplicate detection
    pub file_hash: Option<String>,
    pub metadata_raw: Option<serde_json::Value>,
    pub metadata_important: Option<serde_json::Value>,
}

impl MediaFile {
    pub fn new(user_id: i64, filename: &str, storage_path: &str, content_type: &str) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            user_id,
            filename: filename.to_string(),
            storage_path: storage_path.to_string(),
            file_size: 0,
            duration: None,
            content_type: content_type.to_string(),
            title: None,
            author: None,
            description: None,
            source_url: None,
            status: FileStatus::Pending,
            recovery_attempts: 0,
            upload_time: Utc::now(),
            task_started_at: None,
            completed_at: None,
            last_recovery_attempt: None,
            last_error_message: None,
            force_delete_eligible: false,
            waveform_data: None,
            thumbnail_path: None,
            file_hash: None,
            metadata_raw: None,
            metadata_important: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(FileStatus::Completed.is_terminal());
        assert!(FileStatus::Orphaned.is_terminal());
        assert!(!FileStatus::Processing.is_terminal());
        assert!(!FileStatus::Cancelling.is_terminal());
    }

    #[test]
    fn processing_cannot_jump_to_completed_after_cancel() {
        assert!(FileStatus::Processing.can_transition_to(FileStatus::Cancelling));
        assert!(!FileStatus::Cancelling.can_transition_to(FileStatus::Completed));
        assert!(FileStatus::Cancelling.can_transition_to(FileStatus::Cancelled));
    }

    #[test]
    fn retry_paths() {
        assert!(FileStatus::Error.can_transition_to(FileStatus::Pending));
        assert!(FileStatus::Orphaned.can_transition_to(FileStatus::Pending));
        assert!(!FileStatus::Completed.can_transition_to(FileStatus::Pending));
    }

    #[test]
    fn orphaned_reachable_from_anywhere() {
        for status in [
            FileStatus::Pending,
            FileStatus::Processing,
            FileStatus::Error,
        ] {
            assert!(status.can_transition_to(FileStatus::Orphaned));
        }
    }

    #[test]
    fn status_round_trip() {
        for s in [
            "pending",
            "processing",
            "completed",
            "error",
            "cancelling",
            "cancelled",
            "orphaned",
        ] {
            assert_eq!(FileStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(FileStatus::parse("bogus").is_err());
    }

    #[test]
    fn waveform_cache_keys() {
        assert_eq!(WaveformResolution::Small.cache_key(), "waveform_500");
        assert_eq!(WaveformResolution::Large.cache_key(), "waveform_2000");
    }
}
