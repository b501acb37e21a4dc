//! Notification envelopes for the pub/sub fabric
//!
//! One topic, JSON envelopes, at-most-once delivery. Publishers are
//! fire-and-forget: a failed publish is logged and never fails the task.
//! Progress is monotone, so losing an envelope is safe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification types emitted by the core pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    FileCreated,
    TranscriptionStatus,
    SummarizationStatus,
    TopicExtractionStatus,
    YoutubeProcessingStatus,
    DownloadProgress,
    SpeakerMatch,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileCreated => "file_created",
            Self::TranscriptionStatus => "transcription_status",
            Self::SummarizationStatus => "summarization_status",
            Self::TopicExtractionStatus => "topic_extraction_status",
            Self::YoutubeProcessingStatus => "youtube_processing_status",
            Self::DownloadProgress => "download_progress",
            Self::SpeakerMatch => "speaker_match",
        }
    }
}

/// Envelope published on the `notifications` topic. `data` always carries
/// the externally visible file id; status/progress/message are optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: i64,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub data: serde_json::Value,
}

impl Notification {
    /// Build a status envelope for a file-scoped stage
    pub fn file_status(
        user_id: i64,
        kind: NotificationType,
        file_uuid: Uuid,
        status: &str,
        progress: Option<u8>,
        message: Option<&str>,
    ) -> Self {
        let mut data = serde_json::json!({
            "file_id": file_uuid.to_string(),
            "status": status,
        });
        if let Some(p) = progress {
            data["progress"] = serde_json::json!(p);
        }
        if let Some(m) = message {
            data["message"] = serde_json::json!(m);
        }
        Self {
            user_id,
            kind,
            data,
        }
    }
}

/// Publish side of the notification fabric. Implementations must be
/// non-blocking relative to the caller's main work.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one envelope; errors are the caller's to log and swallow
    async fn publish(&self, notification: Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification channel closed")]
    ChannelClosed,
    #[error("notification backend unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let id = Uuid::new_v4();
        let n = Notification::file_status(
            7,
            NotificationType::TranscriptionStatus,
            id,
            "completed",
            Some(100),
            None,
        );
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["user_id"], 7);
        assert_eq!(v["type"], "transcription_status");
        assert_eq!(v["data"]["file_id"], id.to_string());
        assert_eq!(v["data"]["status"], "completed");
        assert_eq!(v["data"]["progress"], 100);
        assert!(v["data"].get("message").is_none());
    }
}
