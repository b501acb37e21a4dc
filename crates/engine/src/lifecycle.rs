//! Media file lifecycle transitions and their side effects
//!
//! The store applies the per-status timestamps; this service layers the
//! task-aggregate rules and notifications on top: error categorization on
//! failure, cancellation completion once the last task stops, and the
//! consistency checks recovery relies on.

use std::sync::Arc;

use transcribe_core::{
    CategorizedError, FileStatus, MediaFile, Notification, NotificationSink, NotificationType,
};
use transcribe_persistence::{MediaFileStore, TaskStore};

use crate::notify::publish_or_log;
use crate::EngineError;

pub struct LifecycleService {
    files: Arc<dyn MediaFileStore>,
    tasks: Arc<dyn TaskStore>,
    notifications: Arc<dyn NotificationSink>,
}

impl LifecycleService {
    pub fn new(
        files: Arc<dyn MediaFileStore>,
        tasks: Arc<dyn TaskStore>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            files,
            tasks,
            notifications,
        }
    }

    async fn file(&self, file_id: i64) -> Result<MediaFile, EngineError> {
        self.files
            .get(file_id)
            .await?
            .ok_or_else(|| EngineError::Other(format!("media file {file_id} not found")))
    }

    /// `Pending -> Processing`, stamping `task_started_at`
    pub async fn begin_processing(&self, file_id: i64) -> Result<MediaFile, EngineError> {
        let file = self.files.transition(file_id, FileStatus::Processing).await?;
        publish_or_log(
            self.notifications.as_ref(),
            Notification::file_status(
                file.user_id,
                NotificationType::TranscriptionStatus,
                file.uuid,
                "processing",
                Some(0),
                None,
            ),
        )
        .await;
        Ok(file)
    }

    /// `Processing -> Completed`, stamping `completed_at` and clearing the
    /// error message
    pub async fn complete(&self, file_id: i64) -> Result<MediaFile, EngineError> {
        let file = self.files.transition(file_id, FileStatus::Completed).await?;
        publish_or_log(
            self.notifications.as_ref(),
            Notification::file_status(
                file.user_id,
                NotificationType::TranscriptionStatus,
                file.uuid,
                "completed",
                Some(100),
                None,
            ),
        )
        .await;
        Ok(file)
    }

    /// `Processing -> Error` with a categorized message
    pub async fn fail(&self, file_id: i64, raw_error: &str) -> Result<CategorizedError, EngineError> {
        let categorized = CategorizedError::categorize(Some(raw_error));
        self.files
            .set_error(file_id, &categorized.user_message)
            .await?;
        let file = self.file(file_id).await?;
        publish_or_log(
            self.notifications.as_ref(),
            Notification::file_status(
                file.user_id,
                NotificationType::TranscriptionStatus,
                file.uuid,
                "error",
                None,
                Some(&categorized.user_message),
            ),
        )
        .await;
        Ok(categorized)
    }

    /// User requested cancellation; in-flight tasks observe it on their
    /// next progress update
    pub async fn request_cancel(&self, file_id: i64) -> Result<MediaFile, EngineError> {
        Ok(self.files.transition(file_id, FileStatus::Cancelling).await?)
    }

    /// Whether tasks for this file should stop
    pub async fn is_cancelling(&self, file_id: i64) -> Result<bool, EngineError> {
        Ok(self.file(file_id).await?.status == FileStatus::Cancelling)
    }

    /// `Cancelling -> Cancelled` once no task remains active
    pub async fn finish_cancel_if_idle(&self, file_id: i64) -> Result<bool, EngineError> {
        let file = self.file(file_id).await?;
        if file.status != FileStatus::Cancelling {
            return Ok(false);
        }
        if self.tasks.aggregate_for_file(file_id).await?.active() > 0 {
            return Ok(false);
        }
        self.files.transition(file_id, FileStatus::Cancelled).await?;
        tracing::info!(file_id, "File cancellation completed");
        Ok(true)
    }

    /// Manual or recovery retry: `Error | Orphaned -> Pending`
    pub async fn reset_for_retry(&self, file_id: i64) -> Result<MediaFile, EngineError> {
        Ok(self.files.transition(file_id, FileStatus::Pending).await?)
    }
}
