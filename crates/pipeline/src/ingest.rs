//! Upload ingest: the entry point of the stage graph
//!
//! Stores the blob, creates the `Pending` file row (rejecting duplicate
//! content hashes per user unless every other copy already failed),
//! publishes `file_created`, and submits transcription. URL ingests skip
//! the blob write and go through the download queue instead.

use sha2::{Digest, Sha256};
use std::sync::Arc;

use transcribe_core::{MediaFile, Notification, NotificationSink, NotificationType, TaskKind};
use transcribe_engine::notify::publish_or_log;
use transcribe_engine::{EngineError, TaskSubmitter};
use transcribe_persistence::{MediaFileStore, NewMediaFile, PersistenceError};
use transcribe_storage::ObjectStore;

use crate::PipelineError;

pub struct IngestService {
    files: Arc<dyn MediaFileStore>,
    storage: Arc<dyn ObjectStore>,
    notifications: Arc<dyn NotificationSink>,
    submitter: Arc<dyn TaskSubmitter>,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Storage(#[from] transcribe_storage::StorageError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl IngestService {
    pub fn new(
        files: Arc<dyn MediaFileStore>,
        storage: Arc<dyn ObjectStore>,
        notifications: Arc<dyn NotificationSink>,
        submitter: Arc<dyn TaskSubmitter>,
    ) -> Self {
        Self {
            files,
            storage,
            notifications,
            submitter,
        }
    }

    /// Ingest uploaded bytes: blob first, then the row, then the GPU
    /// stage. A duplicate hash surfaces before anything is written.
    pub async fn ingest_upload(
        &self,
        user_id: i64,
        filename: &str,
        content_type: &str,
        data: bytes::Bytes,
    ) -> Result<MediaFile, IngestError> {
        let hash = format!("{:x}", Sha256::digest(&data));
        let storage_path = format!("uploads/{user_id}/{hash}/{filename}");
        let size = data.len() as i64;

        let file = self
            .files
            .create(NewMediaFile {
                user_id,
                filename: filename.to_string(),
                storage_path: storage_path.clone(),
                content_type: content_type.to_string(),
                file_size: size,
                duration: None,
                title: None,
                source_url: None,
                file_hash: Some(hash),
            })
            .await?;

        self.storage.put(&storage_path, data, content_type).await?;

        publish_or_log(
            self.notifications.as_ref(),
            Notification::file_status(
                user_id,
                NotificationType::FileCreated,
                file.uuid,
                "pending",
                None,
                None,
            ),
        )
        .await;

        self.submitter
            .submit_task(
                user_id,
                Some(file.id),
                TaskKind::Transcription,
                serde_json::json!({ "media_file_id": file.id }),
            )
            .await?;

        Ok(file)
    }

    /// Ingest a remote URL: the row is created immediately, the bytes
    /// arrive through the download queue.
    pub async fn ingest_url(
        &self,
        user_id: i64,
        url: &str,
        filename: &str,
    ) -> Result<MediaFile, IngestError> {
        let file = self
            .files
            .create(NewMediaFile {
                user_id,
                filename: filename.to_string(),
                storage_path: format!("uploads/{user_id}/remote/{filename}"),
                content_type: "application/octet-stream".to_string(),
                file_size: 0,
                duration: None,
                title: None,
                source_url: Some(url.to_string()),
                file_hash: None,
            })
            .await?;

        publish_or_log(
            self.notifications.as_ref(),
            Notification::file_status(
                user_id,
                NotificationType::FileCreated,
                file.uuid,
                "pending",
                None,
                None,
            ),
        )
        .await;

        self.submitter
            .submit_task(
                user_id,
                Some(file.id),
                TaskKind::YoutubeDownload,
                serde_json::json!({ "media_file_id": file.id, "url": url }),
            )
            .await?;

        Ok(file)
    }
}
