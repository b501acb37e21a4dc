//! Media download stage (download queue)
//!
//! Streams a remote URL into the object store with progress
//! notifications, records the content hash and size, and dispatches
//! transcription. Network failures are fatal for the file, categorized as
//! network errors for the user.

use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use transcribe_core::{Notification, NotificationType, TaskKind};
use transcribe_engine::notify::publish_or_log;
use transcribe_engine::{ProgressSignal, TaskContext, TaskFailure, TaskHandler};

use crate::{file_id_from_payload, PipelineDeps};

/// Hard deadline for one remote fetch
const DOWNLOAD_DEADLINE: Duration = Duration::from_secs(600);

pub struct DownloadHandler {
    deps: Arc<PipelineDeps>,
    client: reqwest::Client,
}

impl DownloadHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self {
            deps,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TaskHandler for DownloadHandler {
    async fn run(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskFailure> {
        let deps = &self.deps;
        let file_id = file_id_from_payload(&ctx.payload)?;
        let url = ctx
            .payload
            .get("url")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| TaskFailure::new("payload is missing url"))?;

        let file = deps
            .files
            .get(file_id)
            .await?
            .ok_or_else(|| TaskFailure::new(format!("media file {file_id} not found")))?;

        deps.lifecycle
            .begin_processing(file_id)
            .await
            .map_err(|e| TaskFailure::new(e.to_string()))?;
        publish_or_log(
            deps.notifications.as_ref(),
            Notification::file_status(
                file.user_id,
                NotificationType::YoutubeProcessingStatus,
                file.uuid,
                "downloading",
                Some(0),
                None,
            ),
        )
        .await;

        let response = self
            .client
            .get(&url)
            .timeout(DOWNLOAD_DEADLINE)
            .send()
            .await
            .map_err(|e| TaskFailure::new(format!("download failed: {e}")))?;
        if !response.status().is_success() {
            return Err(TaskFailure::new(format!(
                "download failed: url not accessible ({})",
                response.status()
            )));
        }

        let total = response.content_length();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let mut hasher = Sha256::new();
        let mut data: Vec<u8> = Vec::new();
        let mut last_percent = 0u8;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TaskFailure::new(format!("download failed: {e}")))?;
            hasher.update(&chunk);
            data.extend_from_slice(&chunk);

            if let Some(total) = total.filter(|t| *t > 0) {
                let percent = ((data.len() as u64 * 100) / total).min(99) as u8;
                if percent > last_percent {
                    last_percent = percent;
                    publish_or_log(
                        deps.notifications.as_ref(),
                        Notification::file_status(
                            file.user_id,
                            NotificationType::DownloadProgress,
                            file.uuid,
                            "downloading",
                            Some(percent),
                            None,
                        ),
                    )
                    .await;
                    if ctx.report_progress(percent as f32 / 100.0 * 0.8).await
                        == ProgressSignal::Cancelled
                    {
                        return Err(TaskFailure::cancelled());
                    }
                }
            }
        }

        if data.is_empty() {
            return Err(TaskFailure::new("download failed: empty response body"));
        }

        let hash = format!("{:x}", hasher.finalize());
        let size = data.len() as i64;

        deps.storage
            .put(&file.storage_path, bytes::Bytes::from(data), &content_type)
            .await?;
        deps.files.set_file_facts(file_id, size, &hash).await?;

        if ctx.report_progress(0.9).await == ProgressSignal::Cancelled {
            return Err(TaskFailure::cancelled());
        }

        publish_or_log(
            deps.notifications.as_ref(),
            Notification::file_status(
                file.user_id,
                NotificationType::YoutubeProcessingStatus,
                file.uuid,
                "downloaded",
                Some(100),
                None,
            ),
        )
        .await;

        // hand off to the GPU stage
        deps.submitter
            .submit_task(
                file.user_id,
                Some(file_id),
                TaskKind::Transcription,
                serde_json::json!({ "media_file_id": file_id }),
            )
            .await
            .map_err(|e| TaskFailure::new(format!("transcription dispatch failed: {e}")))?;

        Ok(serde_json::json!({
            "bytes": size,
            "file_hash": hash,
            "content_type": content_type,
        }))
    }
}
