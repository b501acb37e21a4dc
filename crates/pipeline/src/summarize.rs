//! Summarization stage
//!
//! Produces a BLUF summary through the chat interface and indexes it for
//! full-text search. LLM unavailability fails the task, never the file.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use transcribe_core::{Notification, NotificationType};
use transcribe_engine::notify::publish_or_log;
use transcribe_engine::{TaskContext, TaskFailure, TaskHandler};
use transcribe_llm::summary_prompt;
use transcribe_search::SummaryDocument;

use crate::{file_id_from_payload, render_transcript, PipelineDeps};

pub struct SummarizationHandler {
    deps: Arc<PipelineDeps>,
}

impl SummarizationHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl TaskHandler for SummarizationHandler {
    async fn run(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskFailure> {
        let deps = &self.deps;
        let file_id = file_id_from_payload(&ctx.payload)?;
        let file = deps
            .files
            .get(file_id)
            .await?
            .ok_or_else(|| TaskFailure::new(format!("media file {file_id} not found")))?;

        publish_or_log(
            deps.notifications.as_ref(),
            Notification::file_status(
                file.user_id,
                NotificationType::SummarizationStatus,
                file.uuid,
                "processing",
                Some(0),
                None,
            ),
        )
        .await;

        let segments = deps.segments.list_for_file(file_id).await?;
        if segments.is_empty() {
            return Err(TaskFailure::new("no transcript segments to summarize"));
        }
        let speakers = deps.speakers.list_for_file(file_id).await?;
        let names: HashMap<i64, String> = speakers
            .iter()
            .map(|s| (s.id, s.resolved_name().to_string()))
            .collect();
        let transcript = render_transcript(&segments, &names, None, None);

        ctx.report_progress(0.3).await;

        let title = file.title.as_deref().unwrap_or(&file.filename);
        let (system, user) = summary_prompt(title, file.duration, &transcript);
        let response = deps
            .chat
            .complete(transcribe_core::ChatRequest::new(system, user))
            .await
            .map_err(|e| TaskFailure::new(format!("summarization call failed: {e}")))?;

        ctx.report_progress(0.8).await;

        let version = self
            .deps
            .summary_index
            .max_version(file_id, file.user_id)
            .map_err(|e| TaskFailure::new(e.to_string()))?
            + 1;
        let document_id = self
            .deps
            .summary_index
            .index_summary(&SummaryDocument {
                file_id,
                user_id: file.user_id,
                title: title.to_string(),
                content: response.content.clone(),
                version,
            })
            .map_err(|e| TaskFailure::new(e.to_string()))?;

        publish_or_log(
            deps.notifications.as_ref(),
            Notification::file_status(
                file.user_id,
                NotificationType::SummarizationStatus,
                file.uuid,
                "completed",
                Some(100),
                None,
            ),
        )
        .await;

        Ok(serde_json::json!({
            "document_id": document_id,
            "version": version,
            "model": response.model,
            "summary": response.content,
        }))
    }
}
