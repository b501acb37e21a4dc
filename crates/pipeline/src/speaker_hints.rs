//! Speaker-name hints from the chat backend
//!
//! Best-effort: infers names from introductions and known profiles,
//! writes suggestions only, never auto-applies, and its failure never
//! touches the file.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use transcribe_engine::{TaskContext, TaskFailure, TaskHandler};
use transcribe_llm::{parse_speaker_predictions, speaker_hint_prompt};
use transcribe_persistence::SpeakerNaming;

use crate::{file_id_from_payload, render_transcript, PipelineDeps};

/// Predictions below this confidence are ignored
const MIN_CONFIDENCE: f32 = 0.5;
/// Cap on transcript context handed to the model
const MAX_SEGMENTS: usize = 50;
const MAX_SEGMENT_CHARS: usize = 200;

pub struct SpeakerHintHandler {
    deps: Arc<PipelineDeps>,
}

impl SpeakerHintHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl TaskHandler for SpeakerHintHandler {
    async fn run(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskFailure> {
        let deps = &self.deps;
        let file_id = file_id_from_payload(&ctx.payload)?;
        let file = deps
            .files
            .get(file_id)
            .await?
            .ok_or_else(|| TaskFailure::new(format!("media file {file_id} not found")))?;

        let speakers = deps.speakers.list_for_file(file_id).await?;
        let unresolved: Vec<_> = speakers
            .iter()
            .filter(|s| s.display_name.is_none())
            .collect();
        if unresolved.is_empty() {
            return Ok(serde_json::json!({ "predictions": 0, "reason": "all speakers resolved" }));
        }

        let segments = deps.segments.list_for_file(file_id).await?;
        if segments.is_empty() {
            return Err(TaskFailure::new("no transcript segments for speaker hints"));
        }
        let names: HashMap<i64, String> = speakers
            .iter()
            .map(|s| (s.id, s.resolved_name().to_string()))
            .collect();
        let transcript = render_transcript(
            &segments,
            &names,
            Some(MAX_SEGMENTS),
            Some(MAX_SEGMENT_CHARS),
        );

        let labels: Vec<String> = unresolved.iter().map(|s| s.name.clone()).collect();
        let known: Vec<(String, String)> = deps
            .profiles
            .list_for_user(file.user_id)
            .await?
            .into_iter()
            .map(|p| {
                let description = p
                    .description
                    .unwrap_or_else(|| "No description available".to_string());
                (p.name, description)
            })
            .collect();

        ctx.report_progress(0.3).await;

        let (system, user) = speaker_hint_prompt(&transcript, &labels, &known);
        let response = deps
            .chat
            .complete(transcribe_core::ChatRequest::new(system, user))
            .await
            .map_err(|e| TaskFailure::new(format!("speaker hint call failed: {e}")))?;
        let predictions = parse_speaker_predictions(&response.content)
            .map_err(|e| TaskFailure::new(format!("speaker hint parse failed: {e}")))?;

        let mut applied = 0;
        for prediction in predictions {
            if prediction.confidence < MIN_CONFIDENCE {
                continue;
            }
            let Some(speaker) = unresolved.iter().find(|s| s.name == prediction.speaker_label)
            else {
                continue;
            };
            deps.speakers
                .apply_naming(
                    speaker.id,
                    SpeakerNaming {
                        suggested_name: Some(prediction.suggested_name.clone()),
                        confidence: Some(prediction.confidence.clamp(0.0, 1.0)),
                        ..Default::default()
                    },
                )
                .await?;
            applied += 1;
        }

        Ok(serde_json::json!({ "predictions": applied }))
    }
}
