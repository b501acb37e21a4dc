//! The GPU transcription stage
//!
//! Fetches the blob, runs the transcription + diarization backend,
//! persists speakers and segments, runs cross-file speaker matching,
//! emits subtitle artifacts, marks the file completed, and fans out the
//! derived stages. This is the only stage whose failure moves the file to
//! `Error`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use transcribe_core::{Notification, NotificationType, TaskKind};
use transcribe_engine::{ProgressSignal, TaskContext, TaskFailure, TaskHandler};
use transcribe_engine::notify::publish_or_log;
use transcribe_persistence::NewSegment;

use crate::subtitle::{self, SubtitleSegment};
use crate::{file_id_from_payload, hygiene, PipelineDeps};

pub struct TranscriptionHandler {
    deps: Arc<PipelineDeps>,
}

impl TranscriptionHandler {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    /// Derived stages dispatched after a successful transcription
    const FAN_OUT: [TaskKind; 5] = [
        TaskKind::Waveform,
        TaskKind::Analytics,
        TaskKind::Summarization,
        TaskKind::TopicExtraction,
        TaskKind::SpeakerIdentification,
    ];
}

#[async_trait]
impl TaskHandler for TranscriptionHandler {
    async fn run(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskFailure> {
        let deps = &self.deps;
        let file_id = file_id_from_payload(&ctx.payload)?;
        let file = deps
            .files
            .get(file_id)
            .await?
            .ok_or_else(|| TaskFailure::new(format!("media file {file_id} not found")))?;

        deps.lifecycle
            .begin_processing(file_id)
            .await
            .map_err(|e| TaskFailure::new(e.to_string()))?;

        if ctx.report_progress(0.05).await == ProgressSignal::Cancelled {
            return Err(TaskFailure::cancelled());
        }

        // stage the blob to a local file for the model
        let body = deps.storage.get(&file.storage_path).await?;
        let mut audio = tempfile::NamedTempFile::new()
            .map_err(|e| TaskFailure::new(format!("cannot stage audio: {e}")))?;
        audio
            .write_all(&body.data)
            .map_err(|e| TaskFailure::new(format!("cannot stage audio: {e}")))?;
        let audio_path = audio.path().to_path_buf();

        if ctx.report_progress(0.1).await == ProgressSignal::Cancelled {
            return Err(TaskFailure::cancelled());
        }

        let mut output = deps
            .transcriber
            .transcribe(&audio_path)
            .await
            .map_err(|e| TaskFailure::new(e.to_string()))?;

        if ctx.report_progress(0.7).await == ProgressSignal::Cancelled {
            return Err(TaskFailure::cancelled());
        }

        // runtime-configured garbage filter
        let garbage = deps.settings.garbage_cleanup_config().await?;
        for segment in &mut output.segments {
            segment.text = hygiene::clean_text(&segment.text, &garbage);
        }

        if let Some(duration) = output.duration {
            deps.files.set_duration(file_id, duration).await?;
        }

        // per-file speaker rows, in order of first appearance
        let mut labels: Vec<String> = Vec::new();
        for segment in &output.segments {
            if let Some(label) = segment.speaker_label.as_deref() {
                if !labels.iter().any(|l| l == label) {
                    labels.push(label.to_string());
                }
            }
        }
        let speakers = deps
            .speakers
            .create_for_file(file_id, file.user_id, &labels)
            .await?;
        let mapping: HashMap<String, i64> = speakers
            .iter()
            .map(|s| (s.name.clone(), s.id))
            .collect();

        let rows: Vec<NewSegment> = output
            .segments
            .iter()
            .map(|s| NewSegment {
                speaker_id: s.speaker_label.as_deref().and_then(|l| mapping.get(l)).copied(),
                start_time: s.start,
                end_time: s.end,
                text: s.text.clone(),
                confidence: s.confidence,
            })
            .collect();
        let stored = deps.segments.replace_for_file(file_id, &rows).await?;

        if ctx.report_progress(0.8).await == ProgressSignal::Cancelled {
            return Err(TaskFailure::cancelled());
        }

        // cross-file speaker matching; failures degrade to an unmatched
        // file rather than failing the transcription
        match deps
            .matching
            .process_file_speakers(
                file_id,
                file.user_id,
                &audio_path,
                &output.segments,
                &mapping,
                deps.embedder.as_ref(),
            )
            .await
        {
            Ok(outcomes) => {
                for outcome in outcomes.iter().filter(|o| o.suggested_name.is_some()) {
                    publish_or_log(
                        deps.notifications.as_ref(),
                        Notification {
                            user_id: file.user_id,
                            kind: NotificationType::SpeakerMatch,
                            data: serde_json::json!({
                                "file_id": file.uuid.to_string(),
                                "speaker_label": outcome.label,
                                "suggested_name": outcome.suggested_name,
                                "confidence": outcome.confidence,
                                "auto_applied": outcome.auto_applied,
                            }),
                        },
                    )
                    .await;
                }
            },
            Err(e) => {
                tracing::error!(file_id, error = %e, "Speaker matching failed");
            },
        }

        self.emit_subtitles(file_id, &file).await;

        if ctx.report_progress(0.95).await == ProgressSignal::Cancelled {
            return Err(TaskFailure::cancelled());
        }

        deps.lifecycle
            .complete(file_id)
            .await
            .map_err(|e| TaskFailure::new(e.to_string()))?;

        // fan out the derived stages; children may finish in any order
        for kind in Self::FAN_OUT {
            if let Err(e) = deps
                .submitter
                .submit_task(
                    file.user_id,
                    Some(file_id),
                    kind,
                    serde_json::json!({ "media_file_id": file_id }),
                )
                .await
            {
                tracing::error!(file_id, kind = kind.as_str(), error = %e, "Stage dispatch failed");
            }
        }

        Ok(serde_json::json!({
            "segments": stored,
            "speakers": speakers.len(),
            "language": output.language,
            "duration": output.duration,
        }))
    }
}

impl TranscriptionHandler {
    /// Derived subtitle artifacts, stored beside the media blob.
    /// Best-effort: a failure is logged and the stage continues.
    async fn emit_subtitles(&self, file_id: i64, file: &transcribe_core::MediaFile) {
        let deps = &self.deps;
        let segments = match deps.segments.list_for_file(file_id).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(file_id, error = %e, "Subtitle emission skipped");
                return;
            },
        };
        let speakers = match deps.speakers.list_for_file(file_id).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(file_id, error = %e, "Subtitle emission skipped");
                return;
            },
        };
        let names: HashMap<i64, String> = speakers
            .iter()
            .map(|s| (s.id, s.resolved_name().to_string()))
            .collect();

        let cues: Vec<SubtitleSegment> = segments
            .iter()
            .map(|s| SubtitleSegment {
                start: s.start_time,
                end: s.end_time,
                text: s.text.clone(),
                speaker: s.speaker_id.and_then(|id| names.get(&id).cloned()),
            })
            .collect();

        let srt = subtitle::generate_srt(&cues);
        let vtt = subtitle::generate_webvtt(&cues);
        for (name, body, ctype) in [
            (format!("subtitles/{}.srt", file.uuid), srt, "application/x-subrip"),
            (format!("subtitles/{}.vtt", file.uuid), vtt, "text/vtt"),
        ] {
            if let Err(e) = deps
                .storage
                .put(&name, bytes::Bytes::from(body), ctype)
                .await
            {
                tracing::warn!(file_id, object = %name, error = %e, "Subtitle artifact write failed");
            }
        }
    }
}
