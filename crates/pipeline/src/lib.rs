//! Pipeline stage handlers
//!
//! The stage graph for a new media file: transcription on the GPU queue,
//! then a fan-out to waveform and analytics (CPU), summarization, topic
//! extraction, and speaker hints (NLP). Media downloads run on the
//! download queue and feed the same graph. Failure of any stage other
//! than transcription records a failed task row and leaves the file
//! alone.

pub mod analytics;
pub mod download;
pub mod hygiene;
pub mod ingest;
pub mod models;
pub mod speaker_hints;
pub mod stages;
pub mod subtitle;
pub mod summarize;
pub mod topics;
pub mod transcription;
pub mod waveform;

pub use download::DownloadHandler;
pub use ingest::{IngestError, IngestService};
pub use speaker_hints::SpeakerHintHandler;
pub use stages::{AnalyticsHandler, WaveformHandler};
pub use summarize::SummarizationHandler;
pub use topics::TopicExtractionHandler;
pub use transcription::TranscriptionHandler;

use std::sync::Arc;
use thiserror::Error;

use transcribe_core::{
    ChatModel, EmbeddingModel, NotificationSink, TaskKind, TranscriptionEngine,
};
use transcribe_engine::{HandlerRegistry, LifecycleService, TaskSubmitter};
use transcribe_persistence::{
    MediaFileStore, SegmentStore, SpeakerProfileStore, SpeakerStore, SystemSettingsStore,
    TopicStore,
};
use transcribe_search::SummaryIndex;
use transcribe_speaker::SpeakerMatchingService;
use transcribe_storage::ObjectStore;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("media error: {0}")]
    Media(String),

    #[error(transparent)]
    Persistence(#[from] transcribe_persistence::PersistenceError),

    #[error(transparent)]
    Storage(#[from] transcribe_storage::StorageError),

    #[error(transparent)]
    Search(#[from] transcribe_search::SearchError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Stage(String),
}

/// Everything the stage handlers share. Built once at worker start and
/// handed to [`register_handlers`].
pub struct PipelineDeps {
    pub files: Arc<dyn MediaFileStore>,
    pub speakers: Arc<dyn SpeakerStore>,
    pub profiles: Arc<dyn SpeakerProfileStore>,
    pub segments: Arc<dyn SegmentStore>,
    pub topics: Arc<dyn TopicStore>,
    pub settings: Arc<dyn SystemSettingsStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub notifications: Arc<dyn NotificationSink>,
    pub lifecycle: Arc<LifecycleService>,
    pub submitter: Arc<dyn TaskSubmitter>,
    pub transcriber: Arc<dyn TranscriptionEngine>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub chat: Arc<dyn ChatModel>,
    pub matching: Arc<SpeakerMatchingService>,
    pub summary_index: Arc<SummaryIndex>,
}

/// Wire every stage handler into the registry
pub fn register_handlers(registry: &mut HandlerRegistry, deps: Arc<PipelineDeps>) {
    registry
        .register(
            TaskKind::Transcription,
            Arc::new(TranscriptionHandler::new(deps.clone())),
        )
        .register(TaskKind::Waveform, Arc::new(WaveformHandler::new(deps.clone())))
        .register(
            TaskKind::Analytics,
            Arc::new(AnalyticsHandler::new(deps.clone())),
        )
        .register(
            TaskKind::Summarization,
            Arc::new(SummarizationHandler::new(deps.clone())),
        )
        .register(
            TaskKind::TopicExtraction,
            Arc::new(TopicExtractionHandler::new(deps.clone())),
        )
        .register(
            TaskKind::SpeakerIdentification,
            Arc::new(SpeakerHintHandler::new(deps.clone())),
        )
        .register(
            TaskKind::YoutubeDownload,
            Arc::new(DownloadHandler::new(deps)),
        );
}

pub(crate) fn file_id_from_payload(
    payload: &serde_json::Value,
) -> Result<i64, transcribe_engine::TaskFailure> {
    payload
        .get("media_file_id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| transcribe_engine::TaskFailure::new("payload is missing media_file_id"))
}

/// Render segments as `Name: [mm:ss] text` lines for the NLP stages
pub(crate) fn render_transcript(
    segments: &[transcribe_core::TranscriptSegment],
    speaker_names: &std::collections::HashMap<i64, String>,
    max_segments: Option<usize>,
    max_chars_per_segment: Option<usize>,
) -> String {
    let take = max_segments.unwrap_or(usize::MAX);
    segments
        .iter()
        .take(take)
        .map(|segment| {
            let name = segment
                .speaker_id
                .and_then(|id| speaker_names.get(&id).map(String::as_str))
                .unwrap_or("Unknown");
            let minutes = (segment.start_time / 60.0) as u64;
            let seconds = (segment.start_time % 60.0) as u64;
            let mut text = segment.text.as_str();
            if let Some(limit) = max_chars_per_segment {
                let mut end = text.len().min(limit);
                while end < text.len() && !text.is_char_boundary(end) {
                    end += 1;
                }
                text = &text[..end];
            }
            format!("{name}: [{minutes:02}:{seconds:02}] {text}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
