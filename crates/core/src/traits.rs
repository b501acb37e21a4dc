//! Traits for pluggable backends
//!
//! The ML models (transcription, diarization, voice embedding, chat
//! completion) are external collaborators; the pipeline only depends on
//! these seams, so workers can swap implementations and tests can use
//! in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One diarized span as produced by the transcription backend, before any
/// database identity is assigned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    /// Diarization label (`SPEAKER_00`, `SPEAKER_01`, ...)
    pub speaker_label: Option<String>,
    pub confidence: Option<f32>,
}

/// Full transcription result for one media file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionOutput {
    pub segments: Vec<RawSegment>,
    pub language: Option<String>,
    pub duration: Option<f64>,
}

/// Transcription + diarization interface
///
/// Implementations run on the GPU queue and may take minutes; they report
/// progress through the task engine, not through this trait.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync + 'static {
    /// Transcribe a local media file end to end
    async fn transcribe(&self, audio_path: &Path) -> anyhow::Result<TranscriptionOutput>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}

/// Voice embedding interface
///
/// Embeddings are fixed-dimension float32 vectors; the reference model
/// produces 512 dimensions.
#[async_trait]
pub trait EmbeddingModel: Send + Sync + 'static {
    /// Embed a time window of an audio file
    async fn embed_window(
        &self,
        audio_path: &Path,
        start: f64,
        end: f64,
    ) -> anyhow::Result<Vec<f32>>;

    /// Output dimension of this model
    fn dimension(&self) -> usize;
}

/// A chat-completion request with an explicit deadline; the backend must
/// treat deadline expiry as a retriable failure.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub deadline: Duration,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: 2000,
            temperature: 0.3,
            deadline: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
}

/// LLM chat interface used by the summarization, topic extraction, and
/// speaker-hint stages
#[async_trait]
pub trait ChatModel: Send + Sync + 'static {
    async fn complete(&self, request: ChatRequest) -> anyhow::Result<ChatResponse>;

    fn model_name(&self) -> &str;
}
