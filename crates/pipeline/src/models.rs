//! HTTP-backed model clients
//!
//! Transcription and voice embedding run as separate model services; the
//! pipeline talks to them over a small JSON API with explicit deadlines.
//! Deadline expiry surfaces as a network error, which the retry policy
//! treats as retriable.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use transcribe_core::{EmbeddingModel, RawSegment, TranscriptionEngine, TranscriptionOutput};

/// Model service endpoints
#[derive(Debug, Clone)]
pub struct ModelServiceConfig {
    pub base_url: String,
    /// Transcription of long media can take many minutes
    pub transcribe_deadline: Duration,
    pub embed_deadline: Duration,
    pub model_name: String,
}

impl Default for ModelServiceConfig {
    fn default() -> Self {
        let base_url = std::env::var("MODEL_SERVICE_URL")
            .unwrap_or_else(|_| "http://localhost:9000".to_string());
        Self {
            base_url,
            transcribe_deadline: Duration::from_secs(3600),
            embed_deadline: Duration::from_secs(120),
            model_name: std::env::var("TRANSCRIPTION_MODEL")
                .unwrap_or_else(|_| "whisper-large-v3".to_string()),
        }
    }
}

#[derive(Deserialize)]
struct WireSegment {
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    speaker: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Deserialize)]
struct WireTranscription {
    segments: Vec<WireSegment>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Deserialize)]
struct WireEmbedding {
    embedding: Vec<f32>,
}

/// Client for the transcription + diarization service
pub struct HttpTranscriptionEngine {
    client: reqwest::Client,
    config: ModelServiceConfig,
}

impl HttpTranscriptionEngine {
    pub fn new(config: ModelServiceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl TranscriptionEngine for HttpTranscriptionEngine {
    async fn transcribe(&self, audio_path: &Path) -> anyhow::Result<TranscriptionOutput> {
        let audio = tokio::fs::read(audio_path).await?;
        let response = self
            .client
            .post(format!("{}/transcribe", self.config.base_url))
            .timeout(self.config.transcribe_deadline)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .query(&[("model", self.config.model_name.as_str())])
            .body(audio)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("transcription timeout after {:?}", self.config.transcribe_deadline)
                } else {
                    anyhow::anyhow!("transcription request failed: {e}")
                }
            })?
            .error_for_status()
            .map_err(|e| anyhow::anyhow!("transcription service error: {e}"))?;

        let wire: WireTranscription = response.json().await?;
        Ok(TranscriptionOutput {
            segments: wire
                .segments
                .into_iter()
                .map(|s| RawSegment {
                    start: s.start,
                    end: s.end,
                    text: s.text,
                    speaker_label: s.speaker,
                    confidence: s.confidence,
                })
                .collect(),
            language: wire.language,
            duration: wire.duration,
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}

/// Client for the voice embedding service
pub struct HttpEmbeddingModel {
    client: reqwest::Client,
    config: ModelServiceConfig,
    dimension: usize,
}

impl HttpEmbeddingModel {
    pub fn new(config: ModelServiceConfig, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingModel for HttpEmbeddingModel {
    async fn embed_window(
        &self,
        audio_path: &Path,
        start: f64,
        end: f64,
    ) -> anyhow::Result<Vec<f32>> {
        let audio = tokio::fs::read(audio_path).await?;
        let response = self
            .client
            .post(format!("{}/embed", self.config.base_url))
            .timeout(self.config.embed_deadline)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .query(&[("start", start.to_string()), ("end", end.to_string())])
            .body(audio)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("embedding request failed: {e}"))?
            .error_for_status()
            .map_err(|e| anyhow::anyhow!("embedding service error: {e}"))?;

        let wire: WireEmbedding = response.json().await?;
        if wire.embedding.len() != self.dimension {
            anyhow::bail!(
                "embedding service returned {} dims, expected {}",
                wire.embedding.len(),
                self.dimension
            );
        }
        Ok(wire.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
