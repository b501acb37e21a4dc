//! Task records and queue routing metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Worker queues, each sized for its resource class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    /// Single-slot queue for GPU transcription + diarization
    Gpu,
    /// Network ingestion (media downloads)
    Download,
    /// CPU-parallel work (waveform, audio extraction, analytics)
    Cpu,
    /// LLM API calls
    Nlp,
    /// Maintenance: recovery, health checks, cleanup
    Utility,
}

impl QueueName {
    pub const ALL: [QueueName; 5] = [
        Self::Gpu,
        Self::Download,
        Self::Cpu,
        Self::Nlp,
        Self::Utility,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpu => "gpu",
            Self::Download => "download",
            Self::Cpu => "cpu",
            Self::Nlp => "nlp",
            Self::Utility => "utility",
        }
    }

    /// Concurrency slots for this queue. The GPU queue must stay single-slot
    /// globally; `cpu` scales with the host.
    pub fn concurrency(&self) -> usize {
        match self {
            Self::Gpu => 1,
            Self::Download => 3,
            Self::Cpu => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            Self::Nlp => 4,
            Self::Utility => 2,
        }
    }
}

/// Every task type the router knows how to dispatch. New types are added
/// here at build time; the router rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Transcription,
    Summarization,
    Analytics,
    TopicExtraction,
    SpeakerIdentification,
    Waveform,
    YoutubeDownload,
    PeriodicHealthCheck,
    UpdateGpuStats,
    StartupRecovery,
    RecoverUserFiles,
    Cleanup,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcription => "transcription",
            Self::Summarization => "summarization",
            Self::Analytics => "analytics",
            Self::TopicExtraction => "topic_extraction",
            Self::SpeakerIdentification => "speaker_identification",
            Self::Waveform => "waveform",
            Self::YoutubeDownload => "youtube_download",
            Self::PeriodicHealthCheck => "periodic_health_check",
            Self::UpdateGpuStats => "update_gpu_stats",
            Self::StartupRecovery => "startup_recovery",
            Self::RecoverUserFiles => "recover_user_files",
            Self::Cleanup => "cleanup",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "transcription" => Ok(Self::Transcription),
            "summarization" => Ok(Self::Summarization),
            "analytics" => Ok(Self::Analytics),
            "topic_extraction" => Ok(Self::TopicExtraction),
            "speaker_identification" => Ok(Self::SpeakerIdentification),
            "waveform" => Ok(Self::Waveform),
            "youtube_download" => Ok(Self::YoutubeDownload),
            "periodic_health_check" => Ok(Self::PeriodicHealthCheck),
            "update_gpu_stats" => Ok(Self::UpdateGpuStats),
            "startup_recovery" => Ok(Self::StartupRecovery),
            "recover_user_files" => Ok(Self::RecoverUserFiles),
            "cleanup" => Ok(Self::Cleanup),
            other => Err(CoreError::UnknownTaskType(other.to_string())),
        }
    }

    /// Static routing table: task type -> queue
    pub fn queue(&self) -> QueueName {
        match self {
            Self::Transcription => QueueName::Gpu,
            Self::UpdateGpuStats => QueueName::Gpu,
            Self::YoutubeDownload => QueueName::Download,
            Self::Waveform | Self::Analytics => QueueName::Cpu,
            Self::Summarization | Self::TopicExtraction | Self::SpeakerIdentification => {
                QueueName::Nlp
            },
            Self::PeriodicHealthCheck
            | Self::StartupRecovery
            | Self::RecoverUserFiles
            | Self::Cleanup => QueueName::Utility,
        }
    }

    /// Failure of a non-critical stage records a failed task row but leaves
    /// the file alone; only transcription failure moves the file to `Error`.
    pub fn failure_is_fatal(&self) -> bool {
        matches!(self, Self::Transcription | Self::YoutubeDownload)
    }
}

/// Task execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::UnknownStatus {
                kind: "task",
                value: other.to_string(),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Mirror of every submitted job, persisted for recovery and UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Identifier assigned by the task engine at submit time
    pub id: String,
    pub user_id: i64,
    pub media_file_id: Option<i64>,
    pub task_type: TaskKind,
    pub status: TaskStatus,
    /// Monotone within a single run; may only regress after a retry re-entry
    pub progress: f32,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(id: &str, user_id: i64, media_file_id: Option<i64>, task_type: TaskKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            user_id,
            media_file_id,
            task_type,
            status: TaskStatus::Pending,
            progress: 0.0,
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_table() {
        assert_eq!(TaskKind::Transcription.queue(), QueueName::Gpu);
        assert_eq!(TaskKind::YoutubeDownload.queue(), QueueName::Download);
        assert_eq!(TaskKind::Waveform.queue(), QueueName::Cpu);
        assert_eq!(TaskKind::Summarization.queue(), QueueName::Nlp);
        assert_eq!(TaskKind::TopicExtraction.queue(), QueueName::Nlp);
        assert_eq!(TaskKind::PeriodicHealthCheck.queue(), QueueName::Utility);
        assert_eq!(TaskKind::UpdateGpuStats.queue(), QueueName::Gpu);
    }

    #[test]
    fn gpu_queue_is_single_slot() {
        assert_eq!(QueueName::Gpu.concurrency(), 1);
        assert_eq!(QueueName::Nlp.concurrency(), 4);
        assert_eq!(QueueName::Download.concurrency(), 3);
        assert_eq!(QueueName::Utility.concurrency(), 2);
        assert!(QueueName::Cpu.concurrency() >= 1);
    }

    #[test]
    fn unknown_task_type_rejected() {
        assert!(TaskKind::parse("mystery_task").is_err());
        assert_eq!(
            TaskKind::parse("topic_extraction").unwrap(),
            TaskKind::TopicExtraction
        );
    }

    #[test]
    fn only_ingest_stages_are_fatal() {
        assert!(TaskKind::Transcription.failure_is_fatal());
        assert!(!TaskKind::Summarization.failure_is_fatal());
        assert!(!TaskKind::SpeakerIdentification.failure_is_fatal());
    }
}
