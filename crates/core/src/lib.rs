//! Core domain types and traits for the transcription pipeline
//!
//! This crate provides the foundational types used across all other crates:
//! - Media file lifecycle (statuses, transitions, timestamps)
//! - Task records and queue routing metadata
//! - Speaker identity types (per-file speakers, profiles, cross-file matches)
//! - Transcript segments
//! - Error taxonomy for user presentation
//! - Notification envelopes
//! - Traits for pluggable backends (transcription, embeddings, chat)

pub mod error;
pub mod error_category;
pub mod media;
pub mod notification;
pub mod settings;
pub mod speaker;
pub mod task;
pub mod topic;
pub mod traits;
pub mod transcript;
pub mod user;

pub use error::{CoreError, Result};
pub use error_category::{CategorizedError, ErrorCategory};
pub use media::{FileStatus, MediaFile, WaveformResolution};
pub use notification::{Notification, NotificationSink, NotificationType, NotifyError};
pub use settings::SystemSetting;
pub use speaker::{ConfidenceLevel, Speaker, SpeakerMatch, SpeakerProfile};
pub use task::{QueueName, TaskKind, TaskRecord, TaskStatus};
pub use topic::{SuggestionStatus, TopicItem, TopicSuggestion};
pub use traits::{
    ChatModel, ChatRequest, ChatResponse, EmbeddingModel, RawSegment, TranscriptionEngine,
    TranscriptionOutput,
};
pub use transcript::TranscriptSegment;
pub use user::{User, UserRole};
