//! Chat-completion client and prompt builders
//!
//! The model itself lives behind an HTTP endpoint; this crate provides
//! the client for any OpenAI-compatible backend plus the prompt builders
//! and response parsers the NLP stages share.

pub mod backend;
pub mod prompts;

pub use backend::{HttpChatModel, HttpChatModelConfig};
pub use prompts::{
    extract_json_block, parse_speaker_predictions, parse_topic_response, speaker_hint_prompt,
    summary_prompt, topic_prompt, SpeakerPrediction, TopicEntry, TopicResponse,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("deadline exceeded after {0:?}")]
    Timeout(std::time::Duration),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response parse error: {0}")]
    Parse(String),
}
