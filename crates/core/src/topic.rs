//! Tag and collection suggestions extracted from transcripts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle of a suggestion set. Accepting individual items is recorded in
/// `user_decisions`; a wholesale rejection flips the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    Pending,
    Rejected,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Rejected => "rejected",
        }
    }
}

/// One suggested tag or collection with the model's confidence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicItem {
    pub name: String,
    pub confidence: f32,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Per-file suggestion set produced by the topic extraction stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSuggestion {
    pub id: i64,
    pub media_file_id: i64,
    pub suggested_tags: Vec<TopicItem>,
    pub suggested_collections: Vec<TopicItem>,
    pub status: SuggestionStatus,
    /// item name -> "accepted" | "rejected", recorded as the user decides
    pub user_decisions: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl TopicSuggestion {
    pub fn new(
        media_file_id: i64,
        suggested_tags: Vec<TopicItem>,
        suggested_collections: Vec<TopicItem>,
    ) -> Self {
        Self {
            id: 0,
            media_file_id,
            suggested_tags,
            suggested_collections,
            status: SuggestionStatus::Pending,
            user_decisions: HashMap::new(),
            created_at: Utc::now(),
        }
    }
}
