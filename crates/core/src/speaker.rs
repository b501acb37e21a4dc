//! Speaker identity types: per-file speakers, user-scoped profiles, and
//! cross-file matches

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Confidence bands for speaker matching, used both for auto-accept
/// decisions and UI display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    /// Auto-accept threshold
    pub const HIGH: f32 = 0.75;
    /// Suggest-only threshold; hits below this are discarded
    pub const MEDIUM: f32 = 0.50;

    pub fn from_score(confidence: f32) -> Self {
        if confidence >= Self::HIGH {
            Self::High
        } else if confidence >= Self::MEDIUM {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// A diarized voice within a single media file. `name` keeps the original
/// diarization label (`SPEAKER_01`); `display_name` is the resolved human
/// name, set by the user or auto-applied from a high-confidence match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Speaker {
    pub id: i64,
    pub media_file_id: i64,
    pub user_id: i64,
    pub name: String,
    pub display_name: Option<String>,
    pub suggested_name: Option<String>,
    pub confidence: Option<f32>,
    pub verified: bool,
    /// Weak reference to a SpeakerProfile of the same user
    pub profile_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Speaker {
    pub fn new(media_file_id: i64, user_id: i64, label: &str) -> Self {
        Self {
            id: 0,
            media_file_id,
            user_id,
            name: label.to_string(),
            display_name: None,
            suggested_name: None,
            confidence: None,
            verified: false,
            profile_id: None,
            created_at: Utc::now(),
        }
    }

    /// The name shown to users: display name when resolved, else the raw
    /// diarization label.
    pub fn resolved_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// User-owned cluster of per-file speakers believed to be the same voice.
/// The consolidated embedding lives in the vector index, keyed by this id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerProfile {
    pub id: i64,
    pub user_id: i64,
    /// Unique per user, case-insensitively
    pub name: String,
    pub description: Option<String>,
    pub embedding_count: i32,
    pub last_embedding_update: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SpeakerProfile {
    pub fn new(user_id: i64, name: &str) -> Self {
        Self {
            id: 0,
            user_id,
            name: name.to_string(),
            description: None,
            embedding_count: 0,
            last_embedding_update: None,
            created_at: Utc::now(),
        }
    }
}

/// A similarity link between two speakers of the same user. The pair is
/// stored ordered (`speaker1_id < speaker2_id`) so each pair has at most
/// one row; confidence upserts take the maximum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpeakerMatch {
    pub speaker1_id: i64,
    pub speaker2_id: i64,
    pub confidence: f32,
    pub updated_at: DateTime<Utc>,
}

impl SpeakerMatch {
    /// Build a match with canonical ordering. Rejects self-matches.
    pub fn new(a: i64, b: i64, confidence: f32) -> Result<Self, CoreError> {
        if a == b {
            return Err(CoreError::SelfMatch(a));
        }
        Ok(Self {
            speaker1_id: a.min(b),
            speaker2_id: a.max(b),
            confidence: confidence.clamp(0.0, 1.0),
            updated_at: Utc::now(),
        })
    }

    /// Given one side of the pair, return the other
    pub fn counterpart(&self, speaker_id: i64) -> Option<i64> {
        if self.speaker1_id == speaker_id {
            Some(self.speaker2_id)
        } else if self.speaker2_id == speaker_id {
            Some(self.speaker1_id)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_bands() {
        assert_eq!(ConfidenceLevel::from_score(0.82), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.75), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.61), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.50), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.49), ConfidenceLevel::Low);
    }

    #[test]
    fn match_ordering_is_canonical() {
        let m = SpeakerMatch::new(42, 7, 0.8).unwrap();
        assert_eq!((m.speaker1_id, m.speaker2_id), (7, 42));
        assert_eq!(m.counterpart(7), Some(42));
        assert_eq!(m.counterpart(42), Some(7));
        assert_eq!(m.counterpart(99), None);
    }

    #[test]
    fn self_match_rejected() {
        assert!(SpeakerMatch::new(5, 5, 0.9).is_err());
    }

    #[test]
    fn confidence_clamped() {
        let m = SpeakerMatch::new(1, 2, 1.7).unwrap();
        assert_eq!(m.confidence, 1.0);
    }

    #[test]
    fn resolved_name_prefers_display_name() {
        let mut s = Speaker::new(1, 1, "SPEAKER_01");
        assert_eq!(s.resolved_name(), "SPEAKER_01");
        s.display_name = Some("Alice".into());
        assert_eq!(s.resolved_name(), "Alice");
    }
}
