//! Cross-file speaker matching
//!
//! After a file's speakers receive embeddings, each is searched against
//! the user's other speakers. Hits at or above the medium threshold become
//! SpeakerMatch rows; a high-confidence hit on a verified, named speaker
//! auto-applies that name. Labeling a speaker later re-runs the comparison
//! the other way (retroactive labeling).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use transcribe_config::constants::speaker::MATCH_CANDIDATES;
use transcribe_core::{
    ConfidenceLevel, EmbeddingModel, RawSegment, Speaker, SpeakerMatch,
};
use transcribe_persistence::{SpeakerMatchStore, SpeakerNaming, SpeakerStore};
use transcribe_search::{DocumentType, EmbeddingDocument, SpeakerHit};

use crate::profiles::ProfileService;
use crate::similarity::cosine_similarity;
use crate::vector_index::VectorIndex;
use crate::{embedding, SpeakerEngineError};

/// Matching thresholds; defaults follow the confidence bands
#[derive(Debug, Clone, Copy)]
pub struct MatchThresholds {
    pub high: f32,
    pub medium: f32,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            high: ConfidenceLevel::HIGH,
            medium: ConfidenceLevel::MEDIUM,
        }
    }
}

impl From<&transcribe_config::SpeakerConfig> for MatchThresholds {
    fn from(cfg: &transcribe_config::SpeakerConfig) -> Self {
        Self {
            high: cfg.high_confidence,
            medium: cfg.medium_confidence,
        }
    }
}

/// Result of processing one speaker of a file
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub speaker_id: i64,
    pub label: String,
    pub suggested_name: Option<String>,
    pub confidence: Option<f32>,
    pub auto_applied: bool,
}

/// Result of a retroactive labeling pass
#[derive(Debug, Clone, Default)]
pub struct RetroactiveOutcome {
    /// Speakers that received the label and were verified
    pub auto_applied: Vec<i64>,
    /// Speakers that only received a suggestion
    pub suggested: Vec<i64>,
}

pub struct SpeakerMatchingService {
    speakers: Arc<dyn SpeakerStore>,
    matches: Arc<dyn SpeakerMatchStore>,
    index: Arc<dyn VectorIndex>,
    profile_service: ProfileService,
    thresholds: MatchThresholds,
}

impl SpeakerMatchingService {
    pub fn new(
        speakers: Arc<dyn SpeakerStore>,
        matches: Arc<dyn SpeakerMatchStore>,
        index: Arc<dyn VectorIndex>,
        profile_service: ProfileService,
        thresholds: MatchThresholds,
    ) -> Self {
        Self {
            speakers,
            matches,
            index,
            profile_service,
            thresholds,
        }
    }

    /// Embed and match every speaker of a freshly transcribed file
    pub async fn process_file_speakers(
        &self,
        media_file_id: i64,
        user_id: i64,
        audio_path: &Path,
        segments: &[RawSegment],
        speaker_mapping: &HashMap<String, i64>,
        model: &dyn EmbeddingModel,
    ) -> Result<Vec<MatchOutcome>, SpeakerEngineError> {
        let embeddings =
            embedding::extract_speaker_embeddings(model, audio_path, segments, speaker_mapping)
                .await?;

        let mut outcomes = Vec::new();
        for (speaker_id, speaker_embedding) in embeddings {
            let Some(speaker) = self.speakers.get(speaker_id).await? else {
                tracing::warn!(speaker_id, "Speaker row vanished before matching");
                continue;
            };

            let outcome = self
                .match_new_speaker(&speaker, media_file_id, user_id, &speaker_embedding)
                .await?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Store a new speaker's embedding and run cross-file matching
    pub async fn match_new_speaker(
        &self,
        speaker: &Speaker,
        media_file_id: i64,
        user_id: i64,
        speaker_embedding: &[f32],
    ) -> Result<MatchOutcome, SpeakerEngineError> {
        let hits = self
            .index
            .knn_speakers(
                speaker_embedding,
                user_id,
                MATCH_CANDIDATES,
                Some(speaker.id),
            )
            .await?;

        // Every hit above medium persists as a match row
        for hit in hits.iter().filter(|h| h.score >= self.thresholds.medium) {
            if let Ok(m) = SpeakerMatch::new(speaker.id, hit.entity_id, hit.score) {
                self.matches.upsert(m).await?;
            }
        }

        let mut outcome = MatchOutcome {
            speaker_id: speaker.id,
            label: speaker.name.clone(),
            suggested_name: None,
            confidence: None,
            auto_applied: false,
        };
        let mut display_name_for_index = speaker.display_name.clone();

        if let Some((hit, counterpart)) = self.best_verified_hit(&hits).await? {
            if hit.score >= self.thresholds.high {
                // Auto-apply: take the verified counterpart's name, and its
                // profile when it has one
                let name = counterpart.display_name.clone().unwrap_or_default();
                self.speakers
                    .apply_naming(
                        speaker.id,
                        SpeakerNaming {
                            display_name: Some(name.clone()),
                            suggested_name: Some(name.clone()),
                            confidence: Some(hit.score),
                            verified: Some(true),
                            profile_id: counterpart.profile_id.map(Some),
                        },
                    )
                    .await?;
                if counterpart.profile_id.is_none() {
                    self.profile_service
                        .link_profile_for_name(speaker.id, user_id, &name)
                        .await?;
                } else if let Some(profile_id) = counterpart.profile_id {
                    self.profile_service
                        .add_speaker_incremental(speaker.id, profile_id)
                        .await?;
                }
                outcome.suggested_name = Some(name.clone());
                outcome.confidence = Some(hit.score);
                outcome.auto_applied = true;
                display_name_for_index = Some(name);
            } else {
                // Medium band: suggestion only
                let name = counterpart.display_name.clone().unwrap_or_default();
                self.speakers
                    .apply_naming(
                        speaker.id,
                        SpeakerNaming {
                            suggested_name: Some(name.clone()),
                            confidence: Some(hit.score),
                            ..Default::default()
                        },
                    )
                    .await?;
                outcome.suggested_name = Some(name);
                outcome.confidence = Some(hit.score);
            }
        } else if let Some(profile_hit) = self
            .match_to_profiles(speaker_embedding, user_id)
            .await?
            .into_iter()
            .find(|h| h.score >= self.thresholds.medium)
        {
            // No speaker-level hit: fall back to a consolidated profile
            if let Some(name) = profile_hit.display_name.clone() {
                self.speakers
                    .apply_naming(
                        speaker.id,
                        SpeakerNaming {
                            suggested_name: Some(name.clone()),
                            confidence: Some(profile_hit.score),
                            ..Default::default()
                        },
                    )
                    .await?;
                outcome.suggested_name = Some(name);
                outcome.confidence = Some(profile_hit.score);
            }
        }

        self.index
            .upsert(
                &EmbeddingDocument {
                    doc_type: DocumentType::Speaker,
                    entity_id: speaker.id,
                    user_id,
                    media_file_id: Some(media_file_id),
                    display_name: display_name_for_index,
                    speaker_count: None,
                },
                speaker_embedding,
            )
            .await?;

        Ok(outcome)
    }

    /// Highest-scoring hit whose counterpart is verified and named
    async fn best_verified_hit(
        &self,
        hits: &[SpeakerHit],
    ) -> Result<Option<(SpeakerHit, Speaker)>, SpeakerEngineError> {
        let mut sorted: Vec<&SpeakerHit> = hits
            .iter()
            .filter(|h| h.score >= self.thresholds.medium)
            .collect();
        sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        for hit in sorted {
            if let Some(counterpart) = self.speakers.get(hit.entity_id).await? {
                if counterpart.verified && counterpart.display_name.is_some() {
                    return Ok(Some((hit.clone(), counterpart)));
                }
            }
        }
        Ok(None)
    }

    /// kNN against consolidated profiles; the index pre-probes and skips
    /// the query when the user has none
    pub async fn match_to_profiles(
        &self,
        speaker_embedding: &[f32],
        user_id: i64,
    ) -> Result<Vec<SpeakerHit>, SpeakerEngineError> {
        Ok(self
            .index
            .knn_profiles(speaker_embedding, user_id, MATCH_CANDIDATES)
            .await?)
    }

    /// A user labeled a speaker: apply the name, link a profile, and sweep
    /// the user's other speakers for the same voice.
    pub async fn retroactive_label(
        &self,
        speaker_id: i64,
        display_name: &str,
    ) -> Result<RetroactiveOutcome, SpeakerEngineError> {
        let speaker = self
            .speakers
            .get(speaker_id)
            .await?
            .ok_or(SpeakerEngineError::NotFound {
                entity: "speaker",
                id: speaker_id,
            })?;

        self.speakers
            .apply_naming(
                speaker_id,
                SpeakerNaming {
                    display_name: Some(display_name.to_string()),
                    verified: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        let profile = self
            .profile_service
            .link_profile_for_name(speaker_id, speaker.user_id, display_name)
            .await?;

        let mut outcome = RetroactiveOutcome::default();
        let Some(query) = self
            .index
            .get_embedding(DocumentType::Speaker, speaker_id)
            .await?
        else {
            tracing::warn!(speaker_id, "No stored embedding, skipping retroactive sweep");
            return Ok(outcome);
        };

        // Refresh the stored document so future matches see the new name
        self.index
            .upsert(
                &EmbeddingDocument {
                    doc_type: DocumentType::Speaker,
                    entity_id: speaker_id,
                    user_id: speaker.user_id,
                    media_file_id: Some(speaker.media_file_id),
                    display_name: Some(display_name.to_string()),
                    speaker_count: None,
                },
                &query,
            )
            .await?;

        let candidates: Vec<Speaker> = self
            .speakers
            .list_for_user(speaker.user_id)
            .await?
            .into_iter()
            .filter(|s| s.id != speaker_id)
            // verified speakers already resolved to a different name stay
            .filter(|s| !(s.verified && s.display_name.as_deref() != Some(display_name)))
            .collect();

        let ids: Vec<i64> = candidates.iter().map(|s| s.id).collect();
        let embeddings = self.index.mget(DocumentType::Speaker, &ids).await?;

        for candidate in candidates {
            let Some(candidate_embedding) = embeddings.get(&candidate.id) else {
                continue;
            };
            let score = cosine_similarity(&query, candidate_embedding);
            if score < self.thresholds.medium {
                continue;
            }

            if let Ok(m) = SpeakerMatch::new(speaker_id, candidate.id, score) {
                self.matches.upsert(m).await?;
            }

            if score >= self.thresholds.high {
                self.speakers
                    .apply_naming(
                        candidate.id,
                        SpeakerNaming {
                            display_name: Some(display_name.to_string()),
                            suggested_name: Some(display_name.to_string()),
                            confidence: Some(score),
                            verified: Some(true),
                            profile_id: Some(Some(profile.id)),
                        },
                    )
                    .await?;
                self.profile_service
                    .add_speaker_incremental(candidate.id, profile.id)
                    .await?;
                outcome.auto_applied.push(candidate.id);
            } else {
                self.speakers
                    .apply_naming(
                        candidate.id,
                        SpeakerNaming {
                            suggested_name: Some(display_name.to_string()),
                            confidence: Some(score),
                            ..Default::default()
                        },
                    )
                    .await?;
                outcome.suggested.push(candidate.id);
            }
        }

        tracing::info!(
            speaker_id,
            auto_applied = outcome.auto_applied.len(),
            suggested = outcome.suggested.len(),
            "Retroactive labeling complete"
        );
        Ok(outcome)
    }
}
