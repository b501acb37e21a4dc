//! Speaker profile consolidation
//!
//! A profile's embedding is the mean of its member speakers' embeddings,
//! stored in the vector index keyed by profile id. Adds are incremental;
//! removals always trigger a full recompute.

use std::sync::Arc;

use transcribe_core::SpeakerProfile;
use transcribe_persistence::{SpeakerNaming, SpeakerProfileStore, SpeakerStore};
use transcribe_search::{DocumentType, EmbeddingDocument};

use crate::similarity::mean_embedding;
use crate::vector_index::VectorIndex;
use crate::SpeakerEngineError;

#[derive(Clone)]
pub struct ProfileService {
    speakers: Arc<dyn SpeakerStore>,
    profiles: Arc<dyn SpeakerProfileStore>,
    index: Arc<dyn VectorIndex>,
}

impl ProfileService {
    pub fn new(
        speakers: Arc<dyn SpeakerStore>,
        profiles: Arc<dyn SpeakerProfileStore>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            speakers,
            profiles,
            index,
        }
    }

    /// Find the user's profile with this name (case-insensitive) or create
    /// one
    pub async fn ensure_profile(
        &self,
        user_id: i64,
        name: &str,
    ) -> Result<SpeakerProfile, SpeakerEngineError> {
        if let Some(existing) = self.profiles.find_by_name(user_id, name).await? {
            return Ok(existing);
        }
        let created = self
            .profiles
            .create(&SpeakerProfile::new(user_id, name))
            .await?;
        tracing::info!(profile_id = created.id, name, "Created speaker profile");
        Ok(created)
    }

    /// A display name was assigned: resolve the matching profile, link the
    /// speaker to it, and consolidate.
    pub async fn link_profile_for_name(
        &self,
        speaker_id: i64,
        user_id: i64,
        name: &str,
    ) -> Result<SpeakerProfile, SpeakerEngineError> {
        let profile = self.ensure_profile(user_id, name).await?;
        self.speakers
            .apply_naming(
                speaker_id,
                SpeakerNaming {
                    profile_id: Some(Some(profile.id)),
                    ..Default::default()
                },
            )
            .await?;
        self.add_speaker_incremental(speaker_id, profile.id).await?;
        Ok(profile)
    }

    /// Incremental consolidation: fold one speaker's embedding into the
    /// profile document. Falls back to a full recompute when the speaker
    /// has no stored embedding.
    pub async fn add_speaker_incremental(
        &self,
        speaker_id: i64,
        profile_id: i64,
    ) -> Result<(), SpeakerEngineError> {
        let Some(speaker_embedding) = self
            .index
            .get_embedding(DocumentType::Speaker, speaker_id)
            .await?
        else {
            tracing::warn!(speaker_id, profile_id, "No embedding stored, recomputing profile");
            return self.recompute(profile_id).await;
        };

        let profile = self
            .profiles
            .get(profile_id)
            .await?
            .ok_or(SpeakerEngineError::NotFound {
                entity: "profile",
                id: profile_id,
            })?;

        let count = profile.embedding_count + 1;
        self.index
            .upsert(
                &EmbeddingDocument {
                    doc_type: DocumentType::Profile,
                    entity_id: profile_id,
                    user_id: profile.user_id,
                    media_file_id: None,
                    display_name: Some(profile.name.clone()),
                    speaker_count: Some(count),
                },
                &speaker_embedding,
            )
            .await?;
        self.profiles.set_embedding_count(profile_id, count).await?;
        tracing::info!(speaker_id, profile_id, count, "Profile embedding updated");
        Ok(())
    }

    /// Full consolidation: average every member speaker's embedding.
    /// Triggered on removals and batch updates.
    pub async fn recompute(&self, profile_id: i64) -> Result<(), SpeakerEngineError> {
        let profile = self
            .profiles
            .get(profile_id)
            .await?
            .ok_or(SpeakerEngineError::NotFound {
                entity: "profile",
                id: profile_id,
            })?;

        let members = self.speakers.list_for_profile(profile_id).await?;
        let member_ids: Vec<i64> = members.iter().map(|s| s.id).collect();
        let embeddings = self.index.mget(DocumentType::Speaker, &member_ids).await?;
        let vectors: Vec<Vec<f32>> = member_ids
            .iter()
            .filter_map(|id| embeddings.get(id).cloned())
            .collect();

        match mean_embedding(&vectors) {
            Some(consolidated) => {
                let count = vectors.len() as i32;
                self.index
                    .upsert(
                        &EmbeddingDocument {
                            doc_type: DocumentType::Profile,
                            entity_id: profile_id,
                            user_id: profile.user_id,
                            media_file_id: None,
                            display_name: Some(profile.name.clone()),
                            speaker_count: Some(count),
                        },
                        &consolidated,
                    )
                    .await?;
                self.profiles.set_embedding_count(profile_id, count).await?;
                tracing::info!(profile_id, count, "Profile embedding recomputed");
            },
            None => {
                // No members left: drop the consolidated document
                self.index.delete_profile(profile_id).await?;
                self.profiles.set_embedding_count(profile_id, 0).await?;
                tracing::info!(profile_id, "Profile embedding cleared");
            },
        }
        Ok(())
    }

    /// Batch recompute; individual failures are reported, not fatal
    pub async fn recompute_many(&self, profile_ids: &[i64]) -> Vec<(i64, bool)> {
        let mut results = Vec::with_capacity(profile_ids.len());
        for &profile_id in profile_ids {
            let ok = match self.recompute(profile_id).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(profile_id, error = %e, "Profile recompute failed");
                    false
                },
            };
            results.push((profile_id, ok));
        }
        results
    }

    /// Unlink a speaker and recompute the profile it left
    pub async fn remove_speaker(
        &self,
        speaker_id: i64,
        profile_id: i64,
    ) -> Result<(), SpeakerEngineError> {
        self.speakers
            .apply_naming(
                speaker_id,
                SpeakerNaming {
                    profile_id: Some(None),
                    ..Default::default()
                },
            )
            .await?;
        self.recompute(profile_id).await
    }

    /// Delete a profile: member speakers keep their rows with the link
    /// nulled; the consolidated embedding leaves the index.
    pub async fn delete_profile(&self, profile_id: i64) -> Result<(), SpeakerEngineError> {
        self.profiles.delete(profile_id).await?;
        self.index.delete_profile(profile_id).await?;
        Ok(())
    }
}
