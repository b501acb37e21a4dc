//! Vector index seam
//!
//! The engine depends on this trait rather than the Qdrant client directly
//! so matching logic can be exercised against an in-memory index in tests.

use async_trait::async_trait;
use std::collections::HashMap;

use transcribe_search::{DocumentType, EmbeddingDocument, SearchError, SpeakerHit, SpeakerIndex};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(
        &self,
        doc: &EmbeddingDocument,
        embedding: &[f32],
    ) -> Result<(), SearchError>;

    async fn get_embedding(
        &self,
        doc_type: DocumentType,
        entity_id: i64,
    ) -> Result<Option<Vec<f32>>, SearchError>;

    async fn mget(
        &self,
        doc_type: DocumentType,
        entity_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<f32>>, SearchError>;

    async fn knn_speakers(
        &self,
        query: &[f32],
        user_id: i64,
        k: usize,
        exclude_speaker_id: Option<i64>,
    ) -> Result<Vec<SpeakerHit>, SearchError>;

    /// Must pre-probe and skip the query when the user has no profile
    /// documents
    async fn knn_profiles(
        &self,
        query: &[f32],
        user_id: i64,
        k: usize,
    ) -> Result<Vec<SpeakerHit>, SearchError>;

    async fn delete_speaker(&self, speaker_id: i64) -> Result<(), SearchError>;

    async fn delete_profile(&self, profile_id: i64) -> Result<(), SearchError>;
}

#[async_trait]
impl VectorIndex for SpeakerIndex {
    async fn upsert(
        &self,
        doc: &EmbeddingDocument,
        embedding: &[f32],
    ) -> Result<(), SearchError> {
        SpeakerIndex::upsert(self, doc, embedding).await
    }

    async fn get_embedding(
        &self,
        doc_type: DocumentType,
        entity_id: i64,
    ) -> Result<Option<Vec<f32>>, SearchError> {
        SpeakerIndex::get_embedding(self, doc_type, entity_id).await
    }

    async fn mget(
        &self,
        doc_type: DocumentType,
        entity_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<f32>>, SearchError> {
        SpeakerIndex::mget(self, doc_type, entity_ids).await
    }

    async fn knn_speakers(
        &self,
        query: &[f32],
        user_id: i64,
        k: usize,
        exclude_speaker_id: Option<i64>,
    ) -> Result<Vec<SpeakerHit>, SearchError> {
        SpeakerIndex::knn_speakers(self, query, user_id, k, exclude_speaker_id).await
    }

    async fn knn_profiles(
        &self,
        query: &[f32],
        user_id: i64,
        k: usize,
    ) -> Result<Vec<SpeakerHit>, SearchError> {
        SpeakerIndex::knn_profiles(self, query, user_id, k).await
    }

    async fn delete_speaker(&self, speaker_id: i64) -> Result<(), SearchError> {
        SpeakerIndex::delete_speaker(self, speaker_id).await
    }

    async fn delete_profile(&self, profile_id: i64) -> Result<(), SearchError> {
        SpeakerIndex::delete_profile(self, profile_id).await
    }
}
