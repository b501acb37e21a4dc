//! Speaker embedding index using Qdrant
//!
//! One collection holds both per-speaker and per-profile documents; the
//! `document_type` payload field keeps the two populations apart. Cosine
//! scores are mapped onto [0, 1] so the matching thresholds (0.75 / 0.50)
//! apply uniformly.

use qdrant_client::qdrant::{
    condition::ConditionOneOf, value::Kind, Condition, CountPointsBuilder,
    CreateCollectionBuilder, DeletePointsBuilder, Distance, FieldCondition, Filter, GetPointsBuilder,
    Match, PointStruct, PointsIdsList, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;

use transcribe_config::constants::endpoints;

use crate::SearchError;

/// Discriminator between per-file speaker vectors and consolidated profile
/// vectors within the shared collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentType {
    Speaker,
    Profile,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Speaker => "speaker",
            Self::Profile => "profile",
        }
    }
}

/// Point ids pack the entity id with the document type so speaker and
/// profile ids can never collide in the shared collection.
fn point_id(doc_type: DocumentType, id: i64) -> u64 {
    let tag = match doc_type {
        DocumentType::Speaker => 0,
        DocumentType::Profile => 1,
    };
    ((id as u64) << 1) | tag
}

/// Metadata stored alongside each embedding
#[derive(Debug, Clone)]
pub struct EmbeddingDocument {
    pub doc_type: DocumentType,
    /// `speaker_id` or `profile_id` depending on `doc_type`
    pub entity_id: i64,
    pub user_id: i64,
    pub media_file_id: Option<i64>,
    pub display_name: Option<String>,
    /// Consolidated count, only meaningful for profiles
    pub speaker_count: Option<i32>,
}

/// One kNN hit with its payload
#[derive(Debug, Clone)]
pub struct SpeakerHit {
    pub entity_id: i64,
    pub user_id: i64,
    pub media_file_id: Option<i64>,
    pub display_name: Option<String>,
    /// Cosine score mapped onto [0, 1]
    pub score: f32,
}

/// Index configuration
#[derive(Debug, Clone)]
pub struct SpeakerIndexConfig {
    pub endpoint: String,
    pub collection: String,
    pub vector_dim: usize,
    pub api_key: Option<String>,
}

impl Default for SpeakerIndexConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::QDRANT_DEFAULT.to_string(),
            collection: "speaker_embeddings".to_string(),
            vector_dim: transcribe_config::constants::speaker::VOICE_EMBEDDING_DIM,
            api_key: None,
        }
    }
}

impl From<&transcribe_config::SearchConfig> for SpeakerIndexConfig {
    fn from(cfg: &transcribe_config::SearchConfig) -> Self {
        Self {
            endpoint: cfg.endpoint.clone(),
            collection: cfg.speaker_collection.clone(),
            vector_dim: cfg.vector_dim,
            api_key: cfg.api_key.clone(),
        }
    }
}

/// Qdrant-backed speaker embedding index
pub struct SpeakerIndex {
    client: Qdrant,
    config: SpeakerIndexConfig,
}

fn term(key: &str, value: impl Into<qdrant_client::qdrant::r#match::MatchValue>) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: key.to_string(),
            r#match: Some(Match {
                match_value: Some(value.into()),
            }),
            ..Default::default()
        })),
    }
}

/// Qdrant cosine scores live in [-1, 1]; the matching thresholds expect
/// the normalized [0, 1] form.
fn normalize_score(score: f32) -> f32 {
    ((score + 1.0) / 2.0).clamp(0.0, 1.0)
}

impl SpeakerIndex {
    pub async fn new(config: SpeakerIndexConfig) -> Result<Self, SearchError> {
        let mut builder = Qdrant::from_url(&config.endpoint);
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| SearchError::Connection(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create the collection if it does not exist
    pub async fn ensure_collection(&self) -> Result<(), SearchError> {
        let exists = self
            .client
            .collection_exists(&self.config.collection)
            .await
            .map_err(|e| SearchError::VectorStore(e.to_string()))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.config.collection).vectors_config(
                        VectorParamsBuilder::new(self.config.vector_dim as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| SearchError::VectorStore(e.to_string()))?;
            tracing::info!(collection = %self.config.collection, "Created speaker embedding collection");
        }
        Ok(())
    }

    fn build_point(
        &self,
        doc: &EmbeddingDocument,
        embedding: &[f32],
    ) -> Result<PointStruct, SearchError> {
        if embedding.len() != self.config.vector_dim {
            return Err(SearchError::DimensionMismatch {
                expected: self.config.vector_dim,
                got: embedding.len(),
            });
        }

        let mut payload: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
        payload.insert("document_type".into(), doc.doc_type.as_str().into());
        payload.insert("user_id".into(), doc.user_id.into());
        match doc.doc_type {
            DocumentType::Speaker => {
                payload.insert("speaker_id".into(), doc.entity_id.into());
            },
            DocumentType::Profile => {
                payload.insert("profile_id".into(), doc.entity_id.into());
            },
        }
        if let Some(file_id) = doc.media_file_id {
            payload.insert("media_file_id".into(), file_id.into());
        }
        if let Some(ref name) = doc.display_name {
            payload.insert("display_name".into(), name.clone().into());
        }
        if let Some(count) = doc.speaker_count {
            payload.insert("speaker_count".into(), i64::from(count).into());
        }
        payload.insert(
            "created_at".into(),
            chrono::Utc::now().to_rfc3339().into(),
        );

        Ok(PointStruct::new(
            point_id(doc.doc_type, doc.entity_id),
            embedding.to_vec(),
            payload,
        ))
    }

    /// Insert or replace one embedding document
    pub async fn upsert(
        &self,
        doc: &EmbeddingDocument,
        embedding: &[f32],
    ) -> Result<(), SearchError> {
        self.bulk_upsert(&[(doc.clone(), embedding.to_vec())]).await
    }

    /// Insert or replace a batch of embedding documents
    pub async fn bulk_upsert(
        &self,
        docs: &[(EmbeddingDocument, Vec<f32>)],
    ) -> Result<(), SearchError> {
        if docs.is_empty() {
            return Ok(());
        }
        let points: Vec<PointStruct> = docs
            .iter()
            .map(|(doc, emb)| self.build_point(doc, emb))
            .collect::<Result<_, _>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.config.collection, points))
            .await
            .map_err(|e| SearchError::VectorStore(e.to_string()))?;
        Ok(())
    }

    /// Fetch one stored embedding
    pub async fn get_embedding(
        &self,
        doc_type: DocumentType,
        entity_id: i64,
    ) -> Result<Option<Vec<f32>>, SearchError> {
        Ok(self
            .mget(doc_type, &[entity_id])
            .await?
            .remove(&entity_id))
    }

    /// Fetch several stored embeddings in one round trip
    pub async fn mget(
        &self,
        doc_type: DocumentType,
        entity_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<f32>>, SearchError> {
        if entity_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<_> = entity_ids
            .iter()
            .map(|id| point_id(doc_type, *id).into())
            .collect();

        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(&self.config.collection, ids)
                    .with_vectors(true)
                    .with_payload(false),
            )
            .await
            .map_err(|e| SearchError::VectorStore(e.to_string()))?;

        let mut out = HashMap::new();
        for point in response.result {
            let Some(vector) = point.vectors.and_then(|v| match v.vectors_options {
                Some(qdrant_client::qdrant::vectors_output::VectorsOptions::Vector(v)) => {
                    Some(v.data)
                },
                _ => None,
            }) else {
                continue;
            };
            if let Some(id) = point.id.and_then(|pid| match pid.point_id_options {
                Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => Some(n),
                _ => None,
            }) {
                out.insert((id >> 1) as i64, vector);
            }
        }
        Ok(out)
    }

    /// kNN over the user's per-file speaker documents, excluding one
    /// speaker (typically the query's own)
    pub async fn knn_speakers(
        &self,
        query: &[f32],
        user_id: i64,
        k: usize,
        exclude_speaker_id: Option<i64>,
    ) -> Result<Vec<SpeakerHit>, SearchError> {
        let mut filter = Filter {
            must: vec![
                term("user_id", user_id),
                term("document_type", DocumentType::Speaker.as_str().to_string()),
            ],
            ..Default::default()
        };
        if let Some(excluded) = exclude_speaker_id {
            filter.must_not.push(term("speaker_id", excluded));
        }

        self.knn(query, k, filter, "speaker_id").await
    }

    /// kNN over the user's consolidated profile documents.
    ///
    /// The collection is probed first: some backends reject kNN against an
    /// empty filter set, so when the user has no profile documents the
    /// query is skipped entirely.
    pub async fn knn_profiles(
        &self,
        query: &[f32],
        user_id: i64,
        k: usize,
    ) -> Result<Vec<SpeakerHit>, SearchError> {
        if self.count_profiles(user_id).await? == 0 {
            tracing::debug!(user_id, "No profile documents, skipping kNN");
            return Ok(Vec::new());
        }

        let filter = Filter {
            must: vec![
                term("user_id", user_id),
                term("document_type", DocumentType::Profile.as_str().to_string()),
            ],
            ..Default::default()
        };
        self.knn(query, k, filter, "profile_id").await
    }

    /// Number of profile documents stored for a user
    pub async fn count_profiles(&self, user_id: i64) -> Result<u64, SearchError> {
        let filter = Filter {
            must: vec![
                term("user_id", user_id),
                term("document_type", DocumentType::Profile.as_str().to_string()),
            ],
            ..Default::default()
        };
        let response = self
            .client
            .count(
                CountPointsBuilder::new(&self.config.collection)
                    .filter(filter)
                    .exact(false),
            )
            .await
            .map_err(|e| SearchError::Search(e.to_string()))?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    async fn knn(
        &self,
        query: &[f32],
        k: usize,
        filter: Filter,
        id_key: &str,
    ) -> Result<Vec<SpeakerHit>, SearchError> {
        if query.len() != self.config.vector_dim {
            return Err(SearchError::DimensionMismatch {
                expected: self.config.vector_dim,
                got: query.len(),
            });
        }

        let results = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.config.collection, query.to_vec(), k as u64)
                    .filter(filter)
                    .with_payload(true),
            )
            .await
            .map_err(|e| SearchError::Search(e.to_string()))?;

        let hits = results
            .result
            .into_iter()
            .filter_map(|point| {
                let get_int = |key: &str| {
                    point.payload.get(key).and_then(|v| match v.kind {
                        Some(Kind::IntegerValue(n)) => Some(n),
                        _ => None,
                    })
                };
                let get_str = |key: &str| {
                    point.payload.get(key).and_then(|v| match &v.kind {
                        Some(Kind::StringValue(s)) => Some(s.clone()),
                        _ => None,
                    })
                };
                Some(SpeakerHit {
                    entity_id: get_int(id_key)?,
                    user_id: get_int("user_id")?,
                    media_file_id: get_int("media_file_id"),
                    display_name: get_str("display_name"),
                    score: normalize_score(point.score),
                })
            })
            .collect();
        Ok(hits)
    }

    /// Remove a per-file speaker document
    pub async fn delete_speaker(&self, speaker_id: i64) -> Result<(), SearchError> {
        self.delete_point(DocumentType::Speaker, speaker_id).await
    }

    /// Remove a consolidated profile document
    pub async fn delete_profile(&self, profile_id: i64) -> Result<(), SearchError> {
        self.delete_point(DocumentType::Profile, profile_id).await
    }

    async fn delete_point(
        &self,
        doc_type: DocumentType,
        entity_id: i64,
    ) -> Result<(), SearchError> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.config.collection).points(PointsIdsList {
                    ids: vec![point_id(doc_type, entity_id).into()],
                }),
            )
            .await
            .map_err(|e| SearchError::VectorStore(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_never_collide_across_types() {
        assert_ne!(
            point_id(DocumentType::Speaker, 21),
            point_id(DocumentType::Profile, 21)
        );
        // and the entity id is recoverable
        assert_eq!(point_id(DocumentType::Speaker, 21) >> 1, 21);
        assert_eq!(point_id(DocumentType::Profile, 21) >> 1, 21);
    }

    #[test]
    fn score_normalization() {
        assert_eq!(normalize_score(1.0), 1.0);
        assert_eq!(normalize_score(-1.0), 0.0);
        assert_eq!(normalize_score(0.0), 0.5);
        assert_eq!(normalize_score(1.5), 1.0);
    }

    #[test]
    fn config_default() {
        let config = SpeakerIndexConfig::default();
        assert_eq!(config.vector_dim, 512);
        assert_eq!(config.collection, "speaker_embeddings");
    }
}
