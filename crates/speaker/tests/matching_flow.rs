//! End-to-end matching scenarios against in-memory stores and index

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use transcribe_core::{Speaker, SpeakerMatch};
use transcribe_persistence::memory::{
    MemSpeakerMatchStore, MemSpeakerProfileStore, MemSpeakerStore,
};
use transcribe_persistence::{
    SpeakerMatchStore, SpeakerNaming, SpeakerProfileStore, SpeakerStore,
};
use transcribe_search::{DocumentType, EmbeddingDocument, SearchError, SpeakerHit};
use transcribe_speaker::{
    cosine_similarity, MatchThresholds, ProfileService, SpeakerMatchingService, VectorIndex,
};

/// Brute-force in-memory index with real cosine scoring
#[derive(Default)]
pub struct MemIndex {
    docs: Mutex<HashMap<(u8, i64), (EmbeddingDocument, Vec<f32>)>>,
}

fn type_tag(t: DocumentType) -> u8 {
    match t {
        DocumentType::Speaker => 0,
        DocumentType::Profile => 1,
    }
}

#[async_trait]
impl VectorIndex for MemIndex {
    async fn upsert(
        &self,
        doc: &EmbeddingDocument,
        embedding: &[f32],
    ) -> Result<(), SearchError> {
        self.docs.lock().insert(
            (type_tag(doc.doc_type), doc.entity_id),
            (doc.clone(), embedding.to_vec()),
        );
        Ok(())
    }

    async fn get_embedding(
        &self,
        doc_type: DocumentType,
        entity_id: i64,
    ) -> Result<Option<Vec<f32>>, SearchError> {
        Ok(self
            .docs
            .lock()
            .get(&(type_tag(doc_type), entity_id))
            .map(|(_, e)| e.clone()))
    }

    async fn mget(
        &self,
        doc_type: DocumentType,
        entity_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<f32>>, SearchError> {
        let docs = self.docs.lock();
        Ok(entity_ids
            .iter()
            .filter_map(|id| {
                docs.get(&(type_tag(doc_type), *id))
                    .map(|(_, e)| (*id, e.clone()))
            })
            .collect())
    }

    async fn knn_speakers(
        &self,
        query: &[f32],
        user_id: i64,
        k: usize,
        exclude_speaker_id: Option<i64>,
    ) -> Result<Vec<SpeakerHit>, SearchError> {
        self.knn(query, user_id, k, DocumentType::Speaker, exclude_speaker_id)
    }

    async fn knn_profiles(
        &self,
        query: &[f32],
        user_id: i64,
        k: usize,
    ) -> Result<Vec<SpeakerHit>, SearchError> {
        // pre-probe contract: no profile docs -> no query
        let has_profiles = self
            .docs
            .lock()
            .values()
            .any(|(d, _)| d.doc_type == DocumentType::Profile && d.user_id == user_id);
        if !has_profiles {
            return Ok(Vec::new());
        }
        self.knn(query, user_id, k, DocumentType::Profile, None)
    }

    async fn delete_speaker(&self, speaker_id: i64) -> Result<(), SearchError> {
        self.docs.lock().remove(&(0, speaker_id));
        Ok(())
    }

    async fn delete_profile(&self, profile_id: i64) -> Result<(), SearchError> {
        self.docs.lock().remove(&(1, profile_id));
        Ok(())
    }
}

impl MemIndex {
    fn knn(
        &self,
        query: &[f32],
        user_id: i64,
        k: usize,
        doc_type: DocumentType,
        exclude: Option<i64>,
    ) -> Result<Vec<SpeakerHit>, SearchError> {
        let docs = self.docs.lock();
        let mut hits: Vec<SpeakerHit> = docs
            .values()
            .filter(|(d, _)| d.doc_type == doc_type && d.user_id == user_id)
            .filter(|(d, _)| Some(d.entity_id) != exclude)
            .map(|(d, e)| SpeakerHit {
                entity_id: d.entity_id,
                user_id: d.user_id,
                media_file_id: d.media_file_id,
                display_name: d.display_name.clone(),
                score: cosine_similarity(query, e),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        hits.truncate(k);
        Ok(hits)
    }
}

struct Harness {
    speakers: Arc<MemSpeakerStore>,
    profiles: Arc<MemSpeakerProfileStore>,
    matches: Arc<MemSpeakerMatchStore>,
    index: Arc<MemIndex>,
    service: SpeakerMatchingService,
}

fn harness() -> Harness {
    let speakers = Arc::new(MemSpeakerStore::default());
    let profiles = Arc::new(MemSpeakerProfileStore::default());
    let matches = Arc::new(MemSpeakerMatchStore::default());
    let index = Arc::new(MemIndex::default());
    let profile_service = ProfileService::new(
        speakers.clone() as Arc<dyn SpeakerStore>,
        profiles.clone() as Arc<dyn SpeakerProfileStore>,
        index.clone() as Arc<dyn VectorIndex>,
    );
    let service = SpeakerMatchingService::new(
        speakers.clone() as Arc<dyn SpeakerStore>,
        matches.clone() as Arc<dyn SpeakerMatchStore>,
        index.clone() as Arc<dyn VectorIndex>,
        profile_service,
        MatchThresholds::default(),
    );
    Harness {
        speakers,
        profiles,
        matches,
        index,
        service,
    }
}

/// A unit vector whose cosine-with-`base` lands on the requested
/// normalized score ((cos+1)/2 = score)
fn vector_with_score(score: f32) -> Vec<f32> {
    let cos = 2.0 * score - 1.0;
    let sin = (1.0 - cos * cos).max(0.0).sqrt();
    vec![cos, sin, 0.0]
}

fn base_vector() -> Vec<f32> {
    vec![1.0, 0.0, 0.0]
}

async fn store_speaker_embedding(h: &Harness, speaker: &Speaker, embedding: &[f32]) {
    h.index
        .upsert(
            &EmbeddingDocument {
                doc_type: DocumentType::Speaker,
                entity_id: speaker.id,
                user_id: speaker.user_id,
                media_file_id: Some(speaker.media_file_id),
                display_name: speaker.display_name.clone(),
                speaker_count: None,
            },
            embedding,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn retroactive_high_confidence_applies_label_and_profile() {
    let h = harness();
    // Speaker A in file 1, speaker B in file 2, cosine score 0.82
    let a = h
        .speakers
        .create_for_file(1, 7, &["SPEAKER_00".to_string()])
        .await
        .unwrap()
        .remove(0);
    let b = h
        .speakers
        .create_for_file(2, 7, &["SPEAKER_01".to_string()])
        .await
        .unwrap()
        .remove(0);
    store_speaker_embedding(&h, &a, &base_vector()).await;
    store_speaker_embedding(&h, &b, &vector_with_score(0.82)).await;

    let outcome = h.service.retroactive_label(a.id, "Alice").await.unwrap();
    assert_eq!(outcome.auto_applied, vec![b.id]);
    assert!(outcome.suggested.is_empty());

    let a = h.speakers.get(a.id).await.unwrap().unwrap();
    let b = h.speakers.get(b.id).await.unwrap().unwrap();
    assert_eq!(a.display_name.as_deref(), Some("Alice"));
    assert!(a.verified);
    assert_eq!(b.display_name.as_deref(), Some("Alice"));
    assert!(b.verified);

    // both linked to the same profile named Alice
    let profile = h.profiles.find_by_name(7, "alice").await.unwrap().unwrap();
    assert_eq!(a.profile_id, Some(profile.id));
    assert_eq!(b.profile_id, Some(profile.id));

    // match row stored with canonical ordering and the observed score
    let matches = h.matches.list_for_speaker(a.id).await.unwrap();
    assert_eq!(matches.len(), 1);
    let m = &matches[0];
    assert_eq!(
        (m.speaker1_id, m.speaker2_id),
        (a.id.min(b.id), a.id.max(b.id))
    );
    assert!((m.confidence - 0.82).abs() < 0.01);
}

#[tokio::test]
async fn retroactive_medium_confidence_only_suggests() {
    let h = harness();
    let a = h
        .speakers
        .create_for_file(1, 7, &["SPEAKER_00".to_string()])
        .await
        .unwrap()
        .remove(0);
    let b = h
        .speakers
        .create_for_file(2, 7, &["SPEAKER_01".to_string()])
        .await
        .unwrap()
        .remove(0);
    store_speaker_embedding(&h, &a, &base_vector()).await;
    store_speaker_embedding(&h, &b, &vector_with_score(0.61)).await;

    let outcome = h.service.retroactive_label(a.id, "Alice").await.unwrap();
    assert!(outcome.auto_applied.is_empty());
    assert_eq!(outcome.suggested, vec![b.id]);

    let b = h.speakers.get(b.id).await.unwrap().unwrap();
    assert_eq!(b.display_name, None);
    assert_eq!(b.suggested_name.as_deref(), Some("Alice"));
    assert!((b.confidence.unwrap() - 0.61).abs() < 0.01);
    assert!(!b.verified);
    // no profile link below the high threshold
    assert_eq!(b.profile_id, None);

    let matches = h.matches.list_for_speaker(b.id).await.unwrap();
    assert_eq!(matches.len(), 1);
}

#[tokio::test]
async fn matches_below_medium_are_discarded() {
    let h = harness();
    let a = h
        .speakers
        .create_for_file(1, 7, &["SPEAKER_00".to_string()])
        .await
        .unwrap()
        .remove(0);
    let b = h
        .speakers
        .create_for_file(2, 7, &["SPEAKER_01".to_string()])
        .await
        .unwrap()
        .remove(0);
    store_speaker_embedding(&h, &a, &base_vector()).await;
    store_speaker_embedding(&h, &b, &vector_with_score(0.3)).await;

    let outcome = h.service.retroactive_label(a.id, "Alice").await.unwrap();
    assert!(outcome.auto_applied.is_empty());
    assert!(outcome.suggested.is_empty());
    assert!(h.matches.list_for_speaker(b.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn new_speaker_auto_accepts_verified_high_match() {
    let h = harness();
    // existing verified speaker "Bob" with a stored embedding
    let existing = h
        .speakers
        .create_for_file(1, 7, &["SPEAKER_00".to_string()])
        .await
        .unwrap()
        .remove(0);
    h.speakers
        .apply_naming(
            existing.id,
            SpeakerNaming {
                display_name: Some("Bob".to_string()),
                verified: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    store_speaker_embedding(&h, &h.speakers.get_sync(existing.id), &base_vector()).await;

    // new speaker in another file with a near-identical voice
    let new = h
        .speakers
        .create_for_file(2, 7, &["SPEAKER_00".to_string()])
        .await
        .unwrap()
        .remove(0);
    let outcome = h
        .service
        .match_new_speaker(&new, 2, 7, &vector_with_score(0.9))
        .await
        .unwrap();
    assert!(outcome.auto_applied);
    assert_eq!(outcome.suggested_name.as_deref(), Some("Bob"));

    let new = h.speakers.get(new.id).await.unwrap().unwrap();
    assert_eq!(new.display_name.as_deref(), Some("Bob"));
    assert!(new.verified);
    // its embedding is now searchable
    assert!(h
        .index
        .get_embedding(DocumentType::Speaker, new.id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn unverified_counterpart_never_auto_applies() {
    let h = harness();
    let existing = h
        .speakers
        .create_for_file(1, 7, &["SPEAKER_00".to_string()])
        .await
        .unwrap()
        .remove(0);
    // named but not verified
    h.speakers
        .apply_naming(
            existing.id,
            SpeakerNaming {
                display_name: Some("Carol".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    store_speaker_embedding(&h, &h.speakers.get_sync(existing.id), &base_vector()).await;

    let new = h
        .speakers
        .create_for_file(2, 7, &["SPEAKER_00".to_string()])
        .await
        .unwrap()
        .remove(0);
    let outcome = h
        .service
        .match_new_speaker(&new, 2, 7, &vector_with_score(0.9))
        .await
        .unwrap();
    assert!(!outcome.auto_applied);

    let new = h.speakers.get(new.id).await.unwrap().unwrap();
    assert_eq!(new.display_name, None);
    assert!(!new.verified);
    // the match row itself is still recorded
    assert_eq!(h.matches.list_for_speaker(new.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn match_upserts_keep_the_maximum_confidence() {
    let h = harness();
    let m1 = SpeakerMatch::new(1, 2, 0.6).unwrap();
    let m2 = SpeakerMatch::new(2, 1, 0.8).unwrap();
    let m3 = SpeakerMatch::new(1, 2, 0.7).unwrap();
    h.matches.upsert(m1).await.unwrap();
    h.matches.upsert(m2).await.unwrap();
    h.matches.upsert(m3).await.unwrap();

    let matches = h.matches.list_for_speaker(1).await.unwrap();
    assert_eq!(matches.len(), 1);
    assert!((matches[0].confidence - 0.8).abs() < 1e-6);
}

#[tokio::test]
async fn profile_consolidation_counts_members() {
    let h = harness();
    let a = h
        .speakers
        .create_for_file(1, 7, &["SPEAKER_00".to_string()])
        .await
        .unwrap()
        .remove(0);
    let b = h
        .speakers
        .create_for_file(2, 7, &["SPEAKER_00".to_string()])
        .await
        .unwrap()
        .remove(0);
    store_speaker_embedding(&h, &a, &base_vector()).await;
    store_speaker_embedding(&h, &b, &vector_with_score(0.9)).await;

    h.service.retroactive_label(a.id, "Dana").await.unwrap();

    let profile = h.profiles.find_by_name(7, "Dana").await.unwrap().unwrap();
    let members = h.speakers.list_for_profile(profile.id).await.unwrap();
    assert_eq!(members.len(), 2);

    // full recompute converges the count to the membership
    let profile_service = ProfileService::new(
        h.speakers.clone() as Arc<dyn SpeakerStore>,
        h.profiles.clone() as Arc<dyn SpeakerProfileStore>,
        h.index.clone() as Arc<dyn VectorIndex>,
    );
    profile_service.recompute(profile.id).await.unwrap();
    let profile = h.profiles.get(profile.id).await.unwrap().unwrap();
    assert_eq!(profile.embedding_count, 2);
    assert!(h
        .index
        .get_embedding(DocumentType::Profile, profile.id)
        .await
        .unwrap()
        .is_some());

    // removing a member recomputes down to one
    profile_service
        .remove_speaker(b.id, profile.id)
        .await
        .unwrap();
    let profile = h.profiles.get(profile.id).await.unwrap().unwrap();
    assert_eq!(profile.embedding_count, 1);
}

#[tokio::test]
async fn profile_knn_skips_when_user_has_no_profiles() {
    let h = harness();
    let hits = h
        .service
        .match_to_profiles(&base_vector(), 42)
        .await
        .unwrap();
    assert!(hits.is_empty());
}
