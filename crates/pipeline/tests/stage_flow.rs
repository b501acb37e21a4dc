//! Stage scenarios driven end to end against in-memory stores, a
//! filesystem object store, and fake model backends

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use transcribe_core::{
    ChatModel, ChatRequest, ChatResponse, EmbeddingModel, FileStatus, MediaFile,
    NotificationSink, NotificationType, RawSegment, TaskKind, TranscriptionEngine,
    TranscriptionOutput,
};
use transcribe_engine::{
    BroadcastNotificationSink, EngineError, LifecycleService, ProgressReporter, ProgressSignal,
    TaskContext, TaskHandler, TaskSubmitter,
};
use transcribe_persistence::memory::{
    MemMediaFileStore, MemSegmentStore, MemSettingsStore, MemSpeakerMatchStore,
    MemSpeakerProfileStore, MemSpeakerStore, MemTaskStore, MemTopicStore,
};
use transcribe_persistence::{
    MediaFileStore, NewSegment, SegmentStore, SpeakerMatchStore, SpeakerProfileStore,
    SpeakerStore, SystemSettingsStore, TaskStore, TopicStore,
};
use transcribe_pipeline::{
    register_handlers, PipelineDeps, SpeakerHintHandler, SummarizationHandler,
    TopicExtractionHandler, TranscriptionHandler, WaveformHandler,
};
use transcribe_search::{
    DocumentType, EmbeddingDocument, SearchError, SpeakerHit, SummaryIndex, SummaryIndexConfig,
};
use transcribe_speaker::{
    cosine_similarity, MatchThresholds, ProfileService, SpeakerMatchingService, VectorIndex,
};
use transcribe_storage::{FsObjectStore, ObjectStore};

// ---- fakes ----

#[derive(Default)]
struct MemIndex {
    docs: Mutex<HashMap<(u8, i64), (EmbeddingDocument, Vec<f32>)>>,
}

fn tag(t: DocumentType) -> u8 {
    match t {
        DocumentType::Speaker => 0,
        DocumentType::Profile => 1,
    }
}

#[async_trait]
impl VectorIndex for MemIndex {
    async fn upsert(&self, doc: &EmbeddingDocument, embedding: &[f32]) -> Result<(), SearchError> {
        self.docs
            .lock()
            .insert((tag(doc.doc_type), doc.entity_id), (doc.clone(), embedding.to_vec()));
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
            .get(&(tag(doc_type), entity_id))
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
            .filter_map(|id| docs.get(&(tag(doc_type), *id)).map(|(_, e)| (*id, e.clone())))
            .collect())
    }

    async fn knn_speakers(
        &self,
        query: &[f32],
        user_id: i64,
        k: usize,
        exclude_speaker_id: Option<i64>,
    ) -> Result<Vec<SpeakerHit>, SearchError> {
        let docs = self.docs.lock();
        let mut hits: Vec<SpeakerHit> = docs
            .values()
            .filter(|(d, _)| d.doc_type == DocumentType::Speaker && d.user_id == user_id)
            .filter(|(d, _)| Some(d.entity_id) != exclude_speaker_id)
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

    async fn knn_profiles(
        &self,
        _query: &[f32],
        user_id: i64,
        _k: usize,
    ) -> Result<Vec<SpeakerHit>, SearchError> {
        let has_profiles = self
            .docs
            .lock()
            .values()
            .any(|(d, _)| d.doc_type == DocumentType::Profile && d.user_id == user_id);
        if !has_profiles {
            return Ok(Vec::new());
        }
        Ok(Vec::new())
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

/// Two speakers, three segments, forty-five minutes of audio
struct FakeTranscriber;

#[async_trait]
impl TranscriptionEngine for FakeTranscriber {
    async fn transcribe(&self, _audio_path: &Path) -> anyhow::Result<TranscriptionOutput> {
        Ok(TranscriptionOutput {
            segments: vec![
                RawSegment {
                    start: 0.0,
                    end: 4.2,
                    text: "Good morning everyone, thanks for joining.".to_string(),
                    speaker_label: Some("SPEAKER_00".to_string()),
                    confidence: Some(0.95),
                },
                RawSegment {
                    start: 4.5,
                    end: 9.0,
                    text: "Happy to be here, let's go through the agenda.".to_string(),
                    speaker_label: Some("SPEAKER_01".to_string()),
                    confidence: Some(0.93),
                },
                RawSegment {
                    start: 9.2,
                    end: 14.0,
                    text: format!("First item is the {} word.", "x".repeat(80)),
                    speaker_label: Some("SPEAKER_00".to_string()),
                    confidence: Some(0.91),
                },
            ],
            language: Some("en".to_string()),
            duration: Some(2700.0),
        })
    }

    fn model_name(&self) -> &str {
        "fake-transcriber"
    }
}

/// Deterministic unit vectors keyed by window start
struct FakeEmbedder;

#[async_trait]
impl EmbeddingModel for FakeEmbedder {
    async fn embed_window(
        &self,
        _audio_path: &Path,
        start: f64,
        _end: f64,
    ) -> anyhow::Result<Vec<f32>> {
        let angle = start as f32 * 0.7;
        Ok(vec![angle.cos(), angle.sin(), 0.0])
    }

    fn dimension(&self) -> usize {
        3
    }
}

/// Routes on the system prompt to produce a canned completion per stage
struct FakeChat;

#[async_trait]
impl ChatModel for FakeChat {
    async fn complete(&self, request: ChatRequest) -> anyhow::Result<ChatResponse> {
        let content = if request.system.contains("content analyst") {
            r#"<answer>{
                "suggested_tags": [
                    {"name": "Quarterly Planning", "confidence": 0.9},
                    {"name": "agenda", "confidence": 0.3}
                ],
                "suggested_collections": [
                    {"name": "Team Meetings", "confidence": 0.8}
                ]
            }</answer>"#
                .to_string()
        } else if request.system.contains("identify speakers") {
            r#"{"speaker_predictions": [
                {"speaker_label": "SPEAKER_00", "suggested_name": "Morgan", "confidence": 0.7},
                {"speaker_label": "SPEAKER_01", "suggested_name": "Riley", "confidence": 0.2}
            ]}"#
            .to_string()
        } else {
            "Bottom line: the team aligned on the quarterly roadmap.".to_string()
        };
        Ok(ChatResponse {
            content,
            model: "fake-chat".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "fake-chat"
    }
}

struct RecordingSubmitter {
    log: Mutex<Vec<(TaskKind, Option<i64>)>>,
}

#[async_trait]
impl TaskSubmitter for RecordingSubmitter {
    async fn submit_task(
        &self,
        _user_id: i64,
        media_file_id: Option<i64>,
        kind: TaskKind,
        _payload: serde_json::Value,
    ) -> Result<String, EngineError> {
        self.log.lock().push((kind, media_file_id));
        Ok(uuid::Uuid::new_v4().to_string())
    }
}

struct ContinueReporter;

#[async_trait]
impl ProgressReporter for ContinueReporter {
    async fn report(&self, _task_id: &str, _progress: f32) -> ProgressSignal {
        ProgressSignal::Continue
    }
}

struct Rig {
    _dir: tempfile::TempDir,
    files: Arc<MemMediaFileStore>,
    speakers: Arc<MemSpeakerStore>,
    segments: Arc<MemSegmentStore>,
    topics: Arc<MemTopicStore>,
    storage: Arc<dyn ObjectStore>,
    notifications: Arc<BroadcastNotificationSink>,
    submitter: Arc<RecordingSubmitter>,
    deps: Arc<PipelineDeps>,
}

fn rig() -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let files = Arc::new(MemMediaFileStore::default());
    let tasks = Arc::new(MemTaskStore::default());
    let speakers = Arc::new(MemSpeakerStore::default());
    let profiles = Arc::new(MemSpeakerProfileStore::default());
    let matches = Arc::new(MemSpeakerMatchStore::default());
    let segments = Arc::new(MemSegmentStore::default());
    let topics = Arc::new(MemTopicStore::default());
    let settings = Arc::new(MemSettingsStore::default());
    let storage: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(dir.path()));
    let notifications = Arc::new(BroadcastNotificationSink::default());
    let submitter = Arc::new(RecordingSubmitter {
        log: Mutex::new(Vec::new()),
    });
    let index = Arc::new(MemIndex::default());

    let lifecycle = Arc::new(LifecycleService::new(
        files.clone() as Arc<dyn MediaFileStore>,
        tasks.clone() as Arc<dyn TaskStore>,
        notifications.clone() as Arc<dyn NotificationSink>,
    ));
    let profile_service = ProfileService::new(
        speakers.clone() as Arc<dyn SpeakerStore>,
        profiles.clone() as Arc<dyn SpeakerProfileStore>,
        index.clone() as Arc<dyn VectorIndex>,
    );
    let matching = Arc::new(SpeakerMatchingService::new(
        speakers.clone() as Arc<dyn SpeakerStore>,
        matches.clone() as Arc<dyn SpeakerMatchStore>,
        index.clone() as Arc<dyn VectorIndex>,
        profile_service,
        MatchThresholds::default(),
    ));
    let summary_index = Arc::new(SummaryIndex::new(SummaryIndexConfig::default()).unwrap());

    let deps = Arc::new(PipelineDeps {
        files: files.clone() as Arc<dyn MediaFileStore>,
        speakers: speakers.clone() as Arc<dyn SpeakerStore>,
        profiles: profiles as Arc<dyn SpeakerProfileStore>,
        segments: segments.clone() as Arc<dyn SegmentStore>,
        topics: topics.clone() as Arc<dyn TopicStore>,
        settings: settings as Arc<dyn SystemSettingsStore>,
        storage: storage.clone(),
        notifications: notifications.clone() as Arc<dyn NotificationSink>,
        lifecycle,
        submitter: submitter.clone() as Arc<dyn TaskSubmitter>,
        transcriber: Arc::new(FakeTranscriber),
        embedder: Arc::new(FakeEmbedder),
        chat: Arc::new(FakeChat),
        matching,
        summary_index,
    });

    Rig {
        _dir: dir,
        files,
        speakers,
        segments,
        topics,
        storage,
        notifications,
        submitter,
        deps,
    }
}

async fn seeded_file(rig: &Rig, user_id: i64) -> MediaFile {
    let mut file = MediaFile::new(user_id, "meeting.wav", "uploads/meeting.wav", "audio/wav");
    file.title = Some("Quarterly sync".to_string());
    let file = rig.files.insert(file);
    rig.storage
        .put("uploads/meeting.wav", bytes::Bytes::from_static(b"fake-audio"), "audio/wav")
        .await
        .unwrap();
    file
}

fn ctx(kind: TaskKind, user_id: i64, file_id: i64) -> TaskContext {
    TaskContext::new(
        uuid::Uuid::new_v4().to_string(),
        user_id,
        Some(file_id),
        kind,
        serde_json::json!({ "media_file_id": file_id }),
        Arc::new(ContinueReporter),
    )
}

// ---- scenarios ----

#[tokio::test]
async fn transcription_happy_path_completes_the_file() {
    let rig = rig();
    let file = seeded_file(&rig, 7).await;
    let mut notifications = rig.notifications.subscribe();

    let handler = TranscriptionHandler::new(rig.deps.clone());
    let result = handler
        .run(ctx(TaskKind::Transcription, 7, file.id))
        .await
        .unwrap();

    // file is completed with the transcribed duration
    let stored = rig.files.get_sync(file.id);
    assert_eq!(stored.status, FileStatus::Completed);
    assert_eq!(stored.duration, Some(2700.0));
    assert!(stored.completed_at.is_some());

    // segments and speakers landed
    let segments = rig.segments.list_for_file(file.id).await.unwrap();
    assert_eq!(segments.len(), 3);
    let speakers = rig.speakers.list_for_file(file.id).await.unwrap();
    assert_eq!(speakers.len(), 2);
    assert_eq!(result["segments"], 3);
    assert_eq!(result["speakers"], 2);

    // the garbage filter replaced the pathological token
    assert!(segments.iter().any(|s| s.text.contains("[unintelligible]")));
    assert!(!segments.iter().any(|s| s.text.contains(&"x".repeat(80))));

    // all five derived stages were dispatched
    let submitted: Vec<TaskKind> = rig.submitter.log.lock().iter().map(|(k, _)| *k).collect();
    for kind in [
        TaskKind::Waveform,
        TaskKind::Analytics,
        TaskKind::Summarization,
        TaskKind::TopicExtraction,
        TaskKind::SpeakerIdentification,
    ] {
        assert!(submitted.contains(&kind), "{kind:?} was not dispatched");
    }

    // subtitle artifacts were written beside the blob
    assert!(rig
        .storage
        .exists(&format!("subtitles/{}.srt", stored.uuid))
        .await
        .unwrap());
    assert!(rig
        .storage
        .exists(&format!("subtitles/{}.vtt", stored.uuid))
        .await
        .unwrap());

    // a completed transcription notification reached user 7
    let mut saw_completed = false;
    while let Ok(n) = notifications.try_recv() {
        if n.user_id == 7
            && n.kind == NotificationType::TranscriptionStatus
            && n.data["status"] == "completed"
        {
            saw_completed = true;
        }
    }
    assert!(saw_completed);
}

#[tokio::test]
async fn transcription_with_missing_blob_fails() {
    let rig = rig();
    let mut file = MediaFile::new(7, "gone.wav", "uploads/gone.wav", "audio/wav");
    file.status = FileStatus::Pending;
    let file = rig.files.insert(file);

    let handler = TranscriptionHandler::new(rig.deps.clone());
    let failure = handler
        .run(ctx(TaskKind::Transcription, 7, file.id))
        .await
        .unwrap_err();
    assert!(failure.message.contains("not found"));
}

#[tokio::test]
async fn waveform_stage_stores_all_resolutions() {
    let rig = rig();
    let file = seeded_file(&rig, 7).await;

    // replace the blob with a real one-second WAV
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut buf, spec).unwrap();
        for i in 0..8_000 {
            writer
                .write_sample(((i as f32 * 0.05).sin() * 12_000.0) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }
    rig.storage
        .put("uploads/meeting.wav", bytes::Bytes::from(buf.into_inner()), "audio/wav")
        .await
        .unwrap();

    let handler = WaveformHandler::new(rig.deps.clone());
    let result = handler.run(ctx(TaskKind::Waveform, 7, file.id)).await.unwrap();
    assert_eq!(result["resolutions"], 3);

    let stored = rig.files.get_sync(file.id);
    let waveform = stored.waveform_data.unwrap();
    assert!(waveform.get("waveform_500").is_some());
    assert!(waveform.get("waveform_2000").is_some());
}

#[tokio::test]
async fn topic_stage_filters_and_persists_suggestions() {
    let rig = rig();
    let file = seeded_file(&rig, 7).await;
    rig.segments
        .replace_for_file(
            file.id,
            &[NewSegment {
                speaker_id: None,
                start_time: 0.0,
                end_time: 5.0,
                text: "We planned the quarter.".to_string(),
                confidence: Some(0.9),
            }],
        )
        .await
        .unwrap();

    let handler = TopicExtractionHandler::new(rig.deps.clone());
    let result = handler
        .run(ctx(TaskKind::TopicExtraction, 7, file.id))
        .await
        .unwrap();
    assert_eq!(result["tags"], 1);
    assert_eq!(result["collections"], 1);

    let suggestion = rig.topics.get_for_file(file.id).await.unwrap().unwrap();
    // low-confidence "agenda" was dropped; the kept tag is lowercased
    assert_eq!(suggestion.suggested_tags.len(), 1);
    assert_eq!(suggestion.suggested_tags[0].name, "quarterly planning");
    assert_eq!(suggestion.suggested_collections[0].name, "Team Meetings");
}

#[tokio::test]
async fn summarization_indexes_the_result() {
    let rig = rig();
    let file = seeded_file(&rig, 7).await;
    rig.segments
        .replace_for_file(
            file.id,
            &[NewSegment {
                speaker_id: None,
                start_time: 0.0,
                end_time: 5.0,
                text: "We aligned on the roadmap.".to_string(),
                confidence: Some(0.9),
            }],
        )
        .await
        .unwrap();

    let handler = SummarizationHandler::new(rig.deps.clone());
    let result = handler
        .run(ctx(TaskKind::Summarization, 7, file.id))
        .await
        .unwrap();
    assert_eq!(result["version"], 1);

    let hits = rig.deps.summary_index.search(7, "roadmap", None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file_id, file.id);
}

#[tokio::test]
async fn speaker_hints_only_suggest_names() {
    let rig = rig();
    let file = seeded_file(&rig, 7).await;
    let speakers = rig
        .speakers
        .create_for_file(file.id, 7, &["SPEAKER_00".to_string(), "SPEAKER_01".to_string()])
        .await
        .unwrap();
    rig.segments
        .replace_for_file(
            file.id,
            &[NewSegment {
                speaker_id: Some(speakers[0].id),
                start_time: 0.0,
                end_time: 5.0,
                text: "Hi, Morgan here.".to_string(),
                confidence: Some(0.9),
            }],
        )
        .await
        .unwrap();

    let handler = SpeakerHintHandler::new(rig.deps.clone());
    let result = handler
        .run(ctx(TaskKind::SpeakerIdentification, 7, file.id))
        .await
        .unwrap();
    // Riley's 0.2 confidence is below the floor
    assert_eq!(result["predictions"], 1);

    let first = rig.speakers.get_sync(speakers[0].id);
    assert_eq!(first.suggested_name.as_deref(), Some("Morgan"));
    assert_eq!(first.display_name, None, "hints never auto-apply");
    let second = rig.speakers.get_sync(speakers[1].id);
    assert_eq!(second.suggested_name, None);
}

#[tokio::test]
async fn register_handlers_covers_every_stage() {
    let rig = rig();
    let mut registry = transcribe_engine::HandlerRegistry::new();
    register_handlers(&mut registry, rig.deps.clone());
    for kind in [
        TaskKind::Transcription,
        TaskKind::Waveform,
        TaskKind::Analytics,
        TaskKind::Summarization,
        TaskKind::TopicExtraction,
        TaskKind::SpeakerIdentification,
        TaskKind::YoutubeDownload,
    ] {
        assert!(registry.supports(kind), "{kind:?} missing from registry");
    }
}
