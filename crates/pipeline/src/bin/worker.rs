//! Pipeline worker process
//!
//! Composition root: connects the stores and indexes, wires every stage
//! and system handler into the queue router, starts the beat schedule,
//! and submits the startup recovery pass before accepting work.

use std::collections::HashSet;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use transcribe_config::load_settings;
use transcribe_core::{NotificationSink, TaskKind};
use transcribe_engine::{
    BeatScheduler, BroadcastNotificationSink, CleanupHandler, CleanupService, DbWorkerHooks,
    EngineError, GpuStatsHandler, HandlerRegistry, HealthCheckHandler, LifecycleService,
    QueuedTask, RecoverUserFilesHandler, RecoveryService, StartupRecoveryHandler, TaskBackend,
    TaskEngine, TaskSubmitter,
};
use transcribe_persistence::{
    MediaFileStore, SegmentStore, SpeakerMatchStore, SpeakerProfileStore, SpeakerStore,
    SystemSettingsStore, TaskLockManager, TaskStore, TopicStore,
};
use transcribe_pipeline::models::{
    HttpEmbeddingModel, HttpTranscriptionEngine, ModelServiceConfig,
};
use transcribe_pipeline::{register_handlers, PipelineDeps};
use transcribe_search::{SpeakerIndex, SpeakerIndexConfig, SummaryIndex, SummaryIndexConfig};
use transcribe_speaker::{MatchThresholds, ProfileService, SpeakerMatchingService, VectorIndex};
use transcribe_storage::{FsObjectStore, ObjectStore};

/// Engine handle resolved after startup. The registry needs the handlers,
/// the handlers need a submitter, and the engine needs the sealed
/// registry; everything submits only from inside running tasks, by which
/// point the cell is set.
#[derive(Clone, Default)]
struct LateEngine {
    cell: Arc<tokio::sync::OnceCell<TaskEngine>>,
}

impl LateEngine {
    fn wire(&self, engine: TaskEngine) {
        if self.cell.set(engine).is_err() {
            tracing::error!("Engine wired twice");
        }
    }

    fn get(&self) -> Result<&TaskEngine, EngineError> {
        self.cell
            .get()
            .ok_or_else(|| EngineError::Other("engine not wired yet".into()))
    }
}

#[async_trait::async_trait]
impl TaskSubmitter for LateEngine {
    async fn submit_task(
        &self,
        user_id: i64,
        media_file_id: Option<i64>,
        kind: TaskKind,
        payload: serde_json::Value,
    ) -> Result<String, EngineError> {
        self.get()?.submit(user_id, media_file_id, kind, payload).await
    }
}

#[async_trait::async_trait]
impl TaskBackend for LateEngine {
    async fn enqueue(&self, task: QueuedTask) -> Result<(), EngineError> {
        self.get()?.enqueue(task).await
    }

    fn live_task_ids(&self) -> HashSet<String> {
        self.cell
            .get()
            .map(|e| e.live_task_ids())
            .unwrap_or_default()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let env = std::env::var("RUN_ENV").ok();
    let settings = load_settings(env.as_deref())?;

    // stores
    let db_config = transcribe_persistence::DatabaseConfig::from(&settings.database);
    let layer = transcribe_persistence::init(db_config).await?;
    let files: Arc<dyn MediaFileStore> = Arc::new(layer.media_files.clone());
    let tasks: Arc<dyn TaskStore> = Arc::new(layer.tasks.clone());
    let speakers: Arc<dyn SpeakerStore> = Arc::new(layer.speakers.clone());
    let profiles: Arc<dyn SpeakerProfileStore> = Arc::new(layer.profiles.clone());
    let matches: Arc<dyn SpeakerMatchStore> = Arc::new(layer.matches.clone());
    let segments: Arc<dyn SegmentStore> = Arc::new(layer.segments.clone());
    let topics: Arc<dyn TopicStore> = Arc::new(layer.topics.clone());
    let system_settings: Arc<dyn SystemSettingsStore> = Arc::new(layer.settings.clone());
    let locks: Arc<dyn TaskLockManager> = Arc::new(layer.locks.clone());

    // indexes and storage
    let speaker_index = SpeakerIndex::new(SpeakerIndexConfig::from(&settings.search)).await?;
    speaker_index.ensure_collection().await?;
    let index: Arc<dyn VectorIndex> = Arc::new(speaker_index);
    let summary_index = Arc::new(SummaryIndex::new(SummaryIndexConfig {
        index_path: Some(settings.search.summary_index_dir.clone()),
        ..Default::default()
    })?);
    let storage: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::from_config(&settings.storage));

    // fabric and services
    let notifications: Arc<dyn NotificationSink> = Arc::new(BroadcastNotificationSink::default());
    let lifecycle = Arc::new(LifecycleService::new(
        files.clone(),
        tasks.clone(),
        notifications.clone(),
    ));
    let profile_service = ProfileService::new(speakers.clone(), profiles.clone(), index.clone());
    let matching = Arc::new(SpeakerMatchingService::new(
        speakers.clone(),
        matches,
        index,
        profile_service,
        MatchThresholds::from(&settings.speaker),
    ));

    // model service clients
    let model_config = ModelServiceConfig::default();
    let transcriber = Arc::new(HttpTranscriptionEngine::new(model_config.clone()));
    let embedder = Arc::new(HttpEmbeddingModel::new(
        model_config,
        settings.speaker.embedding_dim,
    ));

    let late_engine = LateEngine::default();
    let submitter: Arc<dyn TaskSubmitter> = Arc::new(late_engine.clone());
    let backend: Arc<dyn TaskBackend> = Arc::new(late_engine.clone());

    let deps = Arc::new(PipelineDeps {
        files: files.clone(),
        speakers,
        profiles,
        segments,
        topics,
        settings: system_settings.clone(),
        storage: storage.clone(),
        notifications,
        lifecycle: lifecycle.clone(),
        submitter: submitter.clone(),
        transcriber,
        embedder,
        chat: Arc::new(transcribe_llm::HttpChatModel::new(
            transcribe_llm::HttpChatModelConfig::from(&settings.llm),
        )),
        matching,
        summary_index,
    });

    let recovery = Arc::new(RecoveryService::new(
        files.clone(),
        tasks.clone(),
        system_settings,
        lifecycle.clone(),
        submitter,
        backend.clone(),
        settings.recovery.clone(),
    ));
    let cleanup = Arc::new(CleanupService::new(
        files,
        storage,
        recovery.clone(),
        settings.recovery.clone(),
    ));

    let mut registry = HandlerRegistry::new();
    register_handlers(&mut registry, deps);
    registry
        .register(
            TaskKind::PeriodicHealthCheck,
            Arc::new(HealthCheckHandler::new(recovery.clone(), Some(locks.clone()))),
        )
        .register(
            TaskKind::StartupRecovery,
            Arc::new(StartupRecoveryHandler::new(recovery.clone())),
        )
        .register(
            TaskKind::RecoverUserFiles,
            Arc::new(RecoverUserFilesHandler::new(recovery)),
        )
        .register(
            TaskKind::Cleanup,
            Arc::new(CleanupHandler::new(cleanup, Some(locks))),
        )
        .register(TaskKind::UpdateGpuStats, Arc::new(GpuStatsHandler::new(backend)));

    let hooks = Arc::new(DbWorkerHooks(layer.db.clone()));
    let engine = TaskEngine::start(registry, tasks, lifecycle, Some(hooks)).await;
    late_engine.wire(engine.clone());

    // boot-time reconciliation, then the beat schedule
    engine
        .submit_system(TaskKind::StartupRecovery, serde_json::json!({}))
        .await?;
    BeatScheduler::new(engine.clone()).start();

    tracing::info!("Pipeline worker ready");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}
