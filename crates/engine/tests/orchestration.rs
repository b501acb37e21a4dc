//! Orchestration scenarios: queue routing, recovery passes, cancellation

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use transcribe_core::{
    FileStatus, NotificationSink, TaskKind, TaskRecord, TaskStatus,
};
use transcribe_engine::{
    BroadcastNotificationSink, EngineError, HandlerRegistry, LifecycleService, PlannedTask,
    ProgressSignal, RecoveryService, TaskBackend, TaskContext, TaskEngine, TaskFailure,
    TaskHandler, TaskSubmitter,
};
use transcribe_persistence::memory::{MemMediaFileStore, MemSettingsStore, MemTaskStore};
use transcribe_persistence::{MediaFileStore, SystemSettingsStore, TaskStore};

/// Submitter that records requests and mirrors them as pending task rows
struct RecordingSubmitter {
    tasks: Arc<MemTaskStore>,
    log: Mutex<Vec<(TaskKind, Option<i64>)>>,
}

#[async_trait]
impl TaskSubmitter for RecordingSubmitter {
    async fn submit_task(
        &self,
        user_id: i64,
        media_file_id: Option<i64>,
        kind: TaskKind,
        _payload: serde_json::Value,
    ) -> Result<String, EngineError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.tasks
            .insert(TaskRecord::new(&id, user_id, media_file_id, kind));
        self.log.lock().push((kind, media_file_id));
        Ok(id)
    }
}

/// Backend whose live set the test controls
#[derive(Default)]
struct StaticBackend {
    live: Mutex<std::collections::HashSet<String>>,
}

#[async_trait]
impl TaskBackend for StaticBackend {
    async fn enqueue(&self, _task: transcribe_engine::QueuedTask) -> Result<(), EngineError> {
        Ok(())
    }

    fn live_task_ids(&self) -> std::collections::HashSet<String> {
        self.live.lock().clone()
    }
}

struct Rig {
    files: Arc<MemMediaFileStore>,
    tasks: Arc<MemTaskStore>,
    settings: Arc<MemSettingsStore>,
    submitter: Arc<RecordingSubmitter>,
    backend: Arc<StaticBackend>,
    recovery: RecoveryService,
}

fn recovery_rig() -> Rig {
    let files = Arc::new(MemMediaFileStore::default());
    let tasks = Arc::new(MemTaskStore::default());
    let settings = Arc::new(MemSettingsStore::default());
    let submitter = Arc::new(RecordingSubmitter {
        tasks: tasks.clone(),
        log: Mutex::new(Vec::new()),
    });
    let backend = Arc::new(StaticBackend::default());
    let notifications: Arc<dyn NotificationSink> = Arc::new(BroadcastNotificationSink::default());
    let lifecycle = Arc::new(LifecycleService::new(
        files.clone() as Arc<dyn MediaFileStore>,
        tasks.clone() as Arc<dyn TaskStore>,
        notifications,
    ));
    let recovery = RecoveryService::new(
        files.clone() as Arc<dyn MediaFileStore>,
        tasks.clone() as Arc<dyn TaskStore>,
        settings.clone() as Arc<dyn SystemSettingsStore>,
        lifecycle,
        submitter.clone() as Arc<dyn TaskSubmitter>,
        backend.clone() as Arc<dyn TaskBackend>,
        transcribe_config::RecoveryConfig::default(),
    );
    Rig {
        files,
        tasks,
        settings,
        submitter,
        backend,
        recovery,
    }
}

fn stale_task(file_id: i64, hours_ago: i64) -> TaskRecord {
    let mut task = TaskRecord::new(
        &uuid::Uuid::new_v4().to_string(),
        7,
        Some(file_id),
        TaskKind::Transcription,
    );
    task.status = TaskStatus::InProgress;
    task.updated_at = Utc::now() - ChronoDuration::hours(hours_ago);
    task
}

// ---- recovery scenarios ----

#[tokio::test]
async fn stuck_task_is_failed_and_file_moves_to_error() {
    let rig = recovery_rig();
    let file = rig
        .files
        .insert_processing(7, Utc::now() - ChronoDuration::hours(3));
    let task = stale_task(file.id, 3);
    rig.tasks.insert(task.clone());

    let summary = rig.recovery.periodic_health_check().await;
    assert_eq!(summary.stuck_tasks_found, 1);
    assert_eq!(summary.stuck_tasks_recovered, 1);

    let task = rig.tasks.get_sync(&task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task
        .error_message
        .as_deref()
        .unwrap()
        .contains("stuck in processing"));
    assert!(task.completed_at.is_some());

    let file = rig.files.get_sync(file.id);
    assert_eq!(file.status, FileStatus::Error);
    assert!(file.last_error_message.is_some());
}

#[tokio::test]
async fn fresh_tasks_are_left_alone() {
    let rig = recovery_rig();
    let file = rig.files.insert_processing(7, Utc::now());
    let mut task = stale_task(file.id, 0);
    task.updated_at = Utc::now();
    rig.tasks.insert(task.clone());

    let summary = rig.recovery.periodic_health_check().await;
    assert_eq!(summary.stuck_tasks_found, 0);
    assert_eq!(
        rig.tasks.get_sync(&task.id).unwrap().status,
        TaskStatus::InProgress
    );
    assert_eq!(rig.files.get_sync(file.id).status, FileStatus::Processing);
}

#[tokio::test]
async fn boot_recovery_resets_interrupted_files() {
    let rig = recovery_rig();
    let file = rig.files.insert_processing(7, Utc::now());
    let task = stale_task(file.id, 0);
    rig.tasks.insert(task.clone());
    // nothing is live: the process just restarted

    let summary = rig.recovery.startup_recovery().await;
    assert_eq!(summary.orphaned_tasks_found, 1);
    assert_eq!(summary.orphaned_tasks_failed, 1);
    assert_eq!(summary.files_reset, 1);
    assert_eq!(summary.files_retried, 1);

    let task = rig.tasks.get_sync(&task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.error_message.as_deref(),
        Some("Task interrupted by system restart")
    );

    assert_eq!(rig.files.get_sync(file.id).status, FileStatus::Pending);
    let submissions = rig.submitter.log.lock();
    assert_eq!(
        submissions.as_slice(),
        &[(TaskKind::Transcription, Some(file.id))]
    );
}

#[tokio::test]
async fn live_tasks_are_not_orphaned_on_boot() {
    let rig = recovery_rig();
    let file = rig.files.insert_processing(7, Utc::now());
    let task = stale_task(file.id, 0);
    rig.tasks.insert(task.clone());
    rig.backend.live.lock().insert(task.id.clone());

    let summary = rig.recovery.startup_recovery().await;
    assert_eq!(summary.orphaned_tasks_found, 0);
    assert_eq!(
        rig.tasks.get_sync(&task.id).unwrap().status,
        TaskStatus::InProgress
    );
}

#[tokio::test]
async fn retry_budget_orphans_after_three_passes() {
    let rig = recovery_rig();
    rig.settings
        .set("transcription.max_retries", "2", None)
        .await
        .unwrap();
    rig.settings
        .set("transcription.retry_limit_enabled", "true", None)
        .await
        .unwrap();

    let file = rig
        .files
        .insert_processing(7, Utc::now() - ChronoDuration::hours(3));

    for pass in 1..=3 {
        // each pass sees the file processing again with no live worker
        {
            let mut rows = rig.files.rows.lock();
            let f = rows.get_mut(&file.id).unwrap();
            f.status = FileStatus::Processing;
            f.task_started_at = Some(Utc::now() - ChronoDuration::hours(3));
        }
        for task in rig.tasks.all() {
            if task.status.is_active() {
                rig.tasks.mark_failed(&task.id, "superseded").await.unwrap();
            }
        }
        let current = rig.files.get_sync(file.id);
        let retried = rig.recovery.recover_stuck_file(&current).await.unwrap();
        if pass < 3 {
            assert!(retried, "pass {pass} should retry");
        } else {
            assert!(!retried, "pass {pass} should orphan");
        }
    }

    let file = rig.files.get_sync(file.id);
    assert_eq!(file.status, FileStatus::Orphaned);
    assert!(file.force_delete_eligible);
    assert_eq!(file.recovery_attempts, 3);
}

#[tokio::test]
async fn inconsistent_file_follows_task_aggregate() {
    let rig = recovery_rig();

    // processing file whose only task completed
    let done = rig.files.insert_processing(7, Utc::now());
    let mut task = stale_task(done.id, 0);
    task.status = TaskStatus::Completed;
    rig.tasks.insert(task);

    // processing file whose tasks all failed
    let failed = rig.files.insert_processing(7, Utc::now());
    let mut task = stale_task(failed.id, 0);
    task.status = TaskStatus::Failed;
    rig.tasks.insert(task);

    let summary = rig.recovery.periodic_health_check().await;
    assert_eq!(summary.inconsistent_files_found, 2);
    assert_eq!(summary.inconsistent_files_fixed, 2);

    assert_eq!(rig.files.get_sync(done.id).status, FileStatus::Completed);
    assert_eq!(rig.files.get_sync(failed.id).status, FileStatus::Error);
}

// ---- engine scenarios ----

struct EngineRig {
    files: Arc<MemMediaFileStore>,
    tasks: Arc<MemTaskStore>,
    engine: TaskEngine,
}

async fn engine_rig(registry: HandlerRegistry) -> EngineRig {
    let files = Arc::new(MemMediaFileStore::default());
    let tasks = Arc::new(MemTaskStore::default());
    let notifications: Arc<dyn NotificationSink> = Arc::new(BroadcastNotificationSink::default());
    let lifecycle = Arc::new(LifecycleService::new(
        files.clone() as Arc<dyn MediaFileStore>,
        tasks.clone() as Arc<dyn TaskStore>,
        notifications,
    ));
    let engine = TaskEngine::start(
        registry,
        tasks.clone() as Arc<dyn TaskStore>,
        lifecycle,
        None,
    )
    .await;
    EngineRig {
        files,
        tasks,
        engine,
    }
}

async fn wait_for_status(tasks: &MemTaskStore, task_id: &str, status: TaskStatus) -> TaskRecord {
    for _ in 0..200 {
        if let Some(task) = tasks.get_sync(task_id) {
            if task.status == status {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached {status:?}");
}

struct OkHandler;

#[async_trait]
impl TaskHandler for OkHandler {
    async fn run(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskFailure> {
        ctx.report_progress(0.5).await;
        Ok(serde_json::json!({ "ok": true }))
    }
}

struct FailHandler;

#[async_trait]
impl TaskHandler for FailHandler {
    async fn run(&self, _ctx: TaskContext) -> Result<serde_json::Value, TaskFailure> {
        Err(TaskFailure::new("download failed: network unreachable"))
    }
}

/// Loops until the engine tells it the file is being cancelled
struct LoopingHandler;

#[async_trait]
impl TaskHandler for LoopingHandler {
    async fn run(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskFailure> {
        for i in 0..200 {
            let progress = i as f32 / 200.0;
            if ctx.report_progress(progress).await == ProgressSignal::Cancelled {
                return Err(TaskFailure::cancelled());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(serde_json::json!({ "ran_to_completion": true }))
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn submitted_task_completes_with_result() {
    let mut registry = HandlerRegistry::new();
    registry.register(TaskKind::Waveform, Arc::new(OkHandler));
    let rig = engine_rig(registry).await;

    let task_id = rig
        .engine
        .submit(7, None, TaskKind::Waveform, serde_json::json!({}))
        .await
        .unwrap();
    let task = wait_for_status(&rig.tasks, &task_id, TaskStatus::Completed).await;
    assert_eq!(task.progress, 1.0);
    assert_eq!(task.result, Some(serde_json::json!({ "ok": true })));
    assert!(task.completed_at.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_task_types_are_rejected_at_submit() {
    let rig = engine_rig(HandlerRegistry::new()).await;
    let err = rig
        .engine
        .submit(7, None, TaskKind::Waveform, serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownTaskType(_)));
    assert!(rig.tasks.all().is_empty(), "no ghost row for rejected submit");
}

#[tokio::test(flavor = "multi_thread")]
async fn noncritical_failure_leaves_file_untouched() {
    let mut registry = HandlerRegistry::new();
    registry.register(TaskKind::Summarization, Arc::new(FailHandler));
    let rig = engine_rig(registry).await;
    let file = rig.files.insert_processing(7, Utc::now());

    let task_id = rig
        .engine
        .submit(7, Some(file.id), TaskKind::Summarization, serde_json::json!({}))
        .await
        .unwrap();
    wait_for_status(&rig.tasks, &task_id, TaskStatus::Failed).await;
    assert_eq!(rig.files.get_sync(file.id).status, FileStatus::Processing);
}

#[tokio::test(flavor = "multi_thread")]
async fn transcription_failure_moves_file_to_error() {
    let mut registry = HandlerRegistry::new();
    registry.register(TaskKind::Transcription, Arc::new(FailHandler));
    let rig = engine_rig(registry).await;
    let file = rig.files.insert_processing(7, Utc::now());

    let task_id = rig
        .engine
        .submit(7, Some(file.id), TaskKind::Transcription, serde_json::json!({}))
        .await
        .unwrap();
    wait_for_status(&rig.tasks, &task_id, TaskStatus::Failed).await;

    let file = rig.files.get_sync(file.id);
    assert_eq!(file.status, FileStatus::Error);
    // message is categorized for user presentation
    assert!(file.last_error_message.unwrap().starts_with("Network Issue"));
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_is_observed_at_progress_updates() {
    let mut registry = HandlerRegistry::new();
    registry.register(TaskKind::Transcription, Arc::new(LoopingHandler));
    let rig = engine_rig(registry).await;
    let file = rig.files.insert_processing(7, Utc::now());

    let task_id = rig
        .engine
        .submit(7, Some(file.id), TaskKind::Transcription, serde_json::json!({}))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    rig.files.set_status(file.id, FileStatus::Cancelling);

    let task = wait_for_status(&rig.tasks, &task_id, TaskStatus::Failed).await;
    assert_eq!(task.error_message.as_deref(), Some("cancelled by user"));

    // once the last task stops, the file lands in Cancelled, never Completed
    for _ in 0..100 {
        if rig.files.get_sync(file.id).status == FileStatus::Cancelled {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(rig.files.get_sync(file.id).status, FileStatus::Cancelled);
}

#[tokio::test(flavor = "multi_thread")]
async fn fan_out_children_run_after_parent_completes() {
    let mut registry = HandlerRegistry::new();
    registry.register(TaskKind::Transcription, Arc::new(OkHandler));
    registry.register(TaskKind::Waveform, Arc::new(OkHandler));
    registry.register(TaskKind::Analytics, Arc::new(OkHandler));
    let rig = engine_rig(registry).await;

    let parent = rig
        .engine
        .submit(7, None, TaskKind::Transcription, serde_json::json!({}))
        .await
        .unwrap();
    rig.engine
        .fan_out(
            &parent,
            vec![
                PlannedTask {
                    user_id: 7,
                    media_file_id: None,
                    kind: TaskKind::Waveform,
                    payload: serde_json::json!({}),
                },
                PlannedTask {
                    user_id: 7,
                    media_file_id: None,
                    kind: TaskKind::Analytics,
                    payload: serde_json::json!({}),
                },
            ],
        )
        .await
        .unwrap();

    wait_for_status(&rig.tasks, &parent, TaskStatus::Completed).await;
    for _ in 0..200 {
        let done = rig
            .tasks
            .all()
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        if done == 3 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("fan-out children did not complete");
}

#[tokio::test(flavor = "multi_thread")]
async fn chained_child_is_skipped_when_parent_fails() {
    let mut registry = HandlerRegistry::new();
    registry.register(TaskKind::Transcription, Arc::new(FailHandler));
    registry.register(TaskKind::Summarization, Arc::new(OkHandler));
    let rig = engine_rig(registry).await;

    let parent = rig
        .engine
        .submit(7, None, TaskKind::Transcription, serde_json::json!({}))
        .await
        .unwrap();
    rig.engine
        .chain(
            &parent,
            PlannedTask {
                user_id: 7,
                media_file_id: None,
                kind: TaskKind::Summarization,
                payload: serde_json::json!({}),
            },
        )
        .await
        .unwrap();

    wait_for_status(&rig.tasks, &parent, TaskStatus::Failed).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let summaries: Vec<TaskRecord> = rig
        .tasks
        .all()
        .into_iter()
        .filter(|t| t.task_type == TaskKind::Summarization)
        .collect();
    assert!(summaries.is_empty(), "skipped child must never be submitted");
}
