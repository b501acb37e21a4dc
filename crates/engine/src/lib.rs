//! Task orchestration for the transcription pipeline
//!
//! - Queue router: per-queue worker pools sized for their resource class
//!   (GPU single-slot, CPU wide, NLP/download/utility bounded)
//! - Task graph: submit / update / chain / fan-out with persisted task
//!   records mirroring every job
//! - Lifecycle: the media-file state machine and its transition effects
//! - Recovery: periodic and boot-time reconciliation of tasks, files, and
//!   the live queue state
//! - Cleanup: orphan aging and force deletion
//! - Notification bus: at-most-once pub/sub fan-out of stage progress

pub mod beat;
pub mod cleanup;
pub mod lifecycle;
pub mod notify;
pub mod queue;
pub mod recovery;
pub mod registry;

pub use beat::{
    BeatScheduler, CleanupHandler, GpuStatsHandler, HealthCheckHandler, RecoverUserFilesHandler,
    StartupRecoveryHandler,
};
pub use cleanup::{CleanupReport, CleanupService, ForceCleanupReport};
pub use lifecycle::LifecycleService;
pub use notify::{publish_or_log, BroadcastNotificationSink};
pub use queue::{
    DbWorkerHooks, PlannedTask, QueuedTask, TaskBackend, TaskEngine, TaskSubmitter, WorkerHooks,
};
pub use recovery::{RecoveryService, RecoverySummary, StartupSummary};
pub use registry::{
    HandlerRegistry, ProgressReporter, ProgressSignal, TaskContext, TaskFailure, TaskHandler,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The task row could not be persisted atomically with the enqueue
    #[error("QUEUE_UNAVAILABLE: {0}")]
    QueueUnavailable(String),

    #[error("no handler registered for task type {0}")]
    UnknownTaskType(String),

    #[error(transparent)]
    Persistence(#[from] transcribe_persistence::PersistenceError),

    #[error(transparent)]
    Domain(#[from] transcribe_core::CoreError),

    #[error("{0}")]
    Other(String),
}
