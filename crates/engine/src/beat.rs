//! Beat schedule and the system task handlers it drives
//!
//! Two fixed entries: the recovery health check every ten minutes on the
//! utility queue, and GPU/queue stats every thirty seconds on the GPU
//! queue. The health check runs under a best-effort distributed lock with
//! a hard time limit just under its interval, so overlapping runs are
//! skipped rather than queued.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use transcribe_config::constants::recovery::{
    BEAT_SAFETY_MARGIN_SECS, GPU_STATS_INTERVAL_SECS, HEALTH_CHECK_INTERVAL_SECS,
};
use transcribe_core::TaskKind;
use transcribe_persistence::TaskLockManager;

use crate::cleanup::CleanupService;
use crate::queue::{TaskBackend, TaskEngine};
use crate::recovery::RecoveryService;
use crate::registry::{TaskContext, TaskFailure, TaskHandler};

/// Spawns the periodic submissions; the tasks themselves run through the
/// queue router like any other work.
pub struct BeatScheduler {
    engine: TaskEngine,
}

impl BeatScheduler {
    pub fn new(engine: TaskEngine) -> Self {
        Self { engine }
    }

    /// Start both beat loops. They run for the life of the process.
    pub fn start(&self) {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS);
            let mut tick =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tick.tick().await;
                if let Err(e) = engine
                    .submit_system(TaskKind::PeriodicHealthCheck, serde_json::json!({}))
                    .await
                {
                    tracing::error!(error = %e, "Health check beat submission failed");
                }
            }
        });

        let engine = self.engine.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs(GPU_STATS_INTERVAL_SECS);
            let mut tick =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tick.tick().await;
                if let Err(e) = engine
                    .submit_system(TaskKind::UpdateGpuStats, serde_json::json!({}))
                    .await
                {
                    tracing::error!(error = %e, "GPU stats beat submission failed");
                }
            }
        });

        tracing::info!(
            health_check_secs = HEALTH_CHECK_INTERVAL_SECS,
            gpu_stats_secs = GPU_STATS_INTERVAL_SECS,
            "Beat schedule started"
        );
    }
}

/// Run a guarded section under the named lock. Overlaps are skipped; a
/// broken lock store degrades to running unlocked.
async fn run_guarded<T, F, Fut>(
    locks: Option<&dyn TaskLockManager>,
    name: &str,
    ttl: Duration,
    f: F,
) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let holder = match locks {
        None => None,
        Some(locks) => match locks.acquire(name, ttl).await {
            Ok(Some(holder)) => Some(holder),
            Ok(None) => {
                tracing::info!(lock = name, "Already running elsewhere, skipping");
                return None;
            },
            Err(e) => {
                tracing::warn!(lock = name, error = %e, "Lock store unavailable, running unlocked");
                None
            },
        },
    };

    let result = f().await;

    if let (Some(locks), Some(holder)) = (locks, holder) {
        if let Err(e) = locks.release(name, &holder).await {
            tracing::error!(lock = name, error = %e, "Lock release failed");
        }
    }
    Some(result)
}

/// Utility-queue handler for the periodic health check
pub struct HealthCheckHandler {
    recovery: Arc<RecoveryService>,
    locks: Option<Arc<dyn TaskLockManager>>,
}

impl HealthCheckHandler {
    pub fn new(recovery: Arc<RecoveryService>, locks: Option<Arc<dyn TaskLockManager>>) -> Self {
        Self { recovery, locks }
    }
}

#[async_trait]
impl TaskHandler for HealthCheckHandler {
    async fn run(&self, _ctx: TaskContext) -> Result<serde_json::Value, TaskFailure> {
        let interval = Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS);
        let time_limit = interval - Duration::from_secs(BEAT_SAFETY_MARGIN_SECS);

        let outcome = run_guarded(
            self.locks.as_deref(),
            "periodic_health_check",
            interval,
            || async {
                tokio::time::timeout(time_limit, self.recovery.periodic_health_check()).await
            },
        )
        .await;

        match outcome {
            None => Ok(serde_json::json!({ "skipped": true })),
            Some(Err(_)) => Err(TaskFailure::new("health check exceeded its time limit")),
            Some(Ok(summary)) => Ok(serde_json::json!({
                "stuck_tasks_found": summary.stuck_tasks_found,
                "stuck_tasks_recovered": summary.stuck_tasks_recovered,
                "inconsistent_files_found": summary.inconsistent_files_found,
                "inconsistent_files_fixed": summary.inconsistent_files_fixed,
                "stuck_files_found": summary.stuck_files_found,
                "stuck_files_recovered": summary.stuck_files_recovered,
                "files_orphaned": summary.files_orphaned,
                "errors": summary.errors,
            })),
        }
    }
}

/// Boot-time recovery, submitted once at worker start
pub struct StartupRecoveryHandler {
    recovery: Arc<RecoveryService>,
}

impl StartupRecoveryHandler {
    pub fn new(recovery: Arc<RecoveryService>) -> Self {
        Self { recovery }
    }
}

#[async_trait]
impl TaskHandler for StartupRecoveryHandler {
    async fn run(&self, _ctx: TaskContext) -> Result<serde_json::Value, TaskFailure> {
        let summary = self.recovery.startup_recovery().await;
        Ok(serde_json::json!({
            "orphaned_tasks_found": summary.orphaned_tasks_found,
            "orphaned_tasks_failed": summary.orphaned_tasks_failed,
            "files_reset": summary.files_reset,
            "files_retried": summary.files_retried,
            "errors": summary.errors,
        }))
    }
}

/// On-demand per-user recovery; payload: `{ "user_id": 7 }` or empty
pub struct RecoverUserFilesHandler {
    recovery: Arc<RecoveryService>,
}

impl RecoverUserFilesHandler {
    pub fn new(recovery: Arc<RecoveryService>) -> Self {
        Self { recovery }
    }
}

#[async_trait]
impl TaskHandler for RecoverUserFilesHandler {
    async fn run(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskFailure> {
        let user_id = ctx.payload.get("user_id").and_then(|v| v.as_i64());
        let summary = self.recovery.recover_user_files(user_id).await;
        Ok(serde_json::json!({
            "stuck_files_found": summary.stuck_files_found,
            "stuck_files_recovered": summary.stuck_files_recovered,
            "files_orphaned": summary.files_orphaned,
            "errors": summary.errors,
        }))
    }
}

/// Utility-queue cleanup cycle
pub struct CleanupHandler {
    cleanup: Arc<CleanupService>,
    locks: Option<Arc<dyn TaskLockManager>>,
}

impl CleanupHandler {
    pub fn new(cleanup: Arc<CleanupService>, locks: Option<Arc<dyn TaskLockManager>>) -> Self {
        Self { cleanup, locks }
    }
}

#[async_trait]
impl TaskHandler for CleanupHandler {
    async fn run(&self, _ctx: TaskContext) -> Result<serde_json::Value, TaskFailure> {
        let outcome = run_guarded(
            self.locks.as_deref(),
            "cleanup_cycle",
            Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS),
            || self.cleanup.run_cleanup_cycle(),
        )
        .await;

        match outcome {
            None => Ok(serde_json::json!({ "skipped": true })),
            Some(report) => Ok(serde_json::json!({
                "stuck_files_checked": report.stuck_files_checked,
                "files_recovered": report.files_recovered,
                "files_marked_orphaned": report.files_marked_orphaned,
                "old_orphans_flagged": report.old_orphans_flagged,
                "errors": report.errors,
                "recommendations": report.recommendations,
            })),
        }
    }
}

/// GPU-queue stats beat: gauges for the dashboards
pub struct GpuStatsHandler {
    backend: Arc<dyn TaskBackend>,
}

impl GpuStatsHandler {
    pub fn new(backend: Arc<dyn TaskBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl TaskHandler for GpuStatsHandler {
    async fn run(&self, _ctx: TaskContext) -> Result<serde_json::Value, TaskFailure> {
        let live = self.backend.live_task_ids().len();
        metrics::gauge!("pipeline_live_tasks").set(live as f64);
        Ok(serde_json::json!({ "live_tasks": live }))
    }
}
