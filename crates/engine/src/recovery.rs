//! Recovery subsystem
//!
//! Detection is strictly read-only; reconciliation applies the repairs.
//! Individual failures are logged and counted, never abort the remaining
//! passes. The periodic pass runs on the utility queue under a
//! best-effort lock; the startup pass reconciles whatever a crash left
//! behind.

use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use transcribe_config::RecoveryConfig;
use transcribe_core::{FileStatus, MediaFile, TaskKind, TaskRecord};
use transcribe_persistence::{MediaFileStore, SystemSettingsStore, TaskStore};

use crate::lifecycle::LifecycleService;
use crate::queue::{TaskBackend, TaskSubmitter};
use crate::EngineError;

pub const STUCK_TASK_MESSAGE: &str = "Task recovered after being stuck in processing";
pub const ORPHANED_TASK_MESSAGE: &str = "Task interrupted by system restart";
pub const NO_WORKER_MESSAGE: &str = "Task recovered - no active worker found";

/// Counters from one periodic pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoverySummary {
    pub stuck_tasks_found: usize,
    pub stuck_tasks_recovered: usize,
    pub inconsistent_files_found: usize,
    pub inconsistent_files_fixed: usize,
    pub stuck_files_found: usize,
    pub stuck_files_recovered: usize,
    pub files_orphaned: usize,
    pub errors: usize,
}

/// Counters from the boot pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StartupSummary {
    pub orphaned_tasks_found: usize,
    pub orphaned_tasks_failed: usize,
    pub files_reset: usize,
    pub files_retried: usize,
    pub errors: usize,
}

pub struct RecoveryService {
    files: Arc<dyn MediaFileStore>,
    tasks: Arc<dyn TaskStore>,
    settings: Arc<dyn SystemSettingsStore>,
    lifecycle: Arc<LifecycleService>,
    submitter: Arc<dyn TaskSubmitter>,
    backend: Arc<dyn TaskBackend>,
    config: RecoveryConfig,
}

impl RecoveryService {
    pub fn new(
        files: Arc<dyn MediaFileStore>,
        tasks: Arc<dyn TaskStore>,
        settings: Arc<dyn SystemSettingsStore>,
        lifecycle: Arc<LifecycleService>,
        submitter: Arc<dyn TaskSubmitter>,
        backend: Arc<dyn TaskBackend>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            files,
            tasks,
            settings,
            lifecycle,
            submitter,
            backend,
            config,
        }
    }

    // ---- detection (read-only) ----

    /// Active tasks untouched beyond the stuck threshold
    pub async fn detect_stuck_tasks(&self) -> Result<Vec<TaskRecord>, EngineError> {
        let cutoff = Utc::now() - Duration::hours(self.config.stuck_threshold_hours);
        Ok(self.tasks.active_older_than(cutoff).await?)
    }

    /// Active task rows no live worker claims (boot check)
    pub async fn detect_orphaned_tasks(&self) -> Result<Vec<TaskRecord>, EngineError> {
        let live: HashSet<String> = self.backend.live_task_ids();
        Ok(self
            .tasks
            .all_active()
            .await?
            .into_iter()
            .filter(|t| !live.contains(&t.id))
            .collect())
    }

    /// Files processing past the stuck threshold with no active task
    pub async fn detect_stuck_files(&self) -> Result<Vec<MediaFile>, EngineError> {
        let cutoff = Utc::now() - Duration::hours(self.config.stuck_threshold_hours);
        let mut stuck = Vec::new();
        for file in self.files.processing_older_than(cutoff).await? {
            if self.tasks.aggregate_for_file(file.id).await?.active() == 0 {
                stuck.push(file);
            }
        }
        Ok(stuck)
    }

    /// Files whose status disagrees with their task aggregate
    pub async fn detect_inconsistent_files(&self) -> Result<Vec<MediaFile>, EngineError> {
        let mut inconsistent = Vec::new();
        for file in self.files.list_by_status(FileStatus::Processing).await? {
            let agg = self.tasks.aggregate_for_file(file.id).await?;
            if agg.total() > 0 && agg.active() == 0 {
                inconsistent.push(file);
            }
        }
        for file in self.files.list_by_status(FileStatus::Pending).await? {
            let agg = self.tasks.aggregate_for_file(file.id).await?;
            if agg.in_progress > 0 || agg.completed > 0 {
                inconsistent.push(file);
            }
        }
        Ok(inconsistent)
    }

    /// Files processing for longer than the abandoned threshold since
    /// upload, with no active task
    pub async fn detect_abandoned_files(&self) -> Result<Vec<MediaFile>, EngineError> {
        let cutoff = Utc::now() - Duration::hours(self.config.abandoned_threshold_hours);
        let mut abandoned = Vec::new();
        for file in self.files.uploaded_before(cutoff).await? {
            if self.tasks.aggregate_for_file(file.id).await?.active() == 0 {
                abandoned.push(file);
            }
        }
        Ok(abandoned)
    }

    // ---- reconciliation ----

    /// Fail a stuck task; if its file has no other active work, the file
    /// moves to `Error`.
    pub async fn recover_stuck_task(&self, task: &TaskRecord) -> Result<(), EngineError> {
        tracing::info!(
            task_id = %task.id,
            kind = task.task_type.as_str(),
            "Recovering stuck task"
        );
        self.tasks.mark_failed(&task.id, STUCK_TASK_MESSAGE).await?;

        if let Some(file_id) = task.media_file_id {
            let agg = self.tasks.aggregate_for_file(file_id).await?;
            if agg.active() == 0 {
                if let Some(file) = self.files.get(file_id).await? {
                    if file.status == FileStatus::Processing {
                        self.lifecycle.fail(file_id, STUCK_TASK_MESSAGE).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Fail every task a dead worker abandoned
    pub async fn recover_orphaned_tasks(
        &self,
        orphaned: &[TaskRecord],
    ) -> Result<usize, EngineError> {
        let mut failed = 0;
        for task in orphaned {
            match self.tasks.mark_failed(&task.id, ORPHANED_TASK_MESSAGE).await {
                Ok(()) => failed += 1,
                Err(e) => {
                    tracing::error!(task_id = %task.id, error = %e, "Orphaned task recovery failed")
                },
            }
        }
        Ok(failed)
    }

    /// Recover one stuck file: fail hanging tasks, then either retry
    /// (reset to `Pending`, resubmit transcription) or orphan it once the
    /// retry budget runs out. Returns `true` when a retry was scheduled.
    pub async fn recover_stuck_file(&self, file: &MediaFile) -> Result<bool, EngineError> {
        tracing::info!(file_id = file.id, filename = %file.filename, "Recovering stuck file");

        for task in self.tasks.active_for_file(file.id).await? {
            self.tasks.mark_failed(&task.id, NO_WORKER_MESSAGE).await?;
        }

        let previous_attempts = file.recovery_attempts;
        let attempts = self.files.increment_recovery_attempts(file.id).await?;

        let within_budget = previous_attempts < self.config.max_recovery_attempts
            && self.settings.should_retry(previous_attempts).await?;
        if !within_budget {
            tracing::warn!(
                file_id = file.id,
                attempts,
                "Retry budget exhausted, orphaning file"
            );
            self.files.mark_orphaned(file.id, true).await?;
            return Ok(false);
        }

        self.files.transition(file.id, FileStatus::Pending).await?;
        self.resubmit_transcription(file).await?;
        Ok(true)
    }

    /// Re-derive a consistent file status from its task aggregate
    pub async fn fix_inconsistent_file(&self, file: &MediaFile) -> Result<(), EngineError> {
        let agg = self.tasks.aggregate_for_file(file.id).await?;

        if agg.total() == 0 {
            if file.status == FileStatus::Processing {
                self.lifecycle
                    .fail(file.id, "File was processing with no tasks")
                    .await?;
            }
            return Ok(());
        }

        if agg.active() == 0 {
            if agg.completed > 0 {
                if file.status != FileStatus::Completed {
                    self.files.transition(file.id, FileStatus::Completed).await?;
                    tracing::info!(file_id = file.id, "Marked completed from task aggregate");
                }
            } else if agg.failed > 0 && file.status != FileStatus::Error {
                self.lifecycle.fail(file.id, "All tasks failed").await?;
            }
        } else if file.status == FileStatus::Pending {
            self.files.transition(file.id, FileStatus::Processing).await?;
            tracing::info!(file_id = file.id, "Marked processing from task aggregate");
        }
        Ok(())
    }

    async fn resubmit_transcription(&self, file: &MediaFile) -> Result<(), EngineError> {
        let task_id = self
            .submitter
            .submit_task(
                file.user_id,
                Some(file.id),
                TaskKind::Transcription,
                serde_json::json!({ "media_file_id": file.id }),
            )
            .await?;
        tracing::info!(file_id = file.id, task_id = %task_id, "Transcription retry scheduled");
        Ok(())
    }

    // ---- passes ----

    /// The every-ten-minutes pass: stuck tasks, inconsistent files, stuck
    /// files without a worker. Individual errors never stop the sweep.
    pub async fn periodic_health_check(&self) -> RecoverySummary {
        let mut summary = RecoverySummary::default();

        match self.detect_stuck_tasks().await {
            Ok(stuck) => {
                summary.stuck_tasks_found = stuck.len();
                for task in &stuck {
                    match self.recover_stuck_task(task).await {
                        Ok(()) => summary.stuck_tasks_recovered += 1,
                        Err(e) => {
                            summary.errors += 1;
                            tracing::error!(task_id = %task.id, error = %e, "Stuck task recovery failed");
                        },
                    }
                }
            },
            Err(e) => {
                summary.errors += 1;
                tracing::error!(error = %e, "Stuck task detection failed");
            },
        }

        match self.detect_inconsistent_files().await {
            Ok(files) => {
                summary.inconsistent_files_found = files.len();
                for file in &files {
                    match self.fix_inconsistent_file(file).await {
                        Ok(()) => summary.inconsistent_files_fixed += 1,
                        Err(e) => {
                            summary.errors += 1;
                            tracing::error!(file_id = file.id, error = %e, "Inconsistency fix failed");
                        },
                    }
                }
            },
            Err(e) => {
                summary.errors += 1;
                tracing::error!(error = %e, "Inconsistency detection failed");
            },
        }

        match self.detect_stuck_files().await {
            Ok(files) => {
                summary.stuck_files_found = files.len();
                for file in &files {
                    match self.recover_stuck_file(file).await {
                        Ok(true) => summary.stuck_files_recovered += 1,
                        Ok(false) => summary.files_orphaned += 1,
                        Err(e) => {
                            summary.errors += 1;
                            tracing::error!(file_id = file.id, error = %e, "Stuck file recovery failed");
                        },
                    }
                }
            },
            Err(e) => {
                summary.errors += 1;
                tracing::error!(error = %e, "Stuck file detection failed");
            },
        }

        tracing::info!(
            stuck_tasks = summary.stuck_tasks_found,
            recovered = summary.stuck_tasks_recovered,
            inconsistent = summary.inconsistent_files_found,
            stuck_files = summary.stuck_files_found,
            orphaned = summary.files_orphaned,
            errors = summary.errors,
            "Periodic health check completed"
        );
        summary
    }

    /// Boot pass: fail tasks no worker claims, then reset and retry files
    /// left processing with nothing running.
    pub async fn startup_recovery(&self) -> StartupSummary {
        let mut summary = StartupSummary::default();

        match self.detect_orphaned_tasks().await {
            Ok(orphaned) => {
                summary.orphaned_tasks_found = orphaned.len();
                match self.recover_orphaned_tasks(&orphaned).await {
                    Ok(n) => summary.orphaned_tasks_failed = n,
                    Err(e) => {
                        summary.errors += 1;
                        tracing::error!(error = %e, "Orphaned task recovery failed");
                    },
                }
            },
            Err(e) => {
                summary.errors += 1;
                tracing::error!(error = %e, "Orphaned task detection failed");
            },
        }

        // After a crash no task is live; any file still processing with no
        // active work gets another run
        match self.files.list_by_status(FileStatus::Processing).await {
            Ok(files) => {
                for file in files {
                    let active = match self.tasks.aggregate_for_file(file.id).await {
                        Ok(agg) => agg.active(),
                        Err(e) => {
                            summary.errors += 1;
                            tracing::error!(file_id = file.id, error = %e, "Aggregate probe failed");
                            continue;
                        },
                    };
                    if active > 0 {
                        continue;
                    }
                    match self.files.transition(file.id, FileStatus::Pending).await {
                        Ok(_) => summary.files_reset += 1,
                        Err(e) => {
                            summary.errors += 1;
                            tracing::error!(file_id = file.id, error = %e, "Reset failed");
                            continue;
                        },
                    }
                    match self.resubmit_transcription(&file).await {
                        Ok(()) => summary.files_retried += 1,
                        Err(e) => {
                            summary.errors += 1;
                            tracing::error!(file_id = file.id, error = %e, "Retry submission failed");
                        },
                    }
                }
            },
            Err(e) => {
                summary.errors += 1;
                tracing::error!(error = %e, "Processing file listing failed");
            },
        }

        tracing::info!(
            orphaned_found = summary.orphaned_tasks_found,
            orphaned_failed = summary.orphaned_tasks_failed,
            reset = summary.files_reset,
            retried = summary.files_retried,
            "Startup recovery completed"
        );
        summary
    }

    /// On-demand sweep for one user (or everyone): retry whatever is
    /// stuck or pending beyond the abandoned threshold.
    pub async fn recover_user_files(&self, user_id: Option<i64>) -> RecoverySummary {
        let mut summary = RecoverySummary::default();
        let cutoff = Utc::now() - Duration::hours(self.config.abandoned_threshold_hours);

        let processing = match self.files.list_by_status(FileStatus::Processing).await {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(error = %e, "File listing failed");
                summary.errors += 1;
                return summary;
            },
        };

        for file in processing
            .into_iter()
            .filter(|f| user_id.map_or(true, |u| f.user_id == u))
        {
            let active = match self.tasks.aggregate_for_file(file.id).await {
                Ok(agg) => agg.active(),
                Err(e) => {
                    summary.errors += 1;
                    tracing::error!(file_id = file.id, error = %e, "Aggregate probe failed");
                    continue;
                },
            };
            if active > 0 || file.upload_time > cutoff {
                continue;
            }
            summary.stuck_files_found += 1;
            match self.recover_stuck_file(&file).await {
                Ok(true) => summary.stuck_files_recovered += 1,
                Ok(false) => summary.files_orphaned += 1,
                Err(e) => {
                    summary.errors += 1;
                    tracing::error!(file_id = file.id, error = %e, "User file recovery failed");
                },
            }
        }
        summary
    }
}
