//! File cleanup: orphan aging, force deletion, health recommendations
//!
//! Runs as a utility task. Storage deletion is best-effort: an object
//! store error is logged and the database row is deleted anyway.

use chrono::Duration;
use std::sync::Arc;

use transcribe_config::RecoveryConfig;
use transcribe_core::FileStatus;
use transcribe_persistence::MediaFileStore;
use transcribe_storage::ObjectStore;

use crate::recovery::RecoveryService;
use crate::EngineError;

/// Results of one cleanup cycle
#[derive(Debug, Default, Clone)]
pub struct CleanupReport {
    pub stuck_files_checked: usize,
    pub files_recovered: usize,
    pub files_marked_orphaned: usize,
    pub old_orphans_flagged: usize,
    pub errors: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Results of a forced orphan deletion
#[derive(Debug, Default, Clone)]
pub struct ForceCleanupReport {
    pub eligible: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
}

pub struct CleanupService {
    files: Arc<dyn MediaFileStore>,
    storage: Arc<dyn ObjectStore>,
    recovery: Arc<RecoveryService>,
    config: RecoveryConfig,
}

impl CleanupService {
    pub fn new(
        files: Arc<dyn MediaFileStore>,
        storage: Arc<dyn ObjectStore>,
        recovery: Arc<RecoveryService>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            files,
            storage,
            recovery,
            config,
        }
    }

    /// One full cycle: recover stuck files, age orphans into
    /// force-delete eligibility, report health.
    pub async fn run_cleanup_cycle(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        match self.recovery.detect_stuck_files().await {
            Ok(stuck) => {
                report.stuck_files_checked = stuck.len();
                for file in &stuck {
                    match self.recovery.recover_stuck_file(file).await {
                        Ok(true) => report.files_recovered += 1,
                        Ok(false) => report.files_marked_orphaned += 1,
                        Err(e) => report
                            .errors
                            .push(format!("recovering file {}: {e}", file.id)),
                    }
                }
            },
            Err(e) => report.errors.push(format!("stuck file detection: {e}")),
        }

        match self.flag_old_orphans().await {
            Ok(n) => {
                report.old_orphans_flagged = n;
                if n > 0 {
                    report.recommendations.push(format!(
                        "{n} file(s) orphaned for over {} hours are flagged for deletion",
                        self.config.orphan_threshold_hours
                    ));
                }
            },
            Err(e) => report.errors.push(format!("orphan aging: {e}")),
        }

        match self.health_recommendations().await {
            Ok(mut recs) => report.recommendations.append(&mut recs),
            Err(e) => report.errors.push(format!("health check: {e}")),
        }

        tracing::info!(
            checked = report.stuck_files_checked,
            recovered = report.files_recovered,
            orphaned = report.files_marked_orphaned,
            errors = report.errors.len(),
            "Cleanup cycle completed"
        );
        report
    }

    /// Orphans older than the threshold become force-delete eligible
    async fn flag_old_orphans(&self) -> Result<usize, EngineError> {
        let threshold = Duration::hours(self.config.orphan_threshold_hours);
        let old = self.files.orphaned_older_than(threshold).await?;
        for file in &old {
            self.files.set_force_delete_eligible(file.id).await?;
            tracing::warn!(
                file_id = file.id,
                hours = self.config.orphan_threshold_hours,
                "File orphaned beyond threshold"
            );
        }
        Ok(old.len())
    }

    async fn health_recommendations(&self) -> Result<Vec<String>, EngineError> {
        let counts = self.files.count_by_status().await?;
        let total: i64 = counts.iter().map(|(_, n)| n).sum();
        let count_of = |status: FileStatus| {
            counts
                .iter()
                .find(|(s, _)| *s == status)
                .map(|(_, n)| *n)
                .unwrap_or(0)
        };

        let mut recommendations = Vec::new();
        let errors = count_of(FileStatus::Error);
        if total > 0 && errors as f64 / total as f64 > 0.1 {
            recommendations.push(format!(
                "High error rate: {errors} of {total} files are in error state; \
                 investigate pipeline health"
            ));
        }
        let orphaned = count_of(FileStatus::Orphaned);
        if orphaned > 0 {
            recommendations.push(format!(
                "{orphaned} orphaned file(s) need review or cleanup"
            ));
        }
        let processing = count_of(FileStatus::Processing);
        if processing > 50 {
            recommendations.push(format!(
                "{processing} files currently processing; monitor worker capacity"
            ));
        }
        Ok(recommendations)
    }

    /// Delete rows flagged eligible in a failed state. Blob deletion is
    /// best-effort; the row goes regardless.
    pub async fn force_cleanup_orphaned_files(&self, dry_run: bool) -> ForceCleanupReport {
        let mut report = ForceCleanupReport::default();

        let candidates = match self.files.force_delete_candidates().await {
            Ok(c) => c,
            Err(e) => {
                report.errors.push(format!("candidate listing: {e}"));
                return report;
            },
        };
        report.eligible = candidates.len();
        if dry_run {
            return report;
        }

        for file in candidates {
            if let Err(e) = self.storage.delete(&file.storage_path).await {
                tracing::warn!(
                    file_id = file.id,
                    object = %file.storage_path,
                    error = %e,
                    "Blob deletion failed; deleting row anyway"
                );
            }
            match self.files.delete(file.id).await {
                Ok(()) => report.deleted += 1,
                Err(e) => report.errors.push(format!("deleting file {}: {e}", file.id)),
            }
        }

        tracing::info!(
            eligible = report.eligible,
            deleted = report.deleted,
            errors = report.errors.len(),
            "Force cleanup completed"
        );
        report
    }
}
