//! Orphan and retention cleanup: two independent periodic tasks sharing
//! one entry point, dispatched by cleanup type.
//!
//! Every task returns a typed [`CleanupOutcome`] — policy problems and
//! per-item failures are reported, never thrown, so the cleanup queue only
//! retries on real infrastructure trouble upstream of this module.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use testrig_models::{CleanupJobPayload, RunStatus};
use testrig_storage::Repository;
use tracing::{debug, info};
use uuid::Uuid;

/// Error message stamped onto runs reconciled by the orphan sweep
pub const ORPHAN_ERROR_MESSAGE: &str = "Run timed out or was orphaned (worker/API restart)";

const VIDEO_EXTENSIONS: &[&str] = &["webm", "mp4"];
const SCREENSHOT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Which cleanup task a job asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupTask {
    OrphanedRuns,
    OldVideos,
    OldScreenshots,
    ExpiredTokens,
}

impl CleanupTask {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "orphaned-runs" => Some(CleanupTask::OrphanedRuns),
            "old-videos" => Some(CleanupTask::OldVideos),
            "old-screenshots" => Some(CleanupTask::OldScreenshots),
            "expired-tokens" => Some(CleanupTask::ExpiredTokens),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupTask::OrphanedRuns => "orphaned-runs",
            CleanupTask::OldVideos => "old-videos",
            CleanupTask::OldScreenshots => "old-screenshots",
            CleanupTask::ExpiredTokens => "expired-tokens",
        }
    }
}

/// Partial results of a best-effort sweep
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CleanupReport {
    pub items_processed: usize,
    pub items_deleted: usize,
    pub errors: Vec<String>,
}

/// Typed outcome of one cleanup job
#[derive(Debug, Clone, PartialEq)]
pub enum CleanupOutcome {
    OrphanedRuns(CleanupReport),
    VideoRetention(CleanupReport),
    ScreenshotRetention(CleanupReport),
    /// Stateless tokens expire on their own; nothing to clean server-side.
    ExpiredTokens,
    Error {
        cleanup_type: String,
        message: String,
    },
}

/// Retention policy and orphan timeout
#[derive(Debug, Clone)]
pub struct CleanupSettings {
    pub orphan_timeout_ms: u64,
    pub video_dir: PathBuf,
    pub screenshot_dir: PathBuf,
    pub video_retention_days: u32,
    pub screenshot_retention_days: u32,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            orphan_timeout_ms: 10 * 60 * 1000,
            video_dir: PathBuf::from("storage/videos"),
            screenshot_dir: PathBuf::from("storage/screenshots"),
            video_retention_days: 30,
            screenshot_retention_days: 30,
        }
    }
}

pub struct CleanupProcessor {
    repo: Arc<Repository>,
    settings: CleanupSettings,
}

impl CleanupProcessor {
    pub fn new(repo: Arc<Repository>, settings: CleanupSettings) -> Self {
        Self { repo, settings }
    }

    /// Run one cleanup job. Unknown types are reported, not thrown.
    pub async fn run(&self, payload: &CleanupJobPayload) -> CleanupOutcome {
        match CleanupTask::parse(&payload.cleanup_type) {
            Some(CleanupTask::OrphanedRuns) => {
                CleanupOutcome::OrphanedRuns(self.sweep_orphaned_runs().await)
            }
            Some(CleanupTask::OldVideos) => {
                let max_age_days = payload
                    .max_age_days
                    .unwrap_or(self.settings.video_retention_days);
                let dir = self.settings.video_dir.clone();
                CleanupOutcome::VideoRetention(
                    self.sweep_artifacts(&dir, VIDEO_EXTENSIONS, max_age_days).await,
                )
            }
            Some(CleanupTask::OldScreenshots) => {
                let max_age_days = payload
                    .max_age_days
                    .unwrap_or(self.settings.screenshot_retention_days);
                let dir = self.settings.screenshot_dir.clone();
                CleanupOutcome::ScreenshotRetention(
                    self.sweep_artifacts(&dir, SCREENSHOT_EXTENSIONS, max_age_days)
                        .await,
                )
            }
            Some(CleanupTask::ExpiredTokens) => CleanupOutcome::ExpiredTokens,
            None => CleanupOutcome::Error {
                cleanup_type: payload.cleanup_type.clone(),
                message: format!("Unknown cleanup type: {}", payload.cleanup_type),
            },
        }
    }

    /// Mark runs whose worker went quiet as failed. Each run updates
    /// independently; one failure never stops the rest. Also called once,
    /// synchronously, at process startup to reconcile an unclean shutdown.
    pub async fn sweep_orphaned_runs(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        let orphans = match self
            .repo
            .find_orphaned_runs(self.settings.orphan_timeout_ms)
            .await
        {
            Ok(runs) => runs,
            Err(e) => {
                report.errors.push(format!("Failed to query orphaned runs: {e:#}"));
                return report;
            }
        };

        report.items_processed = orphans.len();
        for mut run in orphans {
            run.status = RunStatus::Failed;
            run.error_message = Some(ORPHAN_ERROR_MESSAGE.to_string());
            run.completed_at = Some(chrono::Utc::now());
            match self.repo.update_run(&run).await {
                Ok(()) => {
                    report.items_deleted += 1;
                    info!(run_id = %run.id, "Orphaned run marked failed");
                }
                Err(e) => {
                    report
                        .errors
                        .push(format!("Failed to update run {}: {e:#}", run.id));
                }
            }
        }

        if report.items_processed > 0 {
            info!(
                processed = report.items_processed,
                reconciled = report.items_deleted,
                errors = report.errors.len(),
                "Orphaned-run sweep finished"
            );
        }
        report
    }

    /// Delete artifacts past the retention window, unless the owning run is
    /// still running. A missing directory reports zero processed — fresh
    /// deployments have nothing to clean.
    async fn sweep_artifacts(
        &self,
        dir: &Path,
        extensions: &[&str],
        max_age_days: u32,
    ) -> CleanupReport {
        let mut report = CleanupReport::default();

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "Artifact directory does not exist, nothing to clean");
                return report;
            }
            Err(e) => {
                report
                    .errors
                    .push(format!("Failed to read {}: {e}", dir.display()));
                return report;
            }
        };

        let max_age = Duration::from_secs(max_age_days as u64 * 24 * 60 * 60);
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    report
                        .errors
                        .push(format!("Failed to list {}: {e}", dir.display()));
                    break;
                }
            };
            let path = entry.path();
            let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !extensions.contains(&extension.to_ascii_lowercase().as_str()) {
                continue;
            }
            report.items_processed += 1;

            match self.sweep_file(&path, max_age).await {
                Ok(true) => report.items_deleted += 1,
                Ok(false) => {}
                Err(e) => report.errors.push(e),
            }
        }

        info!(
            dir = %dir.display(),
            processed = report.items_processed,
            deleted = report.items_deleted,
            errors = report.errors.len(),
            "Artifact retention sweep finished"
        );
        report
    }

    /// Returns Ok(true) when the file was deleted.
    async fn sweep_file(&self, path: &Path, max_age: Duration) -> Result<bool, String> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| format!("Failed to stat {}: {e}", path.display()))?;
        let modified = metadata
            .modified()
            .map_err(|e| format!("Failed to read mtime of {}: {e}", path.display()))?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age < max_age {
            return Ok(false);
        }

        // Files follow run-{id}.<ext>; anything else is left alone.
        let Some(run_id) = run_id_from_filename(path) else {
            debug!(file = %path.display(), "Artifact does not follow run naming, leaving in place");
            return Ok(false);
        };

        // Recheck run status immediately before deletion: a still-running
        // run keeps its artifact regardless of age.
        match self.repo.run_by_id(run_id).await {
            Ok(Some(run)) if run.status == RunStatus::Running => {
                debug!(run_id = %run_id, file = %path.display(), "Run still running, keeping artifact");
                return Ok(false);
            }
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "Failed to look up run {run_id} for {}: {e:#}",
                    path.display()
                ));
            }
        }

        tokio::fs::remove_file(path)
            .await
            .map_err(|e| format!("Failed to delete {}: {e}", path.display()))?;
        debug!(file = %path.display(), "Deleted expired artifact");
        Ok(true)
    }
}

/// Extract the run id from the `run-{id}.<ext>` filename convention.
fn run_id_from_filename(path: &Path) -> Option<Uuid> {
    let stem = path.file_stem()?.to_str()?;
    let id = stem.strip_prefix("run-")?;
    // Tolerate suffixes like run-{id}.chromium.webm
    let id = id.split('.').next()?;
    Uuid::parse_str(id).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use testrig_models::{NewRun, Run, RunType, TriggeredBy};

    fn processor_with(repo: Arc<Repository>, settings: CleanupSettings) -> CleanupProcessor {
        CleanupProcessor::new(repo, settings)
    }

    async fn seed_run(repo: &Repository, status: RunStatus, started_minutes_ago: i64) -> Run {
        let mut run = repo
            .create_run(NewRun {
                user_id: Uuid::new_v4(),
                project_id: Uuid::new_v4(),
                run_type: RunType::Test,
                recording_id: None,
                test_id: Some(Uuid::new_v4()),
                suite_id: None,
                parent_run_id: None,
                triggered_by: TriggeredBy::Manual,
                schedule_id: None,
                browsers: vec!["chromium".to_string()],
                actions_total: 3,
            })
            .await
            .unwrap();
        run.status = status;
        run.started_at = Some(Utc::now() - ChronoDuration::minutes(started_minutes_ago));
        repo.update_run(&run).await.unwrap();
        run
    }

    #[tokio::test]
    async fn orphan_sweep_marks_only_stale_running_runs() {
        let repo = Arc::new(Repository::in_memory());
        let stale = seed_run(&repo, RunStatus::Running, 20).await;
        let fresh = seed_run(&repo, RunStatus::Running, 1).await;
        let queued = seed_run(&repo, RunStatus::Queued, 20).await;

        let processor = processor_with(repo.clone(), CleanupSettings::default());
        let report = processor.sweep_orphaned_runs().await;
        assert_eq!(report.items_processed, 1);
        assert_eq!(report.items_deleted, 1);
        assert!(report.errors.is_empty());

        let stale = repo.run_by_id(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, RunStatus::Failed);
        assert_eq!(stale.error_message.as_deref(), Some(ORPHAN_ERROR_MESSAGE));
        assert!(stale.completed_at.is_some());

        let fresh = repo.run_by_id(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, RunStatus::Running);
        let queued = repo.run_by_id(queued.id).await.unwrap().unwrap();
        assert_eq!(queued.status, RunStatus::Queued);
    }

    #[tokio::test]
    async fn retention_deletes_expired_files_but_protects_running_runs() {
        let repo = Arc::new(Repository::in_memory());
        let finished = seed_run(&repo, RunStatus::Passed, 60).await;
        let running = seed_run(&repo, RunStatus::Running, 2).await;

        let dir = tempfile::tempdir().unwrap();
        let finished_file = dir.path().join(format!("run-{}.webm", finished.id));
        let running_file = dir.path().join(format!("run-{}.webm", running.id));
        let unmanaged_file = dir.path().join("demo.webm");
        let ignored_file = dir.path().join("notes.txt");
        for file in [&finished_file, &running_file, &unmanaged_file, &ignored_file] {
            std::fs::write(file, b"artifact").unwrap();
        }

        let processor = processor_with(
            repo,
            CleanupSettings {
                video_dir: dir.path().to_path_buf(),
                ..CleanupSettings::default()
            },
        );
        // A zero-day window makes every matching file age-eligible.
        let outcome = processor
            .run(&CleanupJobPayload {
                cleanup_type: "old-videos".to_string(),
                max_age_days: Some(0),
            })
            .await;

        let CleanupOutcome::VideoRetention(report) = outcome else {
            panic!("expected a video retention outcome, got {outcome:?}");
        };
        assert_eq!(report.items_processed, 3);
        assert_eq!(report.items_deleted, 1);
        assert!(report.errors.is_empty());

        assert!(!finished_file.exists());
        assert!(running_file.exists());
        assert!(unmanaged_file.exists());
        assert!(ignored_file.exists());
    }

    #[tokio::test]
    async fn screenshot_sweep_only_touches_image_extensions() {
        let repo = Arc::new(Repository::in_memory());
        let finished = seed_run(&repo, RunStatus::Failed, 60).await;

        let dir = tempfile::tempdir().unwrap();
        let shot = dir.path().join(format!("run-{}.png", finished.id));
        let video = dir.path().join(format!("run-{}.webm", finished.id));
        std::fs::write(&shot, b"png").unwrap();
        std::fs::write(&video, b"webm").unwrap();

        let processor = processor_with(
            repo,
            CleanupSettings {
                screenshot_dir: dir.path().to_path_buf(),
                ..CleanupSettings::default()
            },
        );
        let outcome = processor
            .run(&CleanupJobPayload {
                cleanup_type: "old-screenshots".to_string(),
                max_age_days: Some(0),
            })
            .await;

        let CleanupOutcome::ScreenshotRetention(report) = outcome else {
            panic!("expected a screenshot retention outcome, got {outcome:?}");
        };
        assert_eq!(report.items_processed, 1);
        assert_eq!(report.items_deleted, 1);
        assert!(!shot.exists());
        assert!(video.exists());
    }

    #[tokio::test]
    async fn missing_artifact_directory_reports_zero_processed() {
        let repo = Arc::new(Repository::in_memory());
        let processor = processor_with(
            repo,
            CleanupSettings {
                video_dir: PathBuf::from("/nonexistent/testrig-videos"),
                ..CleanupSettings::default()
            },
        );
        let outcome = processor
            .run(&CleanupJobPayload {
                cleanup_type: "old-videos".to_string(),
                max_age_days: None,
            })
            .await;
        assert_eq!(outcome, CleanupOutcome::VideoRetention(CleanupReport::default()));
    }

    #[tokio::test]
    async fn unknown_cleanup_type_is_reported_not_thrown() {
        let repo = Arc::new(Repository::in_memory());
        let processor = processor_with(repo, CleanupSettings::default());
        let outcome = processor
            .run(&CleanupJobPayload {
                cleanup_type: "stale-sessions".to_string(),
                max_age_days: None,
            })
            .await;
        let CleanupOutcome::Error { cleanup_type, .. } = outcome else {
            panic!("expected an error outcome, got {outcome:?}");
        };
        assert_eq!(cleanup_type, "stale-sessions");
    }

    #[tokio::test]
    async fn expired_token_cleanup_is_a_noop() {
        let repo = Arc::new(Repository::in_memory());
        let processor = processor_with(repo, CleanupSettings::default());
        let outcome = processor
            .run(&CleanupJobPayload {
                cleanup_type: "expired-tokens".to_string(),
                max_age_days: None,
            })
            .await;
        assert_eq!(outcome, CleanupOutcome::ExpiredTokens);
    }

    #[test]
    fn run_id_parses_from_artifact_names() {
        let id = Uuid::new_v4();
        let path = PathBuf::from(format!("/videos/run-{id}.webm"));
        assert_eq!(run_id_from_filename(&path), Some(id));

        let path = PathBuf::from(format!("/shots/run-{id}.chromium.png"));
        assert_eq!(run_id_from_filename(&path), Some(id));

        assert_eq!(run_id_from_filename(Path::new("/videos/demo.webm")), None);
        assert_eq!(run_id_from_filename(Path::new("/videos/run-nope.webm")), None);
    }

    #[test]
    fn cleanup_task_parse_round_trips() {
        for task in [
            CleanupTask::OrphanedRuns,
            CleanupTask::OldVideos,
            CleanupTask::OldScreenshots,
            CleanupTask::ExpiredTokens,
        ] {
            assert_eq!(CleanupTask::parse(task.as_str()), Some(task));
        }
        assert_eq!(CleanupTask::parse("stale-sessions"), None);
    }
}
