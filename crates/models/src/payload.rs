use crate::run::RunType;
use crate::schedule::{RunConfig, ScreenshotMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue names. Each queue's retry/concurrency policy is fixed at process
/// start; see the queue crate's settings.
pub mod queues {
    pub const EXECUTION: &str = "execution";
    pub const CLEANUP: &str = "cleanup";
    pub const SCHEDULED: &str = "scheduled";
}

/// Job names dispatched on the queues. Cleanup jobs are named after their
/// task string instead.
pub mod job_names {
    pub const EXECUTE_RUN: &str = "execute-run";
    pub const SCHEDULE_TRIGGER: &str = "schedule-trigger";
}

/// Payload of an execution job. This is the orchestrator's only coupling to
/// the browser-automation worker: the worker fans out across `browsers`
/// internally, publishes progress events, and writes the run's outcome back
/// through the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionJobPayload {
    pub user_id: Uuid,
    pub run_id: Uuid,
    pub run_type: RunType,
    pub recording_id: Option<Uuid>,
    pub test_id: Option<Uuid>,
    pub suite_id: Option<Uuid>,
    pub browsers: Vec<String>,
    pub parallel_browsers: bool,
    pub headless: bool,
    pub record_video: bool,
    pub record_screenshots: bool,
    pub screenshot_mode: ScreenshotMode,
    pub timeout: u64,
    pub created_at: DateTime<Utc>,
}

impl ExecutionJobPayload {
    pub fn from_config(
        user_id: Uuid,
        run_id: Uuid,
        run_type: RunType,
        config: &RunConfig,
    ) -> Self {
        Self {
            user_id,
            run_id,
            run_type,
            recording_id: None,
            test_id: None,
            suite_id: None,
            browsers: config.browsers.clone(),
            parallel_browsers: config.parallel_browsers,
            headless: config.headless,
            record_video: config.record_video,
            record_screenshots: config.record_screenshots,
            screenshot_mode: config.screenshot_mode,
            timeout: config.timeout_ms,
            created_at: Utc::now(),
        }
    }
}

/// Payload of a cron-fired trigger job on the scheduled queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerJobPayload {
    pub schedule_id: Uuid,
}

/// Payload of a periodic cleanup job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupJobPayload {
    pub cleanup_type: String,
    /// Overrides the configured retention window for artifact scans
    pub max_age_days: Option<u32>,
}
