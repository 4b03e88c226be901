//! Database row structures for PostgreSQL

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use testrig_models::{
    BrowserResult, BrowserResultStatus, Recording, RecordingData, Run, RunConfigOverrides,
    RunStatus, RunType, Schedule, ScheduleStatus, Suite, Test, TriggeredBy,
};
use uuid::Uuid;

/// Database row for the runs table
#[derive(Debug, FromRow)]
pub struct RunRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub run_type: String,
    pub recording_id: Option<Uuid>,
    pub test_id: Option<Uuid>,
    pub suite_id: Option<Uuid>,
    pub parent_run_id: Option<Uuid>,
    pub status: String,
    pub triggered_by: String,
    pub schedule_id: Option<Uuid>,
    pub browsers: Vec<String>,
    pub actions_total: i32,
    pub actions_executed: i32,
    pub actions_failed: i32,
    pub actions_skipped: i32,
    pub job_id: Option<Uuid>,
    pub queue_name: Option<String>,
    pub error_message: Option<String>,
    pub video_path: Option<String>,
    pub screenshot_paths: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<RunRow> for Run {
    fn from(row: RunRow) -> Self {
        Run {
            id: row.id,
            user_id: row.user_id,
            project_id: row.project_id,
            run_type: RunType::parse(&row.run_type).unwrap_or(RunType::Recording),
            recording_id: row.recording_id,
            test_id: row.test_id,
            suite_id: row.suite_id,
            parent_run_id: row.parent_run_id,
            status: RunStatus::parse(&row.status).unwrap_or(RunStatus::Queued),
            triggered_by: match row.triggered_by.as_str() {
                "schedule" => TriggeredBy::Schedule,
                _ => TriggeredBy::Manual,
            },
            schedule_id: row.schedule_id,
            browsers: row.browsers,
            actions_total: row.actions_total.max(0) as u32,
            actions_executed: row.actions_executed.max(0) as u32,
            actions_failed: row.actions_failed.max(0) as u32,
            actions_skipped: row.actions_skipped.max(0) as u32,
            job_id: row.job_id,
            queue_name: row.queue_name,
            error_message: row.error_message,
            video_path: row.video_path,
            screenshot_paths: row.screenshot_paths,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }
}

/// Database row for the browser_results table
#[derive(Debug, FromRow)]
pub struct BrowserResultRow {
    pub id: Uuid,
    pub run_id: Uuid,
    pub browser: String,
    pub status: String,
    pub actions_executed: i32,
    pub actions_failed: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<BrowserResultRow> for BrowserResult {
    fn from(row: BrowserResultRow) -> Self {
        BrowserResult {
            id: row.id,
            run_id: row.run_id,
            browser: row.browser,
            status: BrowserResultStatus::parse(&row.status).unwrap_or(BrowserResultStatus::Pending),
            actions_executed: row.actions_executed.max(0) as u32,
            actions_failed: row.actions_failed.max(0) as u32,
            error_message: row.error_message,
            created_at: row.created_at,
            completed_at: row.completed_at,
        }
    }
}

/// Database row for the schedules table
#[derive(Debug, FromRow)]
pub struct ScheduleRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub cron_expression: String,
    pub timezone: Option<String>,
    pub target_type: String,
    pub recording_id: Option<Uuid>,
    pub test_id: Option<Uuid>,
    pub suite_id: Option<Uuid>,
    pub overrides: JsonValue,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub max_daily_runs: Option<i32>,
    pub status: String,
    pub runs_today: i32,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
    pub last_run_id: Option<Uuid>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ScheduleRow> for Schedule {
    fn from(row: ScheduleRow) -> Self {
        Schedule {
            id: row.id,
            user_id: row.user_id,
            project_id: row.project_id,
            name: row.name,
            cron_expression: row.cron_expression,
            timezone: row.timezone,
            target_type: RunType::parse(&row.target_type).unwrap_or(RunType::Recording),
            recording_id: row.recording_id,
            test_id: row.test_id,
            suite_id: row.suite_id,
            overrides: serde_json::from_value::<RunConfigOverrides>(row.overrides)
                .unwrap_or_default(),
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            max_daily_runs: row.max_daily_runs.map(|v| v.max(0) as u32),
            status: ScheduleStatus::parse(&row.status).unwrap_or(ScheduleStatus::Disabled),
            runs_today: row.runs_today.max(0) as u32,
            total_runs: row.total_runs.max(0) as u64,
            successful_runs: row.successful_runs.max(0) as u64,
            failed_runs: row.failed_runs.max(0) as u64,
            last_run_id: row.last_run_id,
            last_run_at: row.last_run_at,
            last_run_status: row.last_run_status.as_deref().and_then(RunStatus::parse),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Database row for the tests table
#[derive(Debug, FromRow)]
pub struct TestRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub suite_id: Option<Uuid>,
    pub name: String,
    pub active: bool,
    pub config: Option<JsonValue>,
    pub recording: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl From<TestRow> for Test {
    fn from(row: TestRow) -> Self {
        Test {
            id: row.id,
            user_id: row.user_id,
            project_id: row.project_id,
            suite_id: row.suite_id,
            name: row.name,
            active: row.active,
            config: row
                .config
                .and_then(|v| serde_json::from_value::<RunConfigOverrides>(v).ok()),
            recording: row
                .recording
                .and_then(|v| serde_json::from_value::<RecordingData>(v).ok()),
            created_at: row.created_at,
        }
    }
}

/// Database row for the suites table
#[derive(Debug, FromRow)]
pub struct SuiteRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<SuiteRow> for Suite {
    fn from(row: SuiteRow) -> Self {
        Suite {
            id: row.id,
            user_id: row.user_id,
            project_id: row.project_id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

/// Database row for the recordings table
#[derive(Debug, FromRow)]
pub struct RecordingRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub browser: Option<String>,
    pub total_actions: i32,
    pub actions: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl From<RecordingRow> for Recording {
    fn from(row: RecordingRow) -> Self {
        Recording {
            id: row.id,
            user_id: row.user_id,
            project_id: row.project_id,
            name: row.name,
            browser: row.browser,
            total_actions: row.total_actions.max(0) as u32,
            actions: row.actions,
            created_at: row.created_at,
        }
    }
}
