use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Run status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Passed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "passed" => Some(RunStatus::Passed),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    /// A terminal run no longer accepts worker updates.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Passed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// What kind of target a run executes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Recording,
    Test,
    Suite,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Recording => "recording",
            RunType::Test => "test",
            RunType::Suite => "suite",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "recording" => Some(RunType::Recording),
            "test" => Some(RunType::Test),
            "suite" => Some(RunType::Suite),
            _ => None,
        }
    }
}

/// How a run was started
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Manual,
    Schedule,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggeredBy::Manual => "manual",
            TriggeredBy::Schedule => "schedule",
        }
    }
}

/// One tracked execution of a recording, test, or suite.
///
/// A non-suite run has at most one live execution job (`job_id`/`queue_name`
/// correlate it). A suite run owns child runs via their `parent_run_id` and
/// carries no job of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub run_type: RunType,
    pub recording_id: Option<Uuid>,
    pub test_id: Option<Uuid>,
    pub suite_id: Option<Uuid>,
    pub parent_run_id: Option<Uuid>,
    pub status: RunStatus,
    pub triggered_by: TriggeredBy,
    pub schedule_id: Option<Uuid>,
    pub browsers: Vec<String>,
    pub actions_total: u32,
    pub actions_executed: u32,
    pub actions_failed: u32,
    pub actions_skipped: u32,
    pub job_id: Option<Uuid>,
    pub queue_name: Option<String>,
    pub error_message: Option<String>,
    pub video_path: Option<String>,
    pub screenshot_paths: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields the orchestrator supplies when creating a run
#[derive(Debug, Clone)]
pub struct NewRun {
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub run_type: RunType,
    pub recording_id: Option<Uuid>,
    pub test_id: Option<Uuid>,
    pub suite_id: Option<Uuid>,
    pub parent_run_id: Option<Uuid>,
    pub triggered_by: TriggeredBy,
    pub schedule_id: Option<Uuid>,
    pub browsers: Vec<String>,
    pub actions_total: u32,
}

/// Per-browser outcome row for a multi-browser run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserResult {
    pub id: Uuid,
    pub run_id: Uuid,
    pub browser: String,
    pub status: BrowserResultStatus,
    pub actions_executed: u32,
    pub actions_failed: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Browser result status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrowserResultStatus {
    Pending,
    Running,
    Passed,
    Failed,
}

impl BrowserResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserResultStatus::Pending => "pending",
            BrowserResultStatus::Running => "running",
            BrowserResultStatus::Passed => "passed",
            BrowserResultStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BrowserResultStatus::Pending),
            "running" => Some(BrowserResultStatus::Running),
            "passed" => Some(BrowserResultStatus::Passed),
            "failed" => Some(BrowserResultStatus::Failed),
            _ => None,
        }
    }
}
