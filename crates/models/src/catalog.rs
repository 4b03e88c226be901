use crate::schedule::RunConfigOverrides;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Captured browser actions attached to a test or recording.
///
/// The orchestrator never interprets the action list; it only needs the
/// count for progress accounting. Replay is the execution worker's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingData {
    pub total_actions: u32,
    pub actions: JsonValue,
}

/// A saved test: a named recording plus its run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Test {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub suite_id: Option<Uuid>,
    pub name: String,
    pub active: bool,
    pub config: Option<RunConfigOverrides>,
    pub recording: Option<RecordingData>,
    pub created_at: DateTime<Utc>,
}

impl Test {
    /// A test with no captured actions cannot run.
    pub fn has_recording(&self) -> bool {
        self.recording
            .as_ref()
            .map(|r| r.total_actions > 0)
            .unwrap_or(false)
    }
}

/// A named group of tests run together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suite {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A standalone recording, predating tests/suites. Schedules created
/// against recordings still trigger single-browser runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub browser: Option<String>,
    pub total_actions: u32,
    pub actions: JsonValue,
    pub created_at: DateTime<Utc>,
}
