use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(JobState::Waiting),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "delayed" => Some(JobState::Delayed),
            _ => None,
        }
    }
}

/// Options accepted by `add_job`
#[derive(Debug, Clone, Default)]
pub struct AddJobOptions {
    /// Higher priority claims first
    pub priority: i32,
    /// Hold the job back for this long before it becomes claimable
    pub delay_ms: Option<u64>,
    /// Caller-supplied deduplication key: a second enqueue with the same
    /// key while the first job is unfinished returns the existing job
    /// instead of creating a duplicate.
    pub job_id: Option<String>,
}

/// Handle returned from `add_job`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub queue: String,
    pub name: String,
}

/// A claimed job handed to a processor
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub id: Uuid,
    pub queue: String,
    pub name: String,
    pub payload: JsonValue,
    /// Attempts including the current one
    pub attempts: u32,
    pub max_attempts: u32,
}

impl ActiveJob {
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Asynchronous handler bound to a queue via `register_processor`
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn process(&self, job: &ActiveJob) -> anyhow::Result<()>;
}

/// Per-queue counts for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueCounts {
    pub name: String,
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: bool,
}

/// Worker pool status for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub name: String,
    pub running: bool,
    pub concurrency: usize,
}

/// Aggregate health of the queue subsystem
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueHealth {
    pub status: HealthState,
    pub queues: Vec<QueueCounts>,
    pub workers: Vec<WorkerStatus>,
}

/// Lifecycle transition broadcast on a queue's event channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobTransition {
    Waiting,
    Active,
    Completed,
    Failed,
    Retrying,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub queue: String,
    pub job_id: Uuid,
    pub name: String,
    pub transition: JobTransition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
