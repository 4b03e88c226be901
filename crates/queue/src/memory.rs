//! In-memory queue backend, used when no database pool is configured.

use crate::types::JobState;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub(crate) struct MemJob {
    pub id: Uuid,
    pub queue: String,
    pub name: String,
    pub job_key: Option<String>,
    pub payload: JsonValue,
    pub priority: i32,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct MemRepeatable {
    pub queue: String,
    pub name: String,
    pub pattern: String,
    pub timezone: String,
    pub payload: JsonValue,
    pub next_fire_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    jobs: Vec<MemJob>,
    repeatables: Vec<MemRepeatable>,
}

/// Lock-guarded job storage mirroring the Postgres tables
#[derive(Default)]
pub(crate) struct MemoryBackend {
    state: RwLock<MemoryState>,
}

pub(crate) enum AddOutcome {
    Created(Uuid),
    /// An unfinished job with the same key already exists
    Existing(Uuid),
}

impl MemoryBackend {
    pub async fn add(&self, job: MemJob) -> AddOutcome {
        let mut state = self.state.write().await;
        if let Some(key) = &job.job_key {
            if let Some(existing) = state
                .jobs
                .iter()
                .find(|j| j.queue == job.queue && j.job_key.as_ref() == Some(key) && j.finished_at.is_none())
            {
                return AddOutcome::Existing(existing.id);
            }
        }
        let id = job.id;
        state.jobs.push(job);
        AddOutcome::Created(id)
    }

    /// Claim the best waiting/delayed job whose `run_at` has passed.
    pub async fn claim(&self, queue: &str, now: DateTime<Utc>) -> Option<MemJob> {
        let mut state = self.state.write().await;
        let candidate = state
            .jobs
            .iter_mut()
            .filter(|j| {
                j.queue == queue
                    && matches!(j.state, JobState::Waiting | JobState::Delayed)
                    && j.run_at <= now
            })
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            })?;
        candidate.state = JobState::Active;
        candidate.attempts += 1;
        candidate.started_at = Some(now);
        Some(candidate.clone())
    }

    pub async fn mark_completed(&self, id: Uuid, now: DateTime<Utc>, keep: usize) {
        let mut state = self.state.write().await;
        let queue = match state.jobs.iter_mut().find(|j| j.id == id) {
            Some(job) => {
                job.state = JobState::Completed;
                job.finished_at = Some(now);
                job.queue.clone()
            }
            None => return,
        };
        Self::prune(&mut state, &queue, JobState::Completed, keep);
    }

    pub async fn mark_failed(&self, id: Uuid, error: &str, now: DateTime<Utc>, keep: usize) {
        let mut state = self.state.write().await;
        let queue = match state.jobs.iter_mut().find(|j| j.id == id) {
            Some(job) => {
                job.state = JobState::Failed;
                job.finished_at = Some(now);
                job.last_error = Some(error.to_string());
                job.queue.clone()
            }
            None => return,
        };
        Self::prune(&mut state, &queue, JobState::Failed, keep);
    }

    pub async fn mark_delayed(&self, id: Uuid, error: &str, run_at: DateTime<Utc>) {
        let mut state = self.state.write().await;
        if let Some(job) = state.jobs.iter_mut().find(|j| j.id == id) {
            job.state = JobState::Delayed;
            job.run_at = run_at;
            job.started_at = None;
            job.last_error = Some(error.to_string());
        }
    }

    /// Remove a waiting/delayed job. Active or finished jobs are left alone.
    pub async fn cancel(&self, queue: &str, id: Uuid) -> bool {
        let mut state = self.state.write().await;
        let before = state.jobs.len();
        state.jobs.retain(|j| {
            !(j.id == id
                && j.queue == queue
                && matches!(j.state, JobState::Waiting | JobState::Delayed))
        });
        state.jobs.len() < before
    }

    pub async fn counts(&self, queue: &str) -> [u64; 5] {
        let state = self.state.read().await;
        let mut counts = [0u64; 5];
        for job in state.jobs.iter().filter(|j| j.queue == queue) {
            let idx = match job.state {
                JobState::Waiting => 0,
                JobState::Active => 1,
                JobState::Completed => 2,
                JobState::Failed => 3,
                JobState::Delayed => 4,
            };
            counts[idx] += 1;
        }
        counts
    }

    pub async fn upsert_repeatable(&self, entry: MemRepeatable) {
        let mut state = self.state.write().await;
        if let Some(existing) = state.repeatables.iter_mut().find(|r| {
            r.queue == entry.queue
                && r.name == entry.name
                && r.pattern == entry.pattern
                && r.timezone == entry.timezone
        }) {
            existing.payload = entry.payload;
            return;
        }
        state.repeatables.push(entry);
    }

    pub async fn remove_repeatable(
        &self,
        queue: &str,
        name: &str,
        pattern: &str,
        timezone: &str,
    ) -> bool {
        let mut state = self.state.write().await;
        let before = state.repeatables.len();
        state.repeatables.retain(|r| {
            !(r.queue == queue && r.name == name && r.pattern == pattern && r.timezone == timezone)
        });
        state.repeatables.len() < before
    }

    pub async fn due_repeatables(&self, now: DateTime<Utc>) -> Vec<MemRepeatable> {
        let state = self.state.read().await;
        state
            .repeatables
            .iter()
            .filter(|r| r.next_fire_at <= now)
            .cloned()
            .collect()
    }

    pub async fn advance_repeatable(
        &self,
        queue: &str,
        name: &str,
        pattern: &str,
        timezone: &str,
        next_fire_at: DateTime<Utc>,
    ) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.repeatables.iter_mut().find(|r| {
            r.queue == queue && r.name == name && r.pattern == pattern && r.timezone == timezone
        }) {
            entry.next_fire_at = next_fire_at;
        }
    }

    fn prune(state: &mut MemoryState, queue: &str, job_state: JobState, keep: usize) {
        let mut finished: Vec<(DateTime<Utc>, Uuid)> = state
            .jobs
            .iter()
            .filter(|j| j.queue == queue && j.state == job_state)
            .map(|j| (j.finished_at.unwrap_or(j.created_at), j.id))
            .collect();
        if finished.len() <= keep {
            return;
        }
        finished.sort_by(|a, b| b.0.cmp(&a.0));
        let drop_ids: Vec<Uuid> = finished.into_iter().skip(keep).map(|(_, id)| id).collect();
        state.jobs.retain(|j| !drop_ids.contains(&j.id));
    }
}
