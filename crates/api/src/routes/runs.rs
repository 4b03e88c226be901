use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use testrig_models::{BrowserResult, EngineError, Run, RunConfigOverrides, RunStatus, RunType};
use testrig_orchestrator::RunTarget;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Create runs router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/api/runs", post(trigger_run))
        .route("/api/runs/:id", get(get_run))
        .route("/api/runs/:id/cancel", post(cancel_run))
}

/// Manual trigger request: exactly one target, plus optional config
/// overrides layered over the target's saved configuration.
#[derive(Debug, Deserialize)]
pub struct TriggerRunRequest {
    pub test_id: Option<Uuid>,
    pub suite_id: Option<Uuid>,
    pub recording_id: Option<Uuid>,
    #[serde(flatten)]
    pub overrides: RunConfigOverrides,
}

#[derive(Debug, Serialize)]
pub struct RunDetailResponse {
    pub run: Run,
    pub browser_results: Vec<BrowserResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub child_runs: Vec<Run>,
    /// Pub/sub channel streaming this run's progress events, when the
    /// publisher is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_channel: Option<String>,
}

/// Queue a run on demand. Shares the run-creation path with the scheduled
/// fan-out processor; only the trigger attribution differs.
pub async fn trigger_run(
    State(state): State<AppState>,
    Json(req): Json<TriggerRunRequest>,
) -> ApiResult<(StatusCode, Json<Run>)> {
    let target = match (req.test_id, req.suite_id, req.recording_id) {
        (Some(id), None, None) => RunTarget::Test(id),
        (None, Some(id), None) => RunTarget::Suite(id),
        (None, None, Some(id)) => RunTarget::Recording(id),
        _ => {
            return Err(EngineError::InvalidRequest {
                reason: "Exactly one of test_id, suite_id, recording_id is required".to_string(),
            }
            .into())
        }
    };

    let run = state
        .runs
        .trigger_manual_run(target, req.overrides)
        .await
        .map_err(ApiError)?;

    info!(run_id = %run.id, run_type = run.run_type.as_str(), "Manual run queued");
    Ok((StatusCode::CREATED, Json(run)))
}

/// Run lookup with per-browser results and, for suites, the child runs.
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunDetailResponse>> {
    let run = state
        .repo
        .run_by_id(id)
        .await
        .map_err(internal)?
        .ok_or(EngineError::RunNotFound { id: id.to_string() })?;

    let browser_results = state
        .repo
        .browser_results_for_run(id)
        .await
        .map_err(internal)?;
    let child_runs = if run.run_type == RunType::Suite {
        state.repo.runs_by_parent(id).await.map_err(internal)?
    } else {
        Vec::new()
    };
    let progress_channel = state.progress.as_ref().map(|p| p.channel(id));

    Ok(Json(RunDetailResponse {
        run,
        browser_results,
        child_runs,
        progress_channel,
    }))
}

/// Cooperative cancellation: a still-queued execution job is removed from
/// the queue outright; an active one keeps running until its worker
/// observes the cancelled status.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Run>> {
    let mut run = state
        .repo
        .run_by_id(id)
        .await
        .map_err(internal)?
        .ok_or(EngineError::RunNotFound { id: id.to_string() })?;

    if run.status.is_terminal() {
        return Err(EngineError::InvalidRequest {
            reason: format!("Run is already {}", run.status.as_str()),
        }
        .into());
    }

    if let (Some(job_id), Some(queue_name)) = (run.job_id, run.queue_name.clone()) {
        let removed = state
            .queue
            .cancel_job(&queue_name, job_id)
            .await
            .map_err(|e| EngineError::QueueError {
                reason: e.to_string(),
            })?;
        info!(run_id = %run.id, job_id = %job_id, removed, "Run cancellation requested");
    }

    run.status = RunStatus::Cancelled;
    run.completed_at = Some(Utc::now());
    state.repo.update_run(&run).await.map_err(internal)?;

    Ok(Json(run))
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError(EngineError::DatabaseError {
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use testrig_config::AppConfig;
    use testrig_models::{RecordingData, Test};
    use testrig_orchestrator::ScheduledRunProcessor;
    use testrig_queue::{QueueManager, QueueSettings};
    use testrig_storage::Repository;

    async fn test_state() -> AppState {
        let repo = Arc::new(Repository::in_memory());
        let queue = Arc::new(QueueManager::new(QueueSettings::standard(), None));
        queue.initialize().await.unwrap();
        let runs = Arc::new(ScheduledRunProcessor::new(repo.clone(), queue.clone()));
        AppState {
            repo,
            queue,
            runs,
            progress: None,
            config: Arc::new(AppConfig::default()),
        }
    }

    fn sample_test() -> Test {
        Test {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            suite_id: None,
            name: "checkout flow".to_string(),
            active: true,
            config: None,
            recording: Some(RecordingData {
                total_actions: 4,
                actions: serde_json::json!([]),
            }),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn manual_trigger_creates_run_and_execution_job() {
        let state = test_state().await;
        let test = sample_test();
        state.repo.insert_test(test.clone()).await.unwrap();

        let (status, Json(run)) = trigger_run(
            State(state.clone()),
            Json(TriggerRunRequest {
                test_id: Some(test.id),
                suite_id: None,
                recording_id: None,
                overrides: RunConfigOverrides::default(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(run.status, RunStatus::Queued);
        assert!(run.job_id.is_some());
        let counts = state.queue.queue_status("execution").await.unwrap();
        assert_eq!(counts.waiting, 1);

        let Json(detail) = get_run(State(state), Path(run.id)).await.unwrap();
        assert_eq!(detail.run.id, run.id);
        assert_eq!(detail.browser_results.len(), 1);
        assert!(detail.child_runs.is_empty());
    }

    #[tokio::test]
    async fn trigger_requires_exactly_one_target() {
        let state = test_state().await;
        let err = trigger_run(
            State(state),
            Json(TriggerRunRequest {
                test_id: Some(Uuid::new_v4()),
                suite_id: Some(Uuid::new_v4()),
                recording_id: None,
                overrides: RunConfigOverrides::default(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, EngineError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let state = test_state().await;
        let err = get_run(State(state), Path(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err.0, EngineError::RunNotFound { .. }));
    }

    #[tokio::test]
    async fn cancel_removes_queued_job_and_flips_status() {
        let state = test_state().await;
        let test = sample_test();
        state.repo.insert_test(test.clone()).await.unwrap();

        let (_, Json(run)) = trigger_run(
            State(state.clone()),
            Json(TriggerRunRequest {
                test_id: Some(test.id),
                suite_id: None,
                recording_id: None,
                overrides: RunConfigOverrides::default(),
            }),
        )
        .await
        .unwrap();

        let Json(cancelled) = cancel_run(State(state.clone()), Path(run.id)).await.unwrap();
        assert_eq!(cancelled.status, RunStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());
        let counts = state.queue.queue_status("execution").await.unwrap();
        assert_eq!(counts.waiting, 0);

        // A second cancel hits the terminal-status guard.
        let err = cancel_run(State(state), Path(run.id)).await.unwrap_err();
        assert!(matches!(err.0, EngineError::InvalidRequest { .. }));
    }
}
