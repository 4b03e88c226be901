//! Scheduled-run fan-out: converts one cron-fired trigger job into concrete
//! runs and execution jobs, enforcing schedule policy.
//!
//! This is a pure decision function over the schedule plus its target; cron
//! timing itself lives in the queue's repeatable-job mechanism. Policy and
//! data problems come back as [`TriggerOutcome`] variants, never as errors;
//! only infrastructure failures propagate so the queue's retry engages.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::json;
use std::sync::Arc;
use testrig_models::{
    job_names, queues, EngineError, ExecutionJobPayload, NewRun, Recording, Run, RunConfig,
    RunConfigOverrides, RunStatus, RunType, Schedule, ScheduleStatus, Suite, Test, TriggeredBy,
};
use testrig_queue::{AddJobOptions, QueueManager};
use testrig_storage::Repository;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of processing one schedule trigger
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Triggered { run_id: Uuid, child_runs: usize },
    Skipped { reason: String },
    Error { message: String },
}

/// Target of a manually triggered run
#[derive(Debug, Clone, Copy)]
pub enum RunTarget {
    Test(Uuid),
    Suite(Uuid),
    Recording(Uuid),
}

pub struct ScheduledRunProcessor {
    repo: Arc<Repository>,
    queue: Arc<QueueManager>,
}

impl ScheduledRunProcessor {
    pub fn new(repo: Arc<Repository>, queue: Arc<QueueManager>) -> Self {
        Self { repo, queue }
    }

    /// Handle one cron-fired trigger for `schedule_id`. Eligibility checks
    /// run in order and short-circuit on the first failure.
    pub async fn process_trigger(&self, schedule_id: Uuid) -> Result<TriggerOutcome> {
        let now = Utc::now();

        let Some(mut schedule) = self.repo.schedule_by_id(schedule_id).await? else {
            return Ok(TriggerOutcome::Skipped {
                reason: "Schedule not found".to_string(),
            });
        };

        if schedule.status != ScheduleStatus::Active {
            return Ok(TriggerOutcome::Skipped {
                reason: format!("Schedule is {}", schedule.status.as_str()),
            });
        }

        if let Some(starts_at) = schedule.starts_at {
            if now < starts_at {
                return Ok(TriggerOutcome::Skipped {
                    reason: "Schedule has not started yet".to_string(),
                });
            }
        }

        if let Some(ends_at) = schedule.ends_at {
            if now > ends_at {
                // Self-healing: stop the pattern from re-triggering.
                schedule.status = ScheduleStatus::Disabled;
                self.repo.update_schedule(&schedule).await?;
                info!(schedule_id = %schedule.id, "Schedule past its end date, disabled");
                return Ok(TriggerOutcome::Skipped {
                    reason: "Schedule has ended".to_string(),
                });
            }
        }

        if let Some(max_daily) = schedule.max_daily_runs {
            if effective_runs_today(&schedule, now) >= max_daily {
                return Ok(TriggerOutcome::Skipped {
                    reason: format!("Daily run limit of {max_daily} reached"),
                });
            }
        }

        match schedule.target_type {
            RunType::Test => self.trigger_test(&mut schedule, now).await,
            RunType::Suite => self.trigger_suite(&mut schedule, now).await,
            RunType::Recording => self.trigger_recording(&mut schedule, now).await,
        }
    }

    async fn trigger_test(
        &self,
        schedule: &mut Schedule,
        now: DateTime<Utc>,
    ) -> Result<TriggerOutcome> {
        let Some(test_id) = schedule.test_id else {
            return Ok(TriggerOutcome::Error {
                message: "Schedule has no test target".to_string(),
            });
        };
        let Some(test) = self.repo.test_by_id(test_id).await? else {
            return Ok(TriggerOutcome::Error {
                message: format!("Test {test_id} not found"),
            });
        };
        if !test.has_recording() {
            return Ok(TriggerOutcome::Error {
                message: format!("Test {} has no recorded actions", test.name),
            });
        }

        let config = resolve_config(&schedule.overrides, test.config.as_ref());
        let run = self
            .launch_test_run(&test, &config, TriggeredBy::Schedule, Some(schedule.id), None)
            .await?;

        record_trigger(schedule, &run, RunStatus::Running, now);
        self.repo.update_schedule(schedule).await?;

        info!(schedule_id = %schedule.id, run_id = %run.id, test_id = %test.id, "Scheduled test run queued");
        Ok(TriggerOutcome::Triggered {
            run_id: run.id,
            child_runs: 0,
        })
    }

    async fn trigger_suite(
        &self,
        schedule: &mut Schedule,
        now: DateTime<Utc>,
    ) -> Result<TriggerOutcome> {
        let Some(suite_id) = schedule.suite_id else {
            return Ok(TriggerOutcome::Error {
                message: "Schedule has no suite target".to_string(),
            });
        };
        let Some(suite) = self.repo.suite_by_id(suite_id).await? else {
            return Ok(TriggerOutcome::Error {
                message: format!("Suite {suite_id} not found"),
            });
        };
        let tests = self.repo.tests_by_suite(suite_id).await?;
        if tests.is_empty() {
            return Ok(TriggerOutcome::Skipped {
                reason: format!("Suite {} has no active tests", suite.name),
            });
        }

        let (parent, children_queued) = self
            .launch_suite_runs(
                &suite,
                &tests,
                &schedule.overrides,
                TriggeredBy::Schedule,
                Some(schedule.id),
            )
            .await?;

        let status = if children_queued == 0 {
            RunStatus::Failed
        } else {
            RunStatus::Running
        };
        record_trigger(schedule, &parent, status, now);
        self.repo.update_schedule(schedule).await?;

        info!(
            schedule_id = %schedule.id,
            run_id = %parent.id,
            suite_id = %suite.id,
            children = children_queued,
            "Scheduled suite run queued"
        );
        Ok(TriggerOutcome::Triggered {
            run_id: parent.id,
            child_runs: children_queued,
        })
    }

    async fn trigger_recording(
        &self,
        schedule: &mut Schedule,
        now: DateTime<Utc>,
    ) -> Result<TriggerOutcome> {
        let Some(recording_id) = schedule.recording_id else {
            return Ok(TriggerOutcome::Error {
                message: "Schedule has no recording target".to_string(),
            });
        };
        let Some(recording) = self.repo.recording_by_id(recording_id).await? else {
            return Ok(TriggerOutcome::Error {
                message: format!("Recording {recording_id} not found"),
            });
        };

        let config = resolve_config(&schedule.overrides, None);
        let run = self
            .launch_recording_run(&recording, &config, TriggeredBy::Schedule, Some(schedule.id))
            .await?;

        record_trigger(schedule, &run, RunStatus::Running, now);
        self.repo.update_schedule(schedule).await?;

        info!(schedule_id = %schedule.id, run_id = %run.id, recording_id = %recording.id, "Scheduled recording run queued");
        Ok(TriggerOutcome::Triggered {
            run_id: run.id,
            child_runs: 0,
        })
    }

    /// Trigger a run directly from the API, bypassing schedule policy.
    pub async fn trigger_manual_run(
        &self,
        target: RunTarget,
        overrides: RunConfigOverrides,
    ) -> Result<Run, EngineError> {
        match target {
            RunTarget::Test(test_id) => {
                let test = self
                    .repo
                    .test_by_id(test_id)
                    .await
                    .map_err(internal)?
                    .ok_or(EngineError::TestNotFound {
                        id: test_id.to_string(),
                    })?;
                if !test.has_recording() {
                    return Err(EngineError::MissingRecording {
                        id: test_id.to_string(),
                    });
                }
                let config = resolve_config(&overrides, test.config.as_ref());
                self.launch_test_run(&test, &config, TriggeredBy::Manual, None, None)
                    .await
                    .map_err(internal)
            }
            RunTarget::Suite(suite_id) => {
                let suite = self
                    .repo
                    .suite_by_id(suite_id)
                    .await
                    .map_err(internal)?
                    .ok_or(EngineError::SuiteNotFound {
                        id: suite_id.to_string(),
                    })?;
                let tests = self.repo.tests_by_suite(suite_id).await.map_err(internal)?;
                if tests.is_empty() {
                    return Err(EngineError::InvalidRequest {
                        reason: format!("Suite {} has no active tests", suite.name),
                    });
                }
                let (parent, _) = self
                    .launch_suite_runs(&suite, &tests, &overrides, TriggeredBy::Manual, None)
                    .await
                    .map_err(internal)?;
                Ok(parent)
            }
            RunTarget::Recording(recording_id) => {
                let recording = self
                    .repo
                    .recording_by_id(recording_id)
                    .await
                    .map_err(internal)?
                    .ok_or(EngineError::RecordingNotFound {
                        id: recording_id.to_string(),
                    })?;
                let config = resolve_config(&overrides, None);
                self.launch_recording_run(&recording, &config, TriggeredBy::Manual, None)
                    .await
                    .map_err(internal)
            }
        }
    }

    /// Register a schedule's cron trigger with the queue (idempotent).
    pub async fn register_schedule(&self, schedule: &Schedule) -> Result<()> {
        self.queue
            .add_repeatable_job(
                queues::SCHEDULED,
                job_names::SCHEDULE_TRIGGER,
                json!({ "schedule_id": schedule.id }),
                &schedule.cron_expression,
                schedule.timezone.as_deref(),
            )
            .await
            .with_context(|| format!("Failed to register schedule {}", schedule.id))
    }

    pub async fn unregister_schedule(&self, schedule: &Schedule) -> Result<bool> {
        self.queue
            .remove_repeatable_job(
                queues::SCHEDULED,
                job_names::SCHEDULE_TRIGGER,
                &schedule.cron_expression,
                schedule.timezone.as_deref(),
            )
            .await
            .with_context(|| format!("Failed to unregister schedule {}", schedule.id))
    }

    /// Create a test run plus its pending browser-result rows and enqueue
    /// exactly one execution job carrying the full browser list. The job is
    /// keyed by the run id, so a duplicate dispatch attempt is a no-op at
    /// the queue layer.
    async fn launch_test_run(
        &self,
        test: &Test,
        config: &RunConfig,
        triggered_by: TriggeredBy,
        schedule_id: Option<Uuid>,
        parent_run_id: Option<Uuid>,
    ) -> Result<Run> {
        let total_actions = test.recording.as_ref().map(|r| r.total_actions).unwrap_or(0);
        let mut run = self
            .repo
            .create_run(NewRun {
                user_id: test.user_id,
                project_id: test.project_id,
                run_type: RunType::Test,
                recording_id: None,
                test_id: Some(test.id),
                suite_id: test.suite_id,
                parent_run_id,
                triggered_by,
                schedule_id,
                browsers: config.browsers.clone(),
                actions_total: total_actions,
            })
            .await?;

        self.repo
            .create_browser_results(run.id, &config.browsers)
            .await?;

        let mut payload = ExecutionJobPayload::from_config(test.user_id, run.id, RunType::Test, config);
        payload.test_id = Some(test.id);
        payload.suite_id = test.suite_id;

        let handle = self
            .queue
            .add_job(
                queues::EXECUTION,
                job_names::EXECUTE_RUN,
                serde_json::to_value(&payload)?,
                AddJobOptions {
                    job_id: Some(run.id.to_string()),
                    ..Default::default()
                },
            )
            .await?;

        run.job_id = Some(handle.id);
        run.queue_name = Some(queues::EXECUTION.to_string());
        self.repo.update_run(&run).await?;

        Ok(run)
    }

    /// Create the aggregate parent run, then one child run per test with
    /// recording data. Children launch sequentially so browser-result and
    /// run creation ordering stays deterministic; per-child failures are
    /// logged and do not stop the rest.
    async fn launch_suite_runs(
        &self,
        suite: &Suite,
        tests: &[Test],
        overrides: &RunConfigOverrides,
        triggered_by: TriggeredBy,
        schedule_id: Option<Uuid>,
    ) -> Result<(Run, usize)> {
        let mut parent = self
            .repo
            .create_run(NewRun {
                user_id: suite.user_id,
                project_id: suite.project_id,
                run_type: RunType::Suite,
                recording_id: None,
                test_id: None,
                suite_id: Some(suite.id),
                parent_run_id: None,
                triggered_by,
                schedule_id,
                browsers: Vec::new(),
                actions_total: 0,
            })
            .await?;

        let mut children_queued = 0;
        for test in tests {
            if !test.has_recording() {
                info!(suite_id = %suite.id, test_id = %test.id, test = %test.name, "Skipping test without recorded actions");
                continue;
            }
            let config = resolve_config(overrides, test.config.as_ref());
            match self
                .launch_test_run(test, &config, triggered_by, schedule_id, Some(parent.id))
                .await
            {
                Ok(_) => children_queued += 1,
                Err(e) => {
                    warn!(suite_id = %suite.id, test_id = %test.id, error = %format!("{e:#}"), "Failed to queue suite test");
                }
            }
        }

        let now = Utc::now();
        if children_queued == 0 {
            parent.status = RunStatus::Failed;
            parent.error_message = Some("No tests in the suite could be queued".to_string());
            parent.completed_at = Some(now);
        } else {
            parent.status = RunStatus::Running;
            parent.started_at = Some(now);
        }
        self.repo.update_run(&parent).await?;

        Ok((parent, children_queued))
    }

    /// Legacy path for schedules created before multi-browser/test support:
    /// a single run, no browser-result rows, first configured browser only.
    async fn launch_recording_run(
        &self,
        recording: &Recording,
        config: &RunConfig,
        triggered_by: TriggeredBy,
        schedule_id: Option<Uuid>,
    ) -> Result<Run> {
        let browser = config
            .browsers
            .first()
            .cloned()
            .or_else(|| recording.browser.clone())
            .unwrap_or_else(|| "chromium".to_string());

        let mut run = self
            .repo
            .create_run(NewRun {
                user_id: recording.user_id,
                project_id: recording.project_id,
                run_type: RunType::Recording,
                recording_id: Some(recording.id),
                test_id: None,
                suite_id: None,
                parent_run_id: None,
                triggered_by,
                schedule_id,
                browsers: vec![browser.clone()],
                actions_total: recording.total_actions,
            })
            .await?;

        let mut payload =
            ExecutionJobPayload::from_config(recording.user_id, run.id, RunType::Recording, config);
        payload.recording_id = Some(recording.id);
        payload.browsers = vec![browser];

        let handle = self
            .queue
            .add_job(
                queues::EXECUTION,
                job_names::EXECUTE_RUN,
                serde_json::to_value(&payload)?,
                AddJobOptions {
                    job_id: Some(run.id.to_string()),
                    ..Default::default()
                },
            )
            .await?;

        run.job_id = Some(handle.id);
        run.queue_name = Some(queues::EXECUTION.to_string());
        self.repo.update_run(&run).await?;

        Ok(run)
    }
}

fn internal(err: anyhow::Error) -> EngineError {
    EngineError::InternalError {
        reason: err.to_string(),
    }
}

/// Merge precedence: schedule overrides > the test's saved config > hard
/// defaults (headless, 60s timeout, screenshots on failure).
fn resolve_config(overrides: &RunConfigOverrides, test_config: Option<&RunConfigOverrides>) -> RunConfig {
    let base = match test_config {
        Some(config) => config.apply(RunConfig::default()),
        None => RunConfig::default(),
    };
    overrides.apply(base)
}

/// `runs_today` only counts if the last run happened on the same calendar
/// day in the schedule's timezone; otherwise the counter has gone stale
/// and resets.
fn effective_runs_today(schedule: &Schedule, now: DateTime<Utc>) -> u32 {
    match schedule.last_run_at {
        Some(last) if same_schedule_day(schedule, last, now) => schedule.runs_today,
        _ => 0,
    }
}

fn same_schedule_day(schedule: &Schedule, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    let tz: Tz = schedule
        .timezone
        .as_deref()
        .and_then(|t| t.parse().ok())
        .unwrap_or(chrono_tz::UTC);
    a.with_timezone(&tz).date_naive() == b.with_timezone(&tz).date_naive()
}

fn record_trigger(schedule: &mut Schedule, run: &Run, status: RunStatus, now: DateTime<Utc>) {
    schedule.runs_today = effective_runs_today(schedule, now) + 1;
    schedule.total_runs += 1;
    schedule.last_run_id = Some(run.id);
    schedule.last_run_at = Some(now);
    schedule.last_run_status = Some(status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use testrig_models::RecordingData;
    use testrig_queue::QueueSettings;

    async fn setup() -> (Arc<Repository>, Arc<QueueManager>, ScheduledRunProcessor) {
        let repo = Arc::new(Repository::in_memory());
        let queue = Arc::new(QueueManager::new(QueueSettings::standard(), None));
        queue.initialize().await.unwrap();
        let processor = ScheduledRunProcessor::new(repo.clone(), queue.clone());
        (repo, queue, processor)
    }

    fn sample_test(suite_id: Option<Uuid>, with_recording: bool) -> Test {
        Test {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            suite_id,
            name: "login flow".to_string(),
            active: true,
            config: None,
            recording: with_recording.then(|| RecordingData {
                total_actions: 5,
                actions: serde_json::json!([]),
            }),
            created_at: Utc::now(),
        }
    }

    fn sample_schedule() -> Schedule {
        Schedule {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: "nightly".to_string(),
            cron_expression: "0 3 * * *".to_string(),
            timezone: None,
            target_type: RunType::Test,
            recording_id: None,
            test_id: None,
            suite_id: None,
            overrides: RunConfigOverrides::default(),
            starts_at: None,
            ends_at: None,
            max_daily_runs: None,
            status: ScheduleStatus::Active,
            runs_today: 0,
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            last_run_id: None,
            last_run_at: None,
            last_run_status: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn execution_waiting(queue: &QueueManager) -> u64 {
        queue.queue_status(queues::EXECUTION).await.unwrap().waiting
    }

    #[tokio::test]
    async fn missing_schedule_is_skipped() {
        let (_, _, processor) = setup().await;
        let outcome = processor.process_trigger(Uuid::new_v4()).await.unwrap();
        assert_eq!(
            outcome,
            TriggerOutcome::Skipped {
                reason: "Schedule not found".to_string()
            }
        );
    }

    #[tokio::test]
    async fn inactive_schedule_never_creates_a_run() {
        let (repo, queue, processor) = setup().await;
        let test = sample_test(None, true);
        let mut schedule = sample_schedule();
        schedule.test_id = Some(test.id);
        schedule.status = ScheduleStatus::Paused;
        repo.insert_test(test).await.unwrap();
        repo.insert_schedule(schedule.clone()).await.unwrap();

        let outcome = processor.process_trigger(schedule.id).await.unwrap();
        assert!(matches!(outcome, TriggerOutcome::Skipped { .. }));
        assert_eq!(execution_waiting(&queue).await, 0);

        let after = repo.schedule_by_id(schedule.id).await.unwrap().unwrap();
        assert_eq!(after.total_runs, 0);
        assert!(after.last_run_id.is_none());
    }

    #[tokio::test]
    async fn schedule_before_its_window_is_skipped() {
        let (repo, queue, processor) = setup().await;
        let test = sample_test(None, true);
        let mut schedule = sample_schedule();
        schedule.test_id = Some(test.id);
        schedule.starts_at = Some(Utc::now() + Duration::hours(1));
        repo.insert_test(test).await.unwrap();
        repo.insert_schedule(schedule.clone()).await.unwrap();

        let outcome = processor.process_trigger(schedule.id).await.unwrap();
        assert_eq!(
            outcome,
            TriggerOutcome::Skipped {
                reason: "Schedule has not started yet".to_string()
            }
        );
        assert_eq!(execution_waiting(&queue).await, 0);
    }

    #[tokio::test]
    async fn expired_schedule_disables_itself_and_creates_no_run() {
        let (repo, queue, processor) = setup().await;
        let test = sample_test(None, true);
        let mut schedule = sample_schedule();
        schedule.test_id = Some(test.id);
        schedule.ends_at = Some(Utc::now() - Duration::hours(1));
        repo.insert_test(test).await.unwrap();
        repo.insert_schedule(schedule.clone()).await.unwrap();

        let outcome = processor.process_trigger(schedule.id).await.unwrap();
        assert!(matches!(outcome, TriggerOutcome::Skipped { .. }));
        assert_eq!(execution_waiting(&queue).await, 0);

        let after = repo.schedule_by_id(schedule.id).await.unwrap().unwrap();
        assert_eq!(after.status, ScheduleStatus::Disabled);
    }

    #[tokio::test]
    async fn daily_quota_blocks_at_the_limit_and_allows_below_it() {
        let (repo, queue, processor) = setup().await;
        let test = sample_test(None, true);
        let mut schedule = sample_schedule();
        schedule.test_id = Some(test.id);
        schedule.max_daily_runs = Some(3);
        schedule.runs_today = 3;
        schedule.last_run_at = Some(Utc::now());
        repo.insert_test(test).await.unwrap();
        repo.insert_schedule(schedule.clone()).await.unwrap();

        let outcome = processor.process_trigger(schedule.id).await.unwrap();
        assert_eq!(
            outcome,
            TriggerOutcome::Skipped {
                reason: "Daily run limit of 3 reached".to_string()
            }
        );
        assert_eq!(execution_waiting(&queue).await, 0);

        let mut below = repo.schedule_by_id(schedule.id).await.unwrap().unwrap();
        below.runs_today = 2;
        repo.update_schedule(&below).await.unwrap();

        let outcome = processor.process_trigger(schedule.id).await.unwrap();
        assert!(matches!(outcome, TriggerOutcome::Triggered { .. }));
        let after = repo.schedule_by_id(schedule.id).await.unwrap().unwrap();
        assert_eq!(after.runs_today, 3);
    }

    #[tokio::test]
    async fn stale_daily_counter_resets_on_a_new_day() {
        let mut schedule = sample_schedule();
        schedule.runs_today = 7;
        schedule.last_run_at = Some(Utc::now() - Duration::days(2));
        assert_eq!(effective_runs_today(&schedule, Utc::now()), 0);

        schedule.last_run_at = Some(Utc::now());
        assert_eq!(effective_runs_today(&schedule, Utc::now()), 7);
    }

    #[tokio::test]
    async fn test_trigger_creates_run_results_and_job() {
        let (repo, queue, processor) = setup().await;
        let test = sample_test(None, true);
        let mut schedule = sample_schedule();
        schedule.test_id = Some(test.id);
        repo.insert_test(test.clone()).await.unwrap();
        repo.insert_schedule(schedule.clone()).await.unwrap();

        let outcome = processor.process_trigger(schedule.id).await.unwrap();
        let TriggerOutcome::Triggered { run_id, child_runs } = outcome else {
            panic!("expected a triggered outcome, got {outcome:?}");
        };
        assert_eq!(child_runs, 0);

        let run = repo.run_by_id(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.run_type, RunType::Test);
        assert_eq!(run.triggered_by, TriggeredBy::Schedule);
        assert_eq!(run.schedule_id, Some(schedule.id));
        assert_eq!(run.actions_total, 5);
        assert!(run.job_id.is_some());
        assert_eq!(run.queue_name.as_deref(), Some(queues::EXECUTION));

        let results = repo.browser_results_for_run(run_id).await.unwrap();
        assert_eq!(results.len(), run.browsers.len());
        assert_eq!(execution_waiting(&queue).await, 1);

        let after = repo.schedule_by_id(schedule.id).await.unwrap().unwrap();
        assert_eq!(after.last_run_id, Some(run_id));
        assert_eq!(after.last_run_status, Some(RunStatus::Running));
        assert_eq!(after.runs_today, 1);
        assert_eq!(after.total_runs, 1);
    }

    #[tokio::test]
    async fn test_without_recording_is_a_data_error() {
        let (repo, queue, processor) = setup().await;
        let test = sample_test(None, false);
        let mut schedule = sample_schedule();
        schedule.test_id = Some(test.id);
        repo.insert_test(test).await.unwrap();
        repo.insert_schedule(schedule.clone()).await.unwrap();

        let outcome = processor.process_trigger(schedule.id).await.unwrap();
        assert!(matches!(outcome, TriggerOutcome::Error { .. }));
        assert_eq!(execution_waiting(&queue).await, 0);
    }

    #[tokio::test]
    async fn suite_fanout_tags_children_with_the_parent() {
        let (repo, queue, processor) = setup().await;
        let suite = Suite {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: "smoke".to_string(),
            created_at: Utc::now(),
        };
        repo.insert_suite(suite.clone()).await.unwrap();
        repo.insert_test(sample_test(Some(suite.id), true)).await.unwrap();
        repo.insert_test(sample_test(Some(suite.id), true)).await.unwrap();
        repo.insert_test(sample_test(Some(suite.id), false)).await.unwrap();

        let mut schedule = sample_schedule();
        schedule.target_type = RunType::Suite;
        schedule.suite_id = Some(suite.id);
        repo.insert_schedule(schedule.clone()).await.unwrap();

        let outcome = processor.process_trigger(schedule.id).await.unwrap();
        let TriggerOutcome::Triggered { run_id, child_runs } = outcome else {
            panic!("expected a triggered outcome, got {outcome:?}");
        };
        assert_eq!(child_runs, 2);

        let parent = repo.run_by_id(run_id).await.unwrap().unwrap();
        assert_eq!(parent.run_type, RunType::Suite);
        assert_eq!(parent.status, RunStatus::Running);
        assert!(parent.started_at.is_some());

        let children = repo.runs_by_parent(run_id).await.unwrap();
        assert_eq!(children.len(), 2);
        for child in &children {
            assert_eq!(child.parent_run_id, Some(run_id));
            assert_eq!(child.run_type, RunType::Test);
            assert!(child.job_id.is_some());
        }
        assert_eq!(execution_waiting(&queue).await, 2);

        let after = repo.schedule_by_id(schedule.id).await.unwrap().unwrap();
        assert_eq!(after.last_run_id, Some(run_id));
    }

    #[tokio::test]
    async fn suite_with_no_runnable_tests_fails_the_parent() {
        let (repo, queue, processor) = setup().await;
        let suite = Suite {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: "empty recordings".to_string(),
            created_at: Utc::now(),
        };
        repo.insert_suite(suite.clone()).await.unwrap();
        repo.insert_test(sample_test(Some(suite.id), false)).await.unwrap();

        let mut schedule = sample_schedule();
        schedule.target_type = RunType::Suite;
        schedule.suite_id = Some(suite.id);
        repo.insert_schedule(schedule.clone()).await.unwrap();

        let outcome = processor.process_trigger(schedule.id).await.unwrap();
        let TriggerOutcome::Triggered { run_id, child_runs } = outcome else {
            panic!("expected a triggered outcome, got {outcome:?}");
        };
        assert_eq!(child_runs, 0);

        let parent = repo.run_by_id(run_id).await.unwrap().unwrap();
        assert_eq!(parent.status, RunStatus::Failed);
        assert!(parent.completed_at.is_some());
        assert_eq!(execution_waiting(&queue).await, 0);
    }

    #[tokio::test]
    async fn empty_suite_is_skipped() {
        let (repo, _, processor) = setup().await;
        let suite = Suite {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: "empty".to_string(),
            created_at: Utc::now(),
        };
        repo.insert_suite(suite.clone()).await.unwrap();

        let mut schedule = sample_schedule();
        schedule.target_type = RunType::Suite;
        schedule.suite_id = Some(suite.id);
        repo.insert_schedule(schedule.clone()).await.unwrap();

        let outcome = processor.process_trigger(schedule.id).await.unwrap();
        assert!(matches!(outcome, TriggerOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn recording_trigger_stays_single_browser() {
        let (repo, queue, processor) = setup().await;
        let recording = Recording {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: "legacy capture".to_string(),
            browser: Some("firefox".to_string()),
            total_actions: 3,
            actions: serde_json::json!([]),
            created_at: Utc::now(),
        };
        repo.insert_recording(recording.clone()).await.unwrap();

        let mut schedule = sample_schedule();
        schedule.target_type = RunType::Recording;
        schedule.recording_id = Some(recording.id);
        schedule.overrides.browsers = Some(vec![
            "chromium".to_string(),
            "firefox".to_string(),
            "webkit".to_string(),
        ]);
        repo.insert_schedule(schedule.clone()).await.unwrap();

        let outcome = processor.process_trigger(schedule.id).await.unwrap();
        let TriggerOutcome::Triggered { run_id, .. } = outcome else {
            panic!("expected a triggered outcome, got {outcome:?}");
        };

        let run = repo.run_by_id(run_id).await.unwrap().unwrap();
        assert_eq!(run.run_type, RunType::Recording);
        assert_eq!(run.browsers, vec!["chromium".to_string()]);
        assert!(repo.browser_results_for_run(run_id).await.unwrap().is_empty());
        assert_eq!(execution_waiting(&queue).await, 1);
    }

    #[tokio::test]
    async fn schedule_registration_round_trips_through_the_queue() {
        let (_, _, processor) = setup().await;
        let mut schedule = sample_schedule();
        schedule.timezone = Some("Europe/Berlin".to_string());

        processor.register_schedule(&schedule).await.unwrap();
        // Re-registration is idempotent.
        processor.register_schedule(&schedule).await.unwrap();

        assert!(processor.unregister_schedule(&schedule).await.unwrap());
        assert!(!processor.unregister_schedule(&schedule).await.unwrap());
    }

    #[tokio::test]
    async fn manual_trigger_reports_missing_targets() {
        let (_, _, processor) = setup().await;
        let err = processor
            .trigger_manual_run(RunTarget::Test(Uuid::new_v4()), RunConfigOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TestNotFound { .. }));
    }

    #[test]
    fn config_merge_prefers_schedule_overrides_over_test_config() {
        let test_config = RunConfigOverrides {
            browsers: Some(vec!["firefox".to_string()]),
            timeout_ms: Some(120_000),
            ..Default::default()
        };
        let schedule_overrides = RunConfigOverrides {
            browsers: Some(vec!["webkit".to_string()]),
            ..Default::default()
        };

        let resolved = resolve_config(&schedule_overrides, Some(&test_config));
        assert_eq!(resolved.browsers, vec!["webkit".to_string()]);
        assert_eq!(resolved.timeout_ms, 120_000);
        assert!(resolved.headless);
    }
}
