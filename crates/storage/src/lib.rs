//! Repository facade over run/schedule/catalog state.
//!
//! The orchestration layer reads and writes through this facade and treats
//! its return values as the source of truth; it never caches run state
//! across calls. Backed by PostgreSQL when a pool is configured (the
//! product's CRUD layer owns the schema), by process-local memory
//! otherwise — the in-memory mode is what the test suites run against.

use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

mod rows;
pub use rows::*;

use testrig_models::{
    BrowserResult, BrowserResultStatus, NewRun, Recording, Run, RunStatus, Schedule,
    ScheduleStatus, Suite, Test, TriggeredBy,
};

#[derive(Default)]
struct MemoryStore {
    runs: HashMap<Uuid, Run>,
    browser_results: Vec<BrowserResult>,
    schedules: HashMap<Uuid, Schedule>,
    tests: HashMap<Uuid, Test>,
    suites: HashMap<Uuid, Suite>,
    recordings: HashMap<Uuid, Recording>,
}

/// Repository facade service
pub struct Repository {
    pool: Option<Arc<PgPool>>,
    memory: RwLock<MemoryStore>,
}

impl Repository {
    /// Connect to PostgreSQL. The product's migrations are expected to have
    /// created the runs/schedules/catalog tables already.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;
        info!("Repository connected to PostgreSQL");
        Ok(Self::with_pool(Arc::new(pool)))
    }

    pub fn with_pool(pool: Arc<PgPool>) -> Self {
        Self {
            pool: Some(pool),
            memory: RwLock::new(MemoryStore::default()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            pool: None,
            memory: RwLock::new(MemoryStore::default()),
        }
    }

    pub fn pool(&self) -> Option<Arc<PgPool>> {
        self.pool.clone()
    }

    // ---- runs ----

    pub async fn create_run(&self, new_run: NewRun) -> Result<Run> {
        let now = Utc::now();
        let run = Run {
            id: Uuid::new_v4(),
            user_id: new_run.user_id,
            project_id: new_run.project_id,
            run_type: new_run.run_type,
            recording_id: new_run.recording_id,
            test_id: new_run.test_id,
            suite_id: new_run.suite_id,
            parent_run_id: new_run.parent_run_id,
            status: RunStatus::Queued,
            triggered_by: new_run.triggered_by,
            schedule_id: new_run.schedule_id,
            browsers: new_run.browsers,
            actions_total: new_run.actions_total,
            actions_executed: 0,
            actions_failed: 0,
            actions_skipped: 0,
            job_id: None,
            queue_name: None,
            error_message: None,
            video_path: None,
            screenshot_paths: Vec::new(),
            created_at: now,
            started_at: None,
            completed_at: None,
        };

        if let Some(pool) = &self.pool {
            sqlx::query(
                r#"
                INSERT INTO runs (
                    id, user_id, project_id, run_type, recording_id, test_id, suite_id,
                    parent_run_id, status, triggered_by, schedule_id, browsers,
                    actions_total, actions_executed, actions_failed, actions_skipped,
                    screenshot_paths, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 0, 0, 0, $14, $15)
                "#,
            )
            .bind(run.id)
            .bind(run.user_id)
            .bind(run.project_id)
            .bind(run.run_type.as_str())
            .bind(run.recording_id)
            .bind(run.test_id)
            .bind(run.suite_id)
            .bind(run.parent_run_id)
            .bind(run.status.as_str())
            .bind(run.triggered_by.as_str())
            .bind(run.schedule_id)
            .bind(&run.browsers)
            .bind(run.actions_total as i32)
            .bind(&run.screenshot_paths)
            .bind(run.created_at)
            .execute(pool.as_ref())
            .await?;
        } else {
            let mut memory = self.memory.write().await;
            memory.runs.insert(run.id, run.clone());
        }

        Ok(run)
    }

    pub async fn run_by_id(&self, id: Uuid) -> Result<Option<Run>> {
        if let Some(pool) = &self.pool {
            let row = sqlx::query_as::<_, RunRow>(
                r#"
                SELECT id, user_id, project_id, run_type, recording_id, test_id, suite_id,
                       parent_run_id, status, triggered_by, schedule_id, browsers,
                       actions_total, actions_executed, actions_failed, actions_skipped,
                       job_id, queue_name, error_message, video_path, screenshot_paths,
                       created_at, started_at, completed_at
                FROM runs WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(pool.as_ref())
            .await?;
            Ok(row.map(|r| r.into()))
        } else {
            let memory = self.memory.read().await;
            Ok(memory.runs.get(&id).cloned())
        }
    }

    /// Write back every mutable field of the run.
    pub async fn update_run(&self, run: &Run) -> Result<()> {
        if let Some(pool) = &self.pool {
            sqlx::query(
                r#"
                UPDATE runs
                SET status = $2, actions_executed = $3, actions_failed = $4,
                    actions_skipped = $5, job_id = $6, queue_name = $7,
                    error_message = $8, video_path = $9, screenshot_paths = $10,
                    started_at = $11, completed_at = $12
                WHERE id = $1
                "#,
            )
            .bind(run.id)
            .bind(run.status.as_str())
            .bind(run.actions_executed as i32)
            .bind(run.actions_failed as i32)
            .bind(run.actions_skipped as i32)
            .bind(run.job_id)
            .bind(&run.queue_name)
            .bind(&run.error_message)
            .bind(&run.video_path)
            .bind(&run.screenshot_paths)
            .bind(run.started_at)
            .bind(run.completed_at)
            .execute(pool.as_ref())
            .await?;
        } else {
            let mut memory = self.memory.write().await;
            memory.runs.insert(run.id, run.clone());
        }
        Ok(())
    }

    pub async fn runs_by_parent(&self, parent_run_id: Uuid) -> Result<Vec<Run>> {
        if let Some(pool) = &self.pool {
            let rows = sqlx::query_as::<_, RunRow>(
                r#"
                SELECT id, user_id, project_id, run_type, recording_id, test_id, suite_id,
                       parent_run_id, status, triggered_by, schedule_id, browsers,
                       actions_total, actions_executed, actions_failed, actions_skipped,
                       job_id, queue_name, error_message, video_path, screenshot_paths,
                       created_at, started_at, completed_at
                FROM runs WHERE parent_run_id = $1
                ORDER BY created_at ASC
                "#,
            )
            .bind(parent_run_id)
            .fetch_all(pool.as_ref())
            .await?;
            Ok(rows.into_iter().map(|r| r.into()).collect())
        } else {
            let memory = self.memory.read().await;
            let mut runs: Vec<Run> = memory
                .runs
                .values()
                .filter(|r| r.parent_run_id == Some(parent_run_id))
                .cloned()
                .collect();
            runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(runs)
        }
    }

    /// Runs still `running` whose worker went quiet for longer than
    /// `timeout_ms`.
    pub async fn find_orphaned_runs(&self, timeout_ms: u64) -> Result<Vec<Run>> {
        let cutoff = Utc::now() - ChronoDuration::milliseconds(timeout_ms as i64);
        if let Some(pool) = &self.pool {
            let rows = sqlx::query_as::<_, RunRow>(
                r#"
                SELECT id, user_id, project_id, run_type, recording_id, test_id, suite_id,
                       parent_run_id, status, triggered_by, schedule_id, browsers,
                       actions_total, actions_executed, actions_failed, actions_skipped,
                       job_id, queue_name, error_message, video_path, screenshot_paths,
                       created_at, started_at, completed_at
                FROM runs
                WHERE status = 'running' AND started_at IS NOT NULL AND started_at < $1
                "#,
            )
            .bind(cutoff)
            .fetch_all(pool.as_ref())
            .await?;
            Ok(rows.into_iter().map(|r| r.into()).collect())
        } else {
            let memory = self.memory.read().await;
            Ok(memory
                .runs
                .values()
                .filter(|r| {
                    r.status == RunStatus::Running
                        && r.started_at.map(|t| t < cutoff).unwrap_or(false)
                })
                .cloned()
                .collect())
        }
    }

    /// Bulk-create pending per-browser result rows for a run.
    pub async fn create_browser_results(
        &self,
        run_id: Uuid,
        browsers: &[String],
    ) -> Result<Vec<BrowserResult>> {
        let now = Utc::now();
        let results: Vec<BrowserResult> = browsers
            .iter()
            .map(|browser| BrowserResult {
                id: Uuid::new_v4(),
                run_id,
                browser: browser.clone(),
                status: BrowserResultStatus::Pending,
                actions_executed: 0,
                actions_failed: 0,
                error_message: None,
                created_at: now,
                completed_at: None,
            })
            .collect();

        if let Some(pool) = &self.pool {
            for result in &results {
                sqlx::query(
                    r#"
                    INSERT INTO browser_results (
                        id, run_id, browser, status, actions_executed, actions_failed, created_at
                    )
                    VALUES ($1, $2, $3, $4, 0, 0, $5)
                    "#,
                )
                .bind(result.id)
                .bind(result.run_id)
                .bind(&result.browser)
                .bind(result.status.as_str())
                .bind(result.created_at)
                .execute(pool.as_ref())
                .await?;
            }
        } else {
            let mut memory = self.memory.write().await;
            memory.browser_results.extend(results.iter().cloned());
        }

        Ok(results)
    }

    pub async fn browser_results_for_run(&self, run_id: Uuid) -> Result<Vec<BrowserResult>> {
        if let Some(pool) = &self.pool {
            let rows = sqlx::query_as::<_, BrowserResultRow>(
                r#"
                SELECT id, run_id, browser, status, actions_executed, actions_failed,
                       error_message, created_at, completed_at
                FROM browser_results WHERE run_id = $1
                ORDER BY created_at ASC
                "#,
            )
            .bind(run_id)
            .fetch_all(pool.as_ref())
            .await?;
            Ok(rows.into_iter().map(|r| r.into()).collect())
        } else {
            let memory = self.memory.read().await;
            Ok(memory
                .browser_results
                .iter()
                .filter(|r| r.run_id == run_id)
                .cloned()
                .collect())
        }
    }

    // ---- schedules ----

    pub async fn schedule_by_id(&self, id: Uuid) -> Result<Option<Schedule>> {
        if let Some(pool) = &self.pool {
            let row = sqlx::query_as::<_, ScheduleRow>(
                r#"
                SELECT id, user_id, project_id, name, cron_expression, timezone, target_type,
                       recording_id, test_id, suite_id, overrides, starts_at, ends_at,
                       max_daily_runs, status, runs_today, total_runs, successful_runs,
                       failed_runs, last_run_id, last_run_at, last_run_status,
                       created_at, updated_at
                FROM schedules WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(pool.as_ref())
            .await?;
            Ok(row.map(|r| r.into()))
        } else {
            let memory = self.memory.read().await;
            Ok(memory.schedules.get(&id).cloned())
        }
    }

    pub async fn update_schedule(&self, schedule: &Schedule) -> Result<()> {
        if let Some(pool) = &self.pool {
            sqlx::query(
                r#"
                UPDATE schedules
                SET status = $2, runs_today = $3, total_runs = $4, successful_runs = $5,
                    failed_runs = $6, last_run_id = $7, last_run_at = $8,
                    last_run_status = $9, updated_at = $10
                WHERE id = $1
                "#,
            )
            .bind(schedule.id)
            .bind(schedule.status.as_str())
            .bind(schedule.runs_today as i32)
            .bind(schedule.total_runs as i64)
            .bind(schedule.successful_runs as i64)
            .bind(schedule.failed_runs as i64)
            .bind(schedule.last_run_id)
            .bind(schedule.last_run_at)
            .bind(schedule.last_run_status.map(|s| s.as_str()))
            .bind(Utc::now())
            .execute(pool.as_ref())
            .await?;
        } else {
            let mut memory = self.memory.write().await;
            let mut updated = schedule.clone();
            updated.updated_at = Utc::now();
            memory.schedules.insert(schedule.id, updated);
        }
        Ok(())
    }

    pub async fn active_schedules(&self) -> Result<Vec<Schedule>> {
        if let Some(pool) = &self.pool {
            let rows = sqlx::query_as::<_, ScheduleRow>(
                r#"
                SELECT id, user_id, project_id, name, cron_expression, timezone, target_type,
                       recording_id, test_id, suite_id, overrides, starts_at, ends_at,
                       max_daily_runs, status, runs_today, total_runs, successful_runs,
                       failed_runs, last_run_id, last_run_at, last_run_status,
                       created_at, updated_at
                FROM schedules WHERE status = 'active'
                "#,
            )
            .fetch_all(pool.as_ref())
            .await?;
            Ok(rows.into_iter().map(|r| r.into()).collect())
        } else {
            let memory = self.memory.read().await;
            Ok(memory
                .schedules
                .values()
                .filter(|s| s.status == ScheduleStatus::Active)
                .cloned()
                .collect())
        }
    }

    // ---- catalog (read-only here; owned by the CRUD layer) ----

    pub async fn test_by_id(&self, id: Uuid) -> Result<Option<Test>> {
        if let Some(pool) = &self.pool {
            let row = sqlx::query_as::<_, TestRow>(
                r#"
                SELECT id, user_id, project_id, suite_id, name, active, config, recording, created_at
                FROM tests WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(pool.as_ref())
            .await?;
            Ok(row.map(|r| r.into()))
        } else {
            let memory = self.memory.read().await;
            Ok(memory.tests.get(&id).cloned())
        }
    }

    pub async fn tests_by_suite(&self, suite_id: Uuid) -> Result<Vec<Test>> {
        if let Some(pool) = &self.pool {
            let rows = sqlx::query_as::<_, TestRow>(
                r#"
                SELECT id, user_id, project_id, suite_id, name, active, config, recording, created_at
                FROM tests WHERE suite_id = $1 AND active = TRUE
                ORDER BY created_at ASC
                "#,
            )
            .bind(suite_id)
            .fetch_all(pool.as_ref())
            .await?;
            Ok(rows.into_iter().map(|r| r.into()).collect())
        } else {
            let memory = self.memory.read().await;
            let mut tests: Vec<Test> = memory
                .tests
                .values()
                .filter(|t| t.suite_id == Some(suite_id) && t.active)
                .cloned()
                .collect();
            tests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(tests)
        }
    }

    pub async fn suite_by_id(&self, id: Uuid) -> Result<Option<Suite>> {
        if let Some(pool) = &self.pool {
            let row = sqlx::query_as::<_, SuiteRow>(
                "SELECT id, user_id, project_id, name, created_at FROM suites WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(pool.as_ref())
            .await?;
            Ok(row.map(|r| r.into()))
        } else {
            let memory = self.memory.read().await;
            Ok(memory.suites.get(&id).cloned())
        }
    }

    pub async fn recording_by_id(&self, id: Uuid) -> Result<Option<Recording>> {
        if let Some(pool) = &self.pool {
            let row = sqlx::query_as::<_, RecordingRow>(
                r#"
                SELECT id, user_id, project_id, name, browser, total_actions, actions, created_at
                FROM recordings WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(pool.as_ref())
            .await?;
            Ok(row.map(|r| r.into()))
        } else {
            let memory = self.memory.read().await;
            Ok(memory.recordings.get(&id).cloned())
        }
    }

    // ---- in-memory seeding (test/dev support) ----

    pub async fn insert_schedule(&self, schedule: Schedule) -> Result<()> {
        self.seed(|memory| {
            memory.schedules.insert(schedule.id, schedule);
        })
        .await
    }

    pub async fn insert_test(&self, test: Test) -> Result<()> {
        self.seed(|memory| {
            memory.tests.insert(test.id, test);
        })
        .await
    }

    pub async fn insert_suite(&self, suite: Suite) -> Result<()> {
        self.seed(|memory| {
            memory.suites.insert(suite.id, suite);
        })
        .await
    }

    pub async fn insert_recording(&self, recording: Recording) -> Result<()> {
        self.seed(|memory| {
            memory.recordings.insert(recording.id, recording);
        })
        .await
    }

    async fn seed<F: FnOnce(&mut MemoryStore)>(&self, apply: F) -> Result<()> {
        if self.pool.is_some() {
            bail!("catalog rows are owned by the CRUD layer when PostgreSQL is configured");
        }
        let mut memory = self.memory.write().await;
        apply(&mut memory);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testrig_models::{RecordingData, RunType};

    fn new_run(parent_run_id: Option<Uuid>) -> NewRun {
        NewRun {
            user_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            run_type: RunType::Test,
            recording_id: None,
            test_id: Some(Uuid::new_v4()),
            suite_id: None,
            parent_run_id,
            triggered_by: TriggeredBy::Manual,
            schedule_id: None,
            browsers: vec!["chromium".to_string(), "firefox".to_string()],
            actions_total: 8,
        }
    }

    #[tokio::test]
    async fn created_runs_start_queued_and_round_trip_updates() {
        let repo = Repository::in_memory();
        let run = repo.create_run(new_run(None)).await.unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert!(run.job_id.is_none());

        let mut updated = run.clone();
        updated.status = RunStatus::Running;
        updated.started_at = Some(Utc::now());
        updated.job_id = Some(Uuid::new_v4());
        repo.update_run(&updated).await.unwrap();

        let fetched = repo.run_by_id(run.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Running);
        assert_eq!(fetched.job_id, updated.job_id);
    }

    #[tokio::test]
    async fn orphan_query_honors_the_timeout_boundary() {
        let repo = Repository::in_memory();
        let mut old = repo.create_run(new_run(None)).await.unwrap();
        old.status = RunStatus::Running;
        old.started_at = Some(Utc::now() - ChronoDuration::minutes(20));
        repo.update_run(&old).await.unwrap();

        let mut recent = repo.create_run(new_run(None)).await.unwrap();
        recent.status = RunStatus::Running;
        recent.started_at = Some(Utc::now() - ChronoDuration::minutes(1));
        repo.update_run(&recent).await.unwrap();

        let orphans = repo.find_orphaned_runs(10 * 60 * 1000).await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, old.id);
    }

    #[tokio::test]
    async fn browser_results_are_bulk_created_pending() {
        let repo = Repository::in_memory();
        let run = repo.create_run(new_run(None)).await.unwrap();
        let results = repo
            .create_browser_results(run.id, &run.browsers)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| r.status == BrowserResultStatus::Pending));

        let fetched = repo.browser_results_for_run(run.id).await.unwrap();
        assert_eq!(fetched.len(), 2);
    }

    #[tokio::test]
    async fn runs_by_parent_only_returns_children() {
        let repo = Repository::in_memory();
        let parent = repo.create_run(new_run(None)).await.unwrap();
        let child = repo.create_run(new_run(Some(parent.id))).await.unwrap();
        repo.create_run(new_run(None)).await.unwrap();

        let children = repo.runs_by_parent(parent.id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.id);
    }

    #[tokio::test]
    async fn tests_by_suite_excludes_inactive_tests() {
        let repo = Repository::in_memory();
        let suite_id = Uuid::new_v4();
        let make_test = |active: bool| Test {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            suite_id: Some(suite_id),
            name: "test".to_string(),
            active,
            config: None,
            recording: Some(RecordingData {
                total_actions: 1,
                actions: serde_json::json!([]),
            }),
            created_at: Utc::now(),
        };
        repo.insert_test(make_test(true)).await.unwrap();
        repo.insert_test(make_test(false)).await.unwrap();

        let tests = repo.tests_by_suite(suite_id).await.unwrap();
        assert_eq!(tests.len(), 1);
        assert!(tests[0].active);
    }
}
