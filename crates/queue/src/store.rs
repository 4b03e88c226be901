//! Dual-backend job storage: PostgreSQL when a pool is configured,
//! in-memory otherwise.

use crate::config::QueueConfig;
use crate::error::QueueResult;
use crate::memory::{AddOutcome, MemJob, MemRepeatable, MemoryBackend};
use crate::types::{ActiveJob, AddJobOptions, JobState};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use uuid::Uuid;

/// Database row for the queue_jobs table
#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    queue_name: String,
    job_name: String,
    payload: JsonValue,
    attempts: i32,
    max_attempts: i32,
}

impl From<JobRow> for ActiveJob {
    fn from(row: JobRow) -> Self {
        ActiveJob {
            id: row.id,
            queue: row.queue_name,
            name: row.job_name,
            payload: row.payload,
            attempts: row.attempts.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
        }
    }
}

#[derive(Debug, FromRow)]
struct RepeatableRow {
    queue_name: String,
    job_name: String,
    pattern: String,
    timezone: String,
    payload: JsonValue,
    next_fire_at: DateTime<Utc>,
}

/// A repeatable definition due for materialization
#[derive(Debug, Clone)]
pub(crate) struct DueRepeatable {
    pub queue: String,
    pub name: String,
    pub pattern: String,
    pub timezone: String,
    pub payload: JsonValue,
    pub next_fire_at: DateTime<Utc>,
}

impl From<RepeatableRow> for DueRepeatable {
    fn from(row: RepeatableRow) -> Self {
        DueRepeatable {
            queue: row.queue_name,
            name: row.job_name,
            pattern: row.pattern,
            timezone: row.timezone,
            payload: row.payload,
            next_fire_at: row.next_fire_at,
        }
    }
}

pub(crate) struct JobStore {
    pool: Option<Arc<PgPool>>,
    memory: MemoryBackend,
}

impl JobStore {
    pub fn new(pool: Option<Arc<PgPool>>) -> Self {
        Self {
            pool,
            memory: MemoryBackend::default(),
        }
    }

    /// Idempotent table provisioning. Re-running never drops pending work.
    pub async fn provision(&self) -> QueueResult<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_jobs (
                id UUID PRIMARY KEY,
                queue_name TEXT NOT NULL,
                job_name TEXT NOT NULL,
                job_key TEXT,
                payload JSONB NOT NULL,
                priority INT NOT NULL DEFAULT 0,
                state TEXT NOT NULL DEFAULT 'waiting',
                attempts INT NOT NULL DEFAULT 0,
                max_attempts INT NOT NULL DEFAULT 1,
                run_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                started_at TIMESTAMPTZ,
                finished_at TIMESTAMPTZ,
                last_error TEXT
            )
            "#,
        )
        .execute(pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS queue_jobs_job_key
            ON queue_jobs (queue_name, job_key)
            WHERE finished_at IS NULL
            "#,
        )
        .execute(pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS queue_jobs_claim
            ON queue_jobs (queue_name, state, run_at)
            "#,
        )
        .execute(pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_repeatable (
                queue_name TEXT NOT NULL,
                job_name TEXT NOT NULL,
                pattern TEXT NOT NULL,
                timezone TEXT NOT NULL DEFAULT 'UTC',
                payload JSONB NOT NULL,
                next_fire_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (queue_name, job_name, pattern, timezone)
            )
            "#,
        )
        .execute(pool.as_ref())
        .await?;

        Ok(())
    }

    /// Enqueue a job. A `job_id` in the options is the caller's dedup key:
    /// while an unfinished job with that key exists, its id is returned
    /// instead of inserting a duplicate.
    pub async fn add(
        &self,
        config: &QueueConfig,
        name: &str,
        payload: JsonValue,
        opts: &AddJobOptions,
    ) -> QueueResult<Uuid> {
        let now = Utc::now();
        let run_at = match opts.delay_ms {
            Some(ms) => now + ChronoDuration::milliseconds(ms as i64),
            None => now,
        };
        let state = if opts.delay_ms.is_some() {
            JobState::Delayed
        } else {
            JobState::Waiting
        };
        let id = Uuid::new_v4();

        if let Some(pool) = &self.pool {
            let inserted: Option<Uuid> = sqlx::query_scalar(
                r#"
                INSERT INTO queue_jobs (
                    id, queue_name, job_name, job_key, payload, priority,
                    state, attempts, max_attempts, run_at, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9, $10)
                ON CONFLICT (queue_name, job_key) WHERE finished_at IS NULL
                DO NOTHING
                RETURNING id
                "#,
            )
            .bind(id)
            .bind(&config.name)
            .bind(name)
            .bind(&opts.job_id)
            .bind(&payload)
            .bind(opts.priority)
            .bind(state.as_str())
            .bind(config.max_attempts as i32)
            .bind(run_at)
            .bind(now)
            .fetch_optional(pool.as_ref())
            .await?;

            if let Some(id) = inserted {
                return Ok(id);
            }
            debug_assert!(opts.job_id.is_some(), "only keyed inserts can conflict");

            // Insert was deduplicated; hand back the live job.
            let existing: Uuid = sqlx::query_scalar(
                r#"
                SELECT id FROM queue_jobs
                WHERE queue_name = $1 AND job_key = $2 AND finished_at IS NULL
                "#,
            )
            .bind(&config.name)
            .bind(&opts.job_id)
            .fetch_one(pool.as_ref())
            .await?;
            Ok(existing)
        } else {
            let outcome = self
                .memory
                .add(MemJob {
                    id,
                    queue: config.name.clone(),
                    name: name.to_string(),
                    job_key: opts.job_id.clone(),
                    payload,
                    priority: opts.priority,
                    state,
                    attempts: 0,
                    max_attempts: config.max_attempts,
                    run_at,
                    created_at: now,
                    started_at: None,
                    finished_at: None,
                    last_error: None,
                })
                .await;
            match outcome {
                AddOutcome::Created(id) | AddOutcome::Existing(id) => Ok(id),
            }
        }
    }

    /// Claim the next claimable job on a queue, marking it active.
    pub async fn claim(&self, queue: &str) -> QueueResult<Option<ActiveJob>> {
        let now = Utc::now();
        if let Some(pool) = &self.pool {
            let row = sqlx::query_as::<_, JobRow>(
                r#"
                UPDATE queue_jobs
                SET state = 'active', attempts = attempts + 1, started_at = $2
                WHERE id = (
                    SELECT id FROM queue_jobs
                    WHERE queue_name = $1
                      AND state IN ('waiting', 'delayed')
                      AND run_at <= $2
                    ORDER BY priority DESC, created_at ASC
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING id, queue_name, job_name, payload, attempts, max_attempts
                "#,
            )
            .bind(queue)
            .bind(now)
            .fetch_optional(pool.as_ref())
            .await?;
            Ok(row.map(|r| r.into()))
        } else {
            Ok(self.memory.claim(queue, now).await.map(|j| ActiveJob {
                id: j.id,
                queue: j.queue,
                name: j.name,
                payload: j.payload,
                attempts: j.attempts,
                max_attempts: j.max_attempts,
            }))
        }
    }

    pub async fn complete(&self, config: &QueueConfig, id: Uuid) -> QueueResult<()> {
        let now = Utc::now();
        if let Some(pool) = &self.pool {
            sqlx::query("UPDATE queue_jobs SET state = 'completed', finished_at = $2 WHERE id = $1")
                .bind(id)
                .bind(now)
                .execute(pool.as_ref())
                .await?;
            self.prune(pool, &config.name, "completed", config.keep_completed)
                .await?;
        } else {
            self.memory
                .mark_completed(id, now, config.keep_completed)
                .await;
        }
        Ok(())
    }

    pub async fn fail(&self, config: &QueueConfig, id: Uuid, error: &str) -> QueueResult<()> {
        let now = Utc::now();
        if let Some(pool) = &self.pool {
            sqlx::query(
                r#"
                UPDATE queue_jobs
                SET state = 'failed', finished_at = $2, last_error = $3
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(now)
            .bind(error)
            .execute(pool.as_ref())
            .await?;
            self.prune(pool, &config.name, "failed", config.keep_failed)
                .await?;
        } else {
            self.memory.mark_failed(id, error, now, config.keep_failed).await;
        }
        Ok(())
    }

    /// Park a failed attempt for retry at `run_at`.
    pub async fn delay_retry(
        &self,
        id: Uuid,
        error: &str,
        run_at: DateTime<Utc>,
    ) -> QueueResult<()> {
        if let Some(pool) = &self.pool {
            sqlx::query(
                r#"
                UPDATE queue_jobs
                SET state = 'delayed', run_at = $2, started_at = NULL, last_error = $3
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(run_at)
            .bind(error)
            .execute(pool.as_ref())
            .await?;
        } else {
            self.memory.mark_delayed(id, error, run_at).await;
        }
        Ok(())
    }

    /// Remove a waiting/delayed job. Returns false if the job has already
    /// started or does not exist.
    pub async fn cancel(&self, queue: &str, id: Uuid) -> QueueResult<bool> {
        if let Some(pool) = &self.pool {
            let result = sqlx::query(
                r#"
                DELETE FROM queue_jobs
                WHERE id = $1 AND queue_name = $2 AND state IN ('waiting', 'delayed')
                "#,
            )
            .bind(id)
            .bind(queue)
            .execute(pool.as_ref())
            .await?;
            Ok(result.rows_affected() > 0)
        } else {
            Ok(self.memory.cancel(queue, id).await)
        }
    }

    /// waiting/active/completed/failed/delayed counts for one queue
    pub async fn counts(&self, queue: &str) -> QueueResult<[u64; 5]> {
        if let Some(pool) = &self.pool {
            let rows: Vec<(String, i64)> = sqlx::query_as(
                "SELECT state, COUNT(*) FROM queue_jobs WHERE queue_name = $1 GROUP BY state",
            )
            .bind(queue)
            .fetch_all(pool.as_ref())
            .await?;
            let mut counts = [0u64; 5];
            for (state, count) in rows {
                let idx = match state.as_str() {
                    "waiting" => 0,
                    "active" => 1,
                    "completed" => 2,
                    "failed" => 3,
                    "delayed" => 4,
                    _ => continue,
                };
                counts[idx] = count.max(0) as u64;
            }
            Ok(counts)
        } else {
            Ok(self.memory.counts(queue).await)
        }
    }

    pub async fn upsert_repeatable(
        &self,
        queue: &str,
        name: &str,
        pattern: &str,
        timezone: &str,
        payload: JsonValue,
        next_fire_at: DateTime<Utc>,
    ) -> QueueResult<()> {
        if let Some(pool) = &self.pool {
            sqlx::query(
                r#"
                INSERT INTO queue_repeatable (
                    queue_name, job_name, pattern, timezone, payload, next_fire_at, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (queue_name, job_name, pattern, timezone)
                DO UPDATE SET payload = EXCLUDED.payload
                "#,
            )
            .bind(queue)
            .bind(name)
            .bind(pattern)
            .bind(timezone)
            .bind(&payload)
            .bind(next_fire_at)
            .bind(Utc::now())
            .execute(pool.as_ref())
            .await?;
        } else {
            self.memory
                .upsert_repeatable(MemRepeatable {
                    queue: queue.to_string(),
                    name: name.to_string(),
                    pattern: pattern.to_string(),
                    timezone: timezone.to_string(),
                    payload,
                    next_fire_at,
                })
                .await;
        }
        Ok(())
    }

    pub async fn remove_repeatable(
        &self,
        queue: &str,
        name: &str,
        pattern: &str,
        timezone: &str,
    ) -> QueueResult<bool> {
        if let Some(pool) = &self.pool {
            let result = sqlx::query(
                r#"
                DELETE FROM queue_repeatable
                WHERE queue_name = $1 AND job_name = $2 AND pattern = $3 AND timezone = $4
                "#,
            )
            .bind(queue)
            .bind(name)
            .bind(pattern)
            .bind(timezone)
            .execute(pool.as_ref())
            .await?;
            Ok(result.rows_affected() > 0)
        } else {
            Ok(self
                .memory
                .remove_repeatable(queue, name, pattern, timezone)
                .await)
        }
    }

    pub async fn due_repeatables(&self, now: DateTime<Utc>) -> QueueResult<Vec<DueRepeatable>> {
        if let Some(pool) = &self.pool {
            let rows = sqlx::query_as::<_, RepeatableRow>(
                r#"
                SELECT queue_name, job_name, pattern, timezone, payload, next_fire_at
                FROM queue_repeatable
                WHERE next_fire_at <= $1
                "#,
            )
            .bind(now)
            .fetch_all(pool.as_ref())
            .await?;
            Ok(rows.into_iter().map(|r| r.into()).collect())
        } else {
            Ok(self
                .memory
                .due_repeatables(now)
                .await
                .into_iter()
                .map(|r| DueRepeatable {
                    queue: r.queue,
                    name: r.name,
                    pattern: r.pattern,
                    timezone: r.timezone,
                    payload: r.payload,
                    next_fire_at: r.next_fire_at,
                })
                .collect())
        }
    }

    pub async fn advance_repeatable(
        &self,
        def: &DueRepeatable,
        next_fire_at: DateTime<Utc>,
    ) -> QueueResult<()> {
        if let Some(pool) = &self.pool {
            sqlx::query(
                r#"
                UPDATE queue_repeatable SET next_fire_at = $5
                WHERE queue_name = $1 AND job_name = $2 AND pattern = $3 AND timezone = $4
                "#,
            )
            .bind(&def.queue)
            .bind(&def.name)
            .bind(&def.pattern)
            .bind(&def.timezone)
            .bind(next_fire_at)
            .execute(pool.as_ref())
            .await?;
        } else {
            self.memory
                .advance_repeatable(&def.queue, &def.name, &def.pattern, &def.timezone, next_fire_at)
                .await;
        }
        Ok(())
    }

    async fn prune(&self, pool: &PgPool, queue: &str, state: &str, keep: usize) -> QueueResult<()> {
        sqlx::query(
            r#"
            DELETE FROM queue_jobs
            WHERE queue_name = $1 AND state = $2 AND id NOT IN (
                SELECT id FROM queue_jobs
                WHERE queue_name = $1 AND state = $2
                ORDER BY finished_at DESC NULLS LAST
                LIMIT $3
            )
            "#,
        )
        .bind(queue)
        .bind(state)
        .bind(keep as i64)
        .execute(pool)
        .await?;
        Ok(())
    }
}
