//! Uniform manager for the named durable work queues.
//!
//! Callers see a create/dispatch/observe/shutdown contract and never touch
//! the backing store directly. Queues live in PostgreSQL when a pool is
//! supplied (claims use `FOR UPDATE SKIP LOCKED`, so multiple processes can
//! share the tables) and fall back to process-local memory otherwise.

use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

mod config;
mod error;
mod memory;
mod repeatable;
mod store;
mod types;
mod worker;

pub use config::{BackoffPolicy, QueueConfig, QueueSettings};
pub use error::{QueueError, QueueResult};
pub use types::{
    ActiveJob, AddJobOptions, HealthState, JobEvent, JobHandler, JobHandle, JobState,
    JobTransition, QueueCounts, QueueHealth, WorkerStatus,
};

use store::JobStore;
use worker::WorkerContext;

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct WorkerPool {
    concurrency: usize,
    handles: Vec<JoinHandle<()>>,
}

/// Queue manager service. Constructed once at process start and passed by
/// reference to every consumer; `initialize`, `register_processor`, and
/// `shutdown` are control-plane calls, not for concurrent request handlers.
pub struct QueueManager {
    settings: QueueSettings,
    store: Arc<JobStore>,
    events: HashMap<String, broadcast::Sender<JobEvent>>,
    paused: HashMap<String, Arc<AtomicBool>>,
    shutdown_tx: watch::Sender<bool>,
    initialized: AtomicBool,
    shut_down: AtomicBool,
    workers: Mutex<HashMap<String, WorkerPool>>,
    monitors: Mutex<Vec<JoinHandle<()>>>,
}

impl QueueManager {
    pub fn new(settings: QueueSettings, pool: Option<Arc<PgPool>>) -> Self {
        let mut events = HashMap::new();
        let mut paused = HashMap::new();
        for queue in &settings.queues {
            let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
            events.insert(queue.name.clone(), tx);
            paused.insert(queue.name.clone(), Arc::new(AtomicBool::new(false)));
        }
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            settings,
            store: Arc::new(JobStore::new(pool)),
            events,
            paused,
            shutdown_tx,
            initialized: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            workers: Mutex::new(HashMap::new()),
            monitors: Mutex::new(Vec::new()),
        }
    }

    /// Idempotently provision all configured queues and start the
    /// repeatable-job scheduler. Must precede every other operation.
    pub async fn initialize(&self) -> QueueResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(QueueError::NotInitialized);
        }

        self.store.provision().await?;

        if !self.initialized.swap(true, Ordering::SeqCst) {
            let scheduler = tokio::spawn(repeatable::run_scheduler(
                self.store.clone(),
                self.settings.clone(),
                self.events.clone(),
                self.shutdown_tx.subscribe(),
            ));
            self.monitors.lock().unwrap().push(scheduler);
            info!(
                queues = self.settings.queues.len(),
                workers_enabled = self.settings.workers_enabled,
                "Queue manager initialized"
            );
        }

        Ok(())
    }

    /// Enqueue a job. `opts.job_id` deduplicates against unfinished jobs.
    pub async fn add_job(
        &self,
        queue: &str,
        name: &str,
        payload: JsonValue,
        opts: AddJobOptions,
    ) -> QueueResult<JobHandle> {
        self.ensure_ready()?;
        let config = self.queue_config(queue)?;
        let id = self.store.add(config, name, payload, &opts).await?;

        if let Some(sender) = self.events.get(queue) {
            let _ = sender.send(JobEvent {
                queue: queue.to_string(),
                job_id: id,
                name: name.to_string(),
                transition: JobTransition::Waiting,
                error: None,
            });
        }

        Ok(JobHandle {
            id,
            queue: queue.to_string(),
            name: name.to_string(),
        })
    }

    /// Bind a handler to a queue, creating (or replacing) its worker pool.
    pub fn register_processor(
        &self,
        queue: &str,
        handler: Arc<dyn JobHandler>,
    ) -> QueueResult<()> {
        self.ensure_ready()?;
        if !self.settings.workers_enabled {
            return Err(QueueError::WorkersDisabled);
        }
        let config = self.queue_config(queue)?.clone();
        let events = self
            .events
            .get(queue)
            .cloned()
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        let paused = self
            .paused
            .get(queue)
            .cloned()
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

        let mut workers = self.workers.lock().unwrap();
        if let Some(old) = workers.remove(queue) {
            for handle in old.handles {
                handle.abort();
            }
            warn!(queue = %queue, "Replaced existing worker pool");
        }

        let mut handles = Vec::with_capacity(config.concurrency);
        for index in 0..config.concurrency {
            let ctx = WorkerContext {
                config: config.clone(),
                store: self.store.clone(),
                handler: handler.clone(),
                events: events.clone(),
                paused: paused.clone(),
                poll_interval: self.settings.poll_interval,
                shutdown: self.shutdown_tx.subscribe(),
            };
            handles.push(tokio::spawn(worker::run_worker(ctx, index)));
        }

        info!(queue = %queue, concurrency = config.concurrency, "Registered queue processor");
        workers.insert(
            queue.to_string(),
            WorkerPool {
                concurrency: config.concurrency,
                handles,
            },
        );
        Ok(())
    }

    /// Stop dispatching a queue to its workers. Jobs keep accumulating.
    pub fn pause_queue(&self, queue: &str) -> QueueResult<()> {
        self.ensure_ready()?;
        let flag = self
            .paused
            .get(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        flag.store(true, Ordering::Relaxed);
        info!(queue = %queue, "Queue paused");
        Ok(())
    }

    pub fn resume_queue(&self, queue: &str) -> QueueResult<()> {
        self.ensure_ready()?;
        let flag = self
            .paused
            .get(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        flag.store(false, Ordering::Relaxed);
        info!(queue = %queue, "Queue resumed");
        Ok(())
    }

    /// Remove a job that has not started. Returns false once the job is
    /// active, finished, or unknown; cancelling running work is the
    /// execution worker's business, observed through run status.
    pub async fn cancel_job(&self, queue: &str, job_id: Uuid) -> QueueResult<bool> {
        self.ensure_ready()?;
        self.queue_config(queue)?;
        self.store.cancel(queue, job_id).await
    }

    /// Register a cron-driven trigger, keyed by `(name, pattern, timezone)`.
    pub async fn add_repeatable_job(
        &self,
        queue: &str,
        name: &str,
        payload: JsonValue,
        pattern: &str,
        timezone: Option<&str>,
    ) -> QueueResult<()> {
        self.ensure_ready()?;
        self.queue_config(queue)?;
        let tz = timezone.unwrap_or("UTC");
        repeatable::parse_timezone(tz)?;
        let next = repeatable::next_fire(pattern, tz, Utc::now())?
            .ok_or_else(|| QueueError::InvalidCronPattern {
                pattern: pattern.to_string(),
                reason: "pattern has no future occurrences".to_string(),
            })?;
        self.store
            .upsert_repeatable(queue, name, pattern, tz, payload, next)
            .await?;
        info!(queue = %queue, name = %name, pattern = %pattern, timezone = %tz, "Registered repeatable job");
        Ok(())
    }

    pub async fn remove_repeatable_job(
        &self,
        queue: &str,
        name: &str,
        pattern: &str,
        timezone: Option<&str>,
    ) -> QueueResult<bool> {
        self.ensure_ready()?;
        let tz = timezone.unwrap_or("UTC");
        let removed = self.store.remove_repeatable(queue, name, pattern, tz).await?;
        if removed {
            info!(queue = %queue, name = %name, pattern = %pattern, "Removed repeatable job");
        }
        Ok(removed)
    }

    pub async fn queue_status(&self, queue: &str) -> QueueResult<QueueCounts> {
        self.ensure_ready()?;
        self.queue_config(queue)?;
        let [waiting, active, completed, failed, delayed] = self.store.counts(queue).await?;
        Ok(QueueCounts {
            name: queue.to_string(),
            waiting,
            active,
            completed,
            failed,
            delayed,
            paused: self
                .paused
                .get(queue)
                .map(|f| f.load(Ordering::Relaxed))
                .unwrap_or(false),
        })
    }

    pub async fn all_queue_status(&self) -> QueueResult<Vec<QueueCounts>> {
        let mut all = Vec::with_capacity(self.settings.queues.len());
        for queue in &self.settings.queues {
            all.push(self.queue_status(&queue.name).await?);
        }
        Ok(all)
    }

    /// Aggregate health. Failed-count is evaluated first; a stopped worker
    /// can escalate the verdict but never de-escalate it.
    pub async fn health_status(&self) -> QueueResult<QueueHealth> {
        let queues = self.all_queue_status().await?;
        let mut status = if queues.iter().any(|q| q.failed > 100) {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        let workers: Vec<WorkerStatus> = {
            let pools = self.workers.lock().unwrap();
            pools
                .iter()
                .map(|(name, pool)| WorkerStatus {
                    name: name.clone(),
                    running: pool.handles.iter().all(|h| !h.is_finished()),
                    concurrency: pool.concurrency,
                })
                .collect()
        };

        if self.settings.workers_enabled && workers.iter().any(|w| !w.running) {
            status = HealthState::Unhealthy;
        }

        Ok(QueueHealth {
            status,
            queues,
            workers,
        })
    }

    /// Live feed of job lifecycle transitions on a queue.
    pub fn subscribe(&self, queue: &str) -> QueueResult<broadcast::Receiver<JobEvent>> {
        self.events
            .get(queue)
            .map(|tx| tx.subscribe())
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))
    }

    /// Graceful stop: workers first (bounded by `timeout_ms`, racing a
    /// timer so this never hangs), then monitors, then queue handles.
    /// Idempotent, and safe even if `initialize` was never called.
    pub async fn shutdown(&self, timeout_ms: u64) -> QueueResult<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.shutdown_tx.send(true);

        let pools: Vec<WorkerPool> = {
            let mut workers = self.workers.lock().unwrap();
            workers.drain().map(|(_, pool)| pool).collect()
        };
        let handles: Vec<JoinHandle<()>> =
            pools.into_iter().flat_map(|p| p.handles).collect();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        if !handles.is_empty() {
            let drained = tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                futures::future::join_all(handles),
            )
            .await;
            if drained.is_err() {
                warn!("Queue workers did not stop within timeout, aborting");
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        let monitors: Vec<JoinHandle<()>> = self.monitors.lock().unwrap().drain(..).collect();
        for monitor in monitors {
            monitor.abort();
        }

        info!("Queue manager shut down");
        Ok(())
    }

    fn ensure_ready(&self) -> QueueResult<()> {
        if !self.initialized.load(Ordering::SeqCst) || self.shut_down.load(Ordering::SeqCst) {
            return Err(QueueError::NotInitialized);
        }
        Ok(())
    }

    fn queue_config(&self, queue: &str) -> QueueResult<&QueueConfig> {
        self.settings
            .queue(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))
    }
}
