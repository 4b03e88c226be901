//! Per-queue worker loops: claim, process, complete or retry.

use crate::config::QueueConfig;
use crate::store::JobStore;
use crate::types::{ActiveJob, JobEvent, JobHandler, JobTransition};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, warn};

pub(crate) struct WorkerContext {
    pub config: QueueConfig,
    pub store: Arc<JobStore>,
    pub handler: Arc<dyn JobHandler>,
    pub events: broadcast::Sender<JobEvent>,
    pub paused: Arc<AtomicBool>,
    pub poll_interval: Duration,
    pub shutdown: watch::Receiver<bool>,
}

pub(crate) async fn run_worker(mut ctx: WorkerContext, worker_index: usize) {
    debug!(queue = %ctx.config.name, worker = worker_index, "Queue worker started");

    loop {
        if *ctx.shutdown.borrow() {
            break;
        }

        if ctx.paused.load(Ordering::Relaxed) {
            idle(&mut ctx).await;
            continue;
        }

        let claimed = match ctx.store.claim(&ctx.config.name).await {
            Ok(job) => job,
            Err(e) => {
                warn!(queue = %ctx.config.name, error = %e, "Failed to claim job");
                None
            }
        };

        match claimed {
            Some(job) => process_job(&ctx, job).await,
            None => idle(&mut ctx).await,
        }
    }

    debug!(queue = %ctx.config.name, worker = worker_index, "Queue worker stopped");
}

async fn idle(ctx: &mut WorkerContext) {
    tokio::select! {
        _ = ctx.shutdown.changed() => {}
        _ = tokio::time::sleep(ctx.poll_interval) => {}
    }
}

async fn process_job(ctx: &WorkerContext, job: ActiveJob) {
    emit(ctx, &job, JobTransition::Active, None);

    match ctx.handler.process(&job).await {
        Ok(()) => {
            if let Err(e) = ctx.store.complete(&ctx.config, job.id).await {
                error!(queue = %ctx.config.name, job_id = %job.id, error = %e, "Failed to mark job completed");
                return;
            }
            emit(ctx, &job, JobTransition::Completed, None);
        }
        Err(err) => {
            let message = format!("{err:#}");
            if job.attempts >= job.max_attempts {
                warn!(
                    queue = %ctx.config.name,
                    job_id = %job.id,
                    name = %job.name,
                    attempts = job.attempts,
                    error = %message,
                    "Job failed permanently"
                );
                if let Err(e) = ctx.store.fail(&ctx.config, job.id, &message).await {
                    error!(queue = %ctx.config.name, job_id = %job.id, error = %e, "Failed to mark job failed");
                    return;
                }
                emit(ctx, &job, JobTransition::Failed, Some(message));
            } else {
                let delay = ctx.config.backoff.delay_for(job.attempts);
                let run_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                warn!(
                    queue = %ctx.config.name,
                    job_id = %job.id,
                    name = %job.name,
                    attempts = job.attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %message,
                    "Job failed, scheduling retry"
                );
                if let Err(e) = ctx.store.delay_retry(job.id, &message, run_at).await {
                    error!(queue = %ctx.config.name, job_id = %job.id, error = %e, "Failed to schedule retry");
                    return;
                }
                emit(ctx, &job, JobTransition::Retrying, Some(message));
            }
        }
    }
}

fn emit(ctx: &WorkerContext, job: &ActiveJob, transition: JobTransition, error: Option<String>) {
    let _ = ctx.events.send(JobEvent {
        queue: ctx.config.name.clone(),
        job_id: job.id,
        name: job.name.clone(),
        transition,
        error,
    });
}
