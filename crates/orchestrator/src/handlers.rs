//! Queue-handler glue binding the processors to their queues.

use crate::cleanup::{CleanupOutcome, CleanupProcessor};
use crate::scheduled::{ScheduledRunProcessor, TriggerOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use testrig_models::{CleanupJobPayload, TriggerJobPayload};
use testrig_queue::{ActiveJob, JobHandler};
use tracing::{info, warn};

/// Processor for the scheduled-trigger queue
pub struct TriggerJobHandler {
    processor: Arc<ScheduledRunProcessor>,
}

impl TriggerJobHandler {
    pub fn new(processor: Arc<ScheduledRunProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl JobHandler for TriggerJobHandler {
    async fn process(&self, job: &ActiveJob) -> anyhow::Result<()> {
        let payload: TriggerJobPayload = match job.payload_as() {
            Ok(payload) => payload,
            Err(e) => {
                // Malformed payloads never become valid; retrying is noise.
                warn!(job_id = %job.id, error = %e, "Discarding malformed trigger payload");
                return Ok(());
            }
        };

        // Policy skips and data errors come back as outcomes and are logged
        // here; infrastructure errors bubble so the queue's backoff engages.
        match self.processor.process_trigger(payload.schedule_id).await? {
            TriggerOutcome::Triggered { run_id, child_runs } => {
                info!(
                    schedule_id = %payload.schedule_id,
                    run_id = %run_id,
                    child_runs,
                    "Schedule trigger handled"
                );
            }
            TriggerOutcome::Skipped { reason } => {
                info!(schedule_id = %payload.schedule_id, reason = %reason, "Schedule trigger skipped");
            }
            TriggerOutcome::Error { message } => {
                warn!(schedule_id = %payload.schedule_id, error = %message, "Schedule trigger failed");
            }
        }
        Ok(())
    }
}

/// Processor for the cleanup queue
pub struct CleanupJobHandler {
    processor: Arc<CleanupProcessor>,
}

impl CleanupJobHandler {
    pub fn new(processor: Arc<CleanupProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl JobHandler for CleanupJobHandler {
    async fn process(&self, job: &ActiveJob) -> anyhow::Result<()> {
        let payload: CleanupJobPayload = match job.payload_as() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Discarding malformed cleanup payload");
                return Ok(());
            }
        };

        match self.processor.run(&payload).await {
            CleanupOutcome::OrphanedRuns(report) => {
                info!(
                    processed = report.items_processed,
                    reconciled = report.items_deleted,
                    errors = report.errors.len(),
                    "Orphaned-run cleanup finished"
                );
            }
            CleanupOutcome::VideoRetention(report) | CleanupOutcome::ScreenshotRetention(report) => {
                info!(
                    cleanup_type = %payload.cleanup_type,
                    processed = report.items_processed,
                    deleted = report.items_deleted,
                    errors = report.errors.len(),
                    "Artifact retention cleanup finished"
                );
            }
            CleanupOutcome::ExpiredTokens => {
                // Stateless tokens: deliberate no-op.
            }
            CleanupOutcome::Error {
                cleanup_type,
                message,
            } => {
                warn!(cleanup_type = %cleanup_type, error = %message, "Cleanup job rejected");
            }
        }
        Ok(())
    }
}
