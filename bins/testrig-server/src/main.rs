use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use testrig_api::{create_router, AppState};
use testrig_config::AppConfig;
use testrig_models::queues;
use testrig_orchestrator::{
    CleanupJobHandler, CleanupProcessor, CleanupSettings, CleanupTask, RunProgressPublisher,
    ScheduledRunProcessor, TriggerJobHandler,
};
use testrig_queue::{JobTransition, QueueManager, QueueSettings};
use testrig_storage::Repository;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Testrig run-orchestration server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host (overrides SERVER_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides SERVER_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting testrig orchestration server");

    let mut config = testrig_config::load()?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Storage: PostgreSQL when configured, in-memory otherwise (dev mode).
    let repo = match &config.database_url {
        Some(url) => Arc::new(Repository::connect(url).await?),
        None => {
            warn!("DATABASE_URL not set, using in-memory storage");
            Arc::new(Repository::in_memory())
        }
    };

    // Queues share the repository's pool so one database holds everything.
    let mut queue_settings = QueueSettings::standard();
    queue_settings.workers_enabled = config.workers_enabled;
    let queue = Arc::new(QueueManager::new(queue_settings, repo.pool()));
    queue.initialize().await?;

    let progress = match &config.redis_url {
        Some(url) => {
            let publisher = RunProgressPublisher::new(url, config.progress_namespace.clone())?;
            publisher
                .test_connection()
                .await
                .context("Redis connection check failed")?;
            Some(publisher)
        }
        None => {
            warn!("REDIS_URL not set, run progress publishing disabled");
            None
        }
    };

    let scheduler = Arc::new(ScheduledRunProcessor::new(repo.clone(), queue.clone()));
    let cleanup = Arc::new(CleanupProcessor::new(
        repo.clone(),
        CleanupSettings {
            orphan_timeout_ms: config.cleanup.orphan_timeout_ms,
            video_dir: PathBuf::from(&config.storage.video_dir),
            screenshot_dir: PathBuf::from(&config.storage.screenshot_dir),
            video_retention_days: config.cleanup.video_retention_days,
            screenshot_retention_days: config.cleanup.screenshot_retention_days,
        },
    ));

    // Reconcile runs left `running` by an unclean shutdown before taking
    // any new work.
    let startup_sweep = cleanup.sweep_orphaned_runs().await;
    if startup_sweep.items_processed > 0 {
        info!(
            reconciled = startup_sweep.items_deleted,
            errors = startup_sweep.errors.len(),
            "Startup orphaned-run sweep finished"
        );
    }

    if config.workers_enabled {
        queue.register_processor(
            queues::SCHEDULED,
            Arc::new(TriggerJobHandler::new(scheduler.clone())),
        )?;
        queue.register_processor(
            queues::CLEANUP,
            Arc::new(CleanupJobHandler::new(cleanup.clone())),
        )?;
    }

    register_cleanup_jobs(&queue, &config).await?;
    resync_schedules(&repo, &scheduler).await?;
    spawn_queue_monitors(&queue);

    let state = AppState {
        repo,
        queue: queue.clone(),
        runs: scheduler,
        progress,
        config: Arc::new(config.clone()),
    };
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    queue.shutdown(30_000).await?;
    info!("Server stopped");
    Ok(())
}

/// Register the repeatable cleanup jobs. Registration is idempotent, so
/// every process start converges on the same three definitions.
async fn register_cleanup_jobs(queue: &QueueManager, config: &AppConfig) -> Result<()> {
    let jobs = [
        (CleanupTask::OrphanedRuns, &config.cleanup.orphan_sweep_cron),
        (CleanupTask::OldVideos, &config.cleanup.video_sweep_cron),
        (
            CleanupTask::OldScreenshots,
            &config.cleanup.screenshot_sweep_cron,
        ),
    ];
    for (task, pattern) in jobs {
        queue
            .add_repeatable_job(
                queues::CLEANUP,
                task.as_str(),
                serde_json::json!({ "cleanup_type": task.as_str(), "max_age_days": null }),
                pattern,
                None,
            )
            .await
            .with_context(|| format!("Failed to register {} cleanup job", task.as_str()))?;
    }
    Ok(())
}

/// Re-register every active schedule's cron trigger. Definitions live in
/// the queue store, so this is a no-op when they already exist; it matters
/// after the store was wiped or when running in memory mode.
async fn resync_schedules(repo: &Repository, scheduler: &ScheduledRunProcessor) -> Result<()> {
    let schedules = repo.active_schedules().await?;
    let mut registered = 0usize;
    for schedule in &schedules {
        match scheduler.register_schedule(schedule).await {
            Ok(()) => registered += 1,
            Err(e) => {
                warn!(schedule_id = %schedule.id, error = %format!("{e:#}"), "Failed to re-register schedule")
            }
        }
    }
    if !schedules.is_empty() {
        info!(registered, total = schedules.len(), "Active schedules re-synced");
    }
    Ok(())
}

/// Log job failures and retries from every queue's event stream.
fn spawn_queue_monitors(queue: &Arc<QueueManager>) {
    for name in [queues::EXECUTION, queues::CLEANUP, queues::SCHEDULED] {
        let Ok(mut events) = queue.subscribe(name) else {
            continue;
        };
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match event.transition {
                        JobTransition::Failed => {
                            error!(
                                queue = %event.queue,
                                job_id = %event.job_id,
                                name = %event.name,
                                error = event.error.as_deref().unwrap_or("unknown"),
                                "Job failed permanently"
                            );
                        }
                        JobTransition::Retrying => {
                            warn!(
                                queue = %event.queue,
                                job_id = %event.job_id,
                                name = %event.name,
                                "Job scheduled for retry"
                            );
                        }
                        _ => {}
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(queue = name, skipped, "Queue monitor lagged behind events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
