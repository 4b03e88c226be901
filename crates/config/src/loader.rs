use crate::environment::Environment;
use crate::types::{AppConfig, ArtifactStorageConfig, CleanupConfig, ServerConfig};
use anyhow::{Context, Result};
use tracing::info;

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn var_parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Invalid value for {name}: {raw}")),
        None => Ok(default),
    }
}

/// Load configuration from the process environment.
pub fn load() -> Result<AppConfig> {
    let environment = Environment::from_env();
    let defaults = AppConfig::default();
    let cleanup_defaults = CleanupConfig::default();

    let config = AppConfig {
        server: ServerConfig {
            host: var("SERVER_HOST").unwrap_or(defaults.server.host),
            port: var_parsed("SERVER_PORT", defaults.server.port)?,
        },
        database_url: var("DATABASE_URL"),
        redis_url: var("REDIS_URL"),
        progress_namespace: var("PROGRESS_NAMESPACE").unwrap_or(defaults.progress_namespace),
        storage: ArtifactStorageConfig {
            video_dir: var("VIDEO_STORAGE_DIR").unwrap_or(defaults.storage.video_dir),
            screenshot_dir: var("SCREENSHOT_STORAGE_DIR").unwrap_or(defaults.storage.screenshot_dir),
        },
        cleanup: CleanupConfig {
            orphan_timeout_ms: var_parsed("ORPHAN_TIMEOUT_MS", cleanup_defaults.orphan_timeout_ms)?,
            video_retention_days: var_parsed(
                "VIDEO_RETENTION_DAYS",
                cleanup_defaults.video_retention_days,
            )?,
            screenshot_retention_days: var_parsed(
                "SCREENSHOT_RETENTION_DAYS",
                cleanup_defaults.screenshot_retention_days,
            )?,
            orphan_sweep_cron: var("ORPHAN_SWEEP_CRON").unwrap_or(cleanup_defaults.orphan_sweep_cron),
            video_sweep_cron: var("VIDEO_SWEEP_CRON").unwrap_or(cleanup_defaults.video_sweep_cron),
            screenshot_sweep_cron: var("SCREENSHOT_SWEEP_CRON")
                .unwrap_or(cleanup_defaults.screenshot_sweep_cron),
        },
        workers_enabled: var_parsed("WORKERS_ENABLED", true)?,
    };

    info!(
        %environment,
        database = config.database_url.is_some(),
        redis = config.redis_url.is_some(),
        workers = config.workers_enabled,
        "Configuration loaded"
    );

    Ok(config)
}
