use serde::{Deserialize, Serialize};

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// PostgreSQL connection string; absent means in-memory storage
    pub database_url: Option<String>,
    /// Redis connection string; absent disables progress publishing
    pub redis_url: Option<String>,
    /// Prefix for run-progress pub/sub channels
    pub progress_namespace: String,
    pub storage: ArtifactStorageConfig,
    pub cleanup: CleanupConfig,
    /// Disables queue workers for read-only replicas
    pub workers_enabled: bool,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Where run artifacts land on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactStorageConfig {
    pub video_dir: String,
    pub screenshot_dir: String,
}

/// Cleanup cadence and retention policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Runs still `running` after this long are considered orphaned
    pub orphan_timeout_ms: u64,
    pub video_retention_days: u32,
    pub screenshot_retention_days: u32,
    /// Five-field cron patterns driving the repeatable cleanup jobs
    pub orphan_sweep_cron: String,
    pub video_sweep_cron: String,
    pub screenshot_sweep_cron: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database_url: None,
            redis_url: None,
            progress_namespace: "testrig".to_string(),
            storage: ArtifactStorageConfig {
                video_dir: "storage/videos".to_string(),
                screenshot_dir: "storage/screenshots".to_string(),
            },
            cleanup: CleanupConfig::default(),
            workers_enabled: true,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            orphan_timeout_ms: 10 * 60 * 1000,
            video_retention_days: 30,
            screenshot_retention_days: 30,
            orphan_sweep_cron: "*/10 * * * *".to_string(),
            video_sweep_cron: "0 3 * * *".to_string(),
            screenshot_sweep_cron: "30 3 * * *".to_string(),
        }
    }
}
