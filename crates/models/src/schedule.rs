use crate::run::{RunStatus, RunType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Schedule status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Disabled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Active => "active",
            ScheduleStatus::Paused => "paused",
            ScheduleStatus::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ScheduleStatus::Active),
            "paused" => Some(ScheduleStatus::Paused),
            "disabled" => Some(ScheduleStatus::Disabled),
            _ => None,
        }
    }
}

/// When screenshots are captured during a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ScreenshotMode {
    Off,
    OnFailure,
    All,
}

/// Fully resolved run configuration handed to the execution worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    pub browsers: Vec<String>,
    pub parallel_browsers: bool,
    pub headless: bool,
    pub record_video: bool,
    pub record_screenshots: bool,
    pub screenshot_mode: ScreenshotMode,
    pub timeout_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            browsers: vec!["chromium".to_string()],
            parallel_browsers: false,
            headless: true,
            record_video: false,
            record_screenshots: true,
            screenshot_mode: ScreenshotMode::OnFailure,
            timeout_ms: 60_000,
        }
    }
}

/// Partial run configuration. A schedule's overrides and a test's saved
/// config are both patches layered over [`RunConfig::default`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunConfigOverrides {
    pub browsers: Option<Vec<String>>,
    pub parallel_browsers: Option<bool>,
    pub headless: Option<bool>,
    pub record_video: Option<bool>,
    pub record_screenshots: Option<bool>,
    pub screenshot_mode: Option<ScreenshotMode>,
    pub timeout_ms: Option<u64>,
}

impl RunConfigOverrides {
    /// Apply this patch on top of `base`, field by field.
    pub fn apply(&self, base: RunConfig) -> RunConfig {
        RunConfig {
            browsers: self.browsers.clone().unwrap_or(base.browsers),
            parallel_browsers: self.parallel_browsers.unwrap_or(base.parallel_browsers),
            headless: self.headless.unwrap_or(base.headless),
            record_video: self.record_video.unwrap_or(base.record_video),
            record_screenshots: self.record_screenshots.unwrap_or(base.record_screenshots),
            screenshot_mode: self.screenshot_mode.unwrap_or(base.screenshot_mode),
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
        }
    }
}

/// A recurring trigger definition that spawns runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub cron_expression: String,
    pub timezone: Option<String>,
    pub target_type: RunType,
    pub recording_id: Option<Uuid>,
    pub test_id: Option<Uuid>,
    pub suite_id: Option<Uuid>,
    pub overrides: RunConfigOverrides,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub max_daily_runs: Option<u32>,
    pub status: ScheduleStatus,
    pub runs_today: u32,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_run_id: Option<Uuid>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<RunStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_layer_over_defaults() {
        let patch = RunConfigOverrides {
            browsers: Some(vec!["firefox".to_string(), "webkit".to_string()]),
            timeout_ms: Some(120_000),
            ..Default::default()
        };
        let resolved = patch.apply(RunConfig::default());
        assert_eq!(resolved.browsers, vec!["firefox", "webkit"]);
        assert_eq!(resolved.timeout_ms, 120_000);
        // untouched fields keep the hard defaults
        assert!(resolved.headless);
        assert_eq!(resolved.screenshot_mode, ScreenshotMode::OnFailure);
    }

    #[test]
    fn screenshot_mode_uses_kebab_case_on_the_wire() {
        let json = serde_json::to_string(&ScreenshotMode::OnFailure).unwrap();
        assert_eq!(json, "\"on-failure\"");
    }
}
