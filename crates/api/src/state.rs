use std::sync::Arc;
use testrig_config::AppConfig;
use testrig_orchestrator::{RunProgressPublisher, ScheduledRunProcessor};
use testrig_queue::QueueManager;
use testrig_storage::Repository;

/// Shared application state handed to every route handler
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub queue: Arc<QueueManager>,
    pub runs: Arc<ScheduledRunProcessor>,
    /// Present when Redis is configured; run detail responses include the
    /// progress channel name so clients know where to subscribe.
    pub progress: Option<RunProgressPublisher>,
    pub config: Arc<AppConfig>,
}
