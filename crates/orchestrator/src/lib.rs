//! The run-orchestration engine: turns schedule ticks and API requests
//! into queued, tracked execution jobs, reconciles state lost to crashes,
//! enforces artifact retention, and streams run progress to observers.

pub mod cleanup;
pub mod handlers;
pub mod progress;
pub mod scheduled;

pub use cleanup::{CleanupOutcome, CleanupProcessor, CleanupReport, CleanupSettings, CleanupTask};
pub use handlers::{CleanupJobHandler, TriggerJobHandler};
pub use progress::RunProgressPublisher;
pub use scheduled::{RunTarget, ScheduledRunProcessor, TriggerOutcome};
