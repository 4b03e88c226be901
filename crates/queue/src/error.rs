use thiserror::Error;

/// Errors surfaced by the queue manager
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue manager not initialized")]
    NotInitialized,

    #[error("Queue workers are disabled in this process")]
    WorkersDisabled,

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Invalid cron pattern '{pattern}': {reason}")]
    InvalidCronPattern { pattern: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;
