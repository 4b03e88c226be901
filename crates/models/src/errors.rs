use thiserror::Error;

/// Orchestration-layer errors surfaced through the API
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Run not found: {id}")]
    RunNotFound { id: String },

    #[error("Test not found: {id}")]
    TestNotFound { id: String },

    #[error("Suite not found: {id}")]
    SuiteNotFound { id: String },

    #[error("Recording not found: {id}")]
    RecordingNotFound { id: String },

    #[error("Schedule not found: {id}")]
    ScheduleNotFound { id: String },

    #[error("Test has no recorded actions: {id}")]
    MissingRecording { id: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Queue error: {reason}")]
    QueueError { reason: String },

    #[error("Database error: {reason}")]
    DatabaseError { reason: String },

    #[error("Internal server error: {reason}")]
    InternalError { reason: String },
}

impl EngineError {
    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::RunNotFound { .. } => 404,
            EngineError::TestNotFound { .. } => 404,
            EngineError::SuiteNotFound { .. } => 404,
            EngineError::RecordingNotFound { .. } => 404,
            EngineError::ScheduleNotFound { .. } => 404,
            EngineError::MissingRecording { .. } => 422,
            EngineError::InvalidRequest { .. } => 400,
            EngineError::QueueError { .. } => 500,
            EngineError::DatabaseError { .. } => 500,
            EngineError::InternalError { .. } => 500,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::QueueError { .. } | EngineError::DatabaseError { .. }
        )
    }
}

/// Result type alias for orchestration operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Error response for API endpoints
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    pub retryable: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<EngineError> for ErrorResponse {
    fn from(err: EngineError) -> Self {
        Self {
            error: err.to_string(),
            code: err.status_code(),
            retryable: err.is_retryable(),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::InternalError {
            reason: err.to_string(),
        }
    }
}
