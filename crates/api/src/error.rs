use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use testrig_models::{EngineError, ErrorResponse};

/// Response wrapper turning an [`EngineError`] into an HTTP error body
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError(EngineError::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(ErrorResponse::from(self.0))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
