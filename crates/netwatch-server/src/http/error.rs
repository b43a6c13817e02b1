use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use netwatch_results::ResultsError;
use netwatch_scheduler::{SchedulerError, StoreError};
use serde_json::json;
use tracing::error;

/// Handler error rendered as `{"error": "..."}` with a matching status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        error!("request failed: {err}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::JobNotFound { .. } => Self::not_found(err.to_string()),
            other => Self::internal(other),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::InvalidInterval { .. } => {
                Self::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            SchedulerError::Store(store) => store.into(),
            other => Self::internal(other),
        }
    }
}

impl From<ResultsError> for ApiError {
    fn from(err: ResultsError) -> Self {
        Self::internal(err)
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
