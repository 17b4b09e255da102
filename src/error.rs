use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::models::api::ErrorResponse;
use crate::services::queue::QueueError;

/// Errors returned by route handlers, rendered as JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Server is currently busy. Please try again in a moment.")]
    QueueFull,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("The method is not allowed for the requested URL.")]
    MethodNotAllowed,

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn upload_too_large() -> Self {
        ApiError::PayloadTooLarge("File upload is too large.".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::RejectedFull { .. } => ApiError::QueueFull,
            QueueError::NotFound(_) => ApiError::NotFound("Job ID not found.".to_string()),
            QueueError::ResultUnavailable { status, .. } => ApiError::NotFound(format!(
                "No result available for this job. Current status: {status}"
            )),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}
