//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use pagepilot_core::AutomationError;

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Task not found.
    #[error("task not found: {0}")]
    TaskNotFound(uuid::Uuid),

    /// Result requested before the task reached a terminal state.
    #[error("task {0} has not finished")]
    ResultNotReady(uuid::Uuid),

    /// Task finished without a stored result.
    #[error("task {0} produced no result")]
    ResultMissing(uuid::Uuid),

    /// Engine-level failure.
    #[error(transparent)]
    Engine(#[from] AutomationError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::TaskNotFound(_) | ApiError::ResultMissing(_) => StatusCode::NOT_FOUND,
            ApiError::ResultNotReady(_) => StatusCode::CONFLICT,
            ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(ApiError::TaskNotFound(id).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::ResultNotReady(id).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::Engine(AutomationError::Internal("boom".to_string())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
