//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::TaskError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::SessionNotFound(id) => ApiError::NotFound(format!("Session {} not found", id)),
            TaskError::InvalidState(msg) => ApiError::Conflict(msg),
            err @ TaskError::InvalidDag(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::DagError;
    use uuid::Uuid;

    #[test]
    fn test_task_error_mapping() {
        let id = Uuid::new_v4();

        let response = ApiError::from(TaskError::SessionNotFound(id)).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response =
            ApiError::from(TaskError::InvalidState("done".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response =
            ApiError::from(TaskError::InvalidDag(DagError::DuplicateId("x".to_string())))
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
