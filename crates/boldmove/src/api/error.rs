//! Unified API error handling with structured responses.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::error::GameError;

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Domain failure from the coordinator; keeps its own machine code.
    #[error(transparent)]
    Game(#[from] GameError),

    /// Request body that could not be read as the expected JSON.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Result type for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Game(err) => match err {
                GameError::Validation(_) => StatusCode::BAD_REQUEST,
                GameError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                GameError::CapacityExceeded { .. }
                | GameError::SessionClosed(_)
                | GameError::AlreadyJoined { .. }
                | GameError::NotInProgress(_)
                | GameError::InvalidTransition { .. } => StatusCode::CONFLICT,
                GameError::NotAMember { .. } | GameError::NotHost { .. } => StatusCode::FORBIDDEN,
                GameError::GenerationExhausted(_) | GameError::Storage(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Game(err) => err.code(),
            Self::BadRequest(_) => "BAD_REQUEST",
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            Self::Game(err) if err.is_retryable() => Some("retryable".to_string()),
            _ => None,
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        // Log errors appropriately
        if status.is_server_error() {
            if status == StatusCode::SERVICE_UNAVAILABLE {
                warn!(error_code = code, message = %message, "Service unavailable");
            } else {
                error!(error_code = code, message = %message, "API error");
            }
        } else {
            tracing::debug!(error_code = code, message = %message, "Client error");
        }

        let body = ErrorResponse {
            details: self.details(),
            error: message,
            code,
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::StorageError;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn body_of(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_capacity_maps_to_conflict() {
        let (status, body) = body_of(
            GameError::CapacityExceeded {
                session_id: "game-1".to_string(),
                capacity: 8,
            }
            .into(),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "CAPACITY_EXCEEDED");
        assert_eq!(body["error"], "session game-1 is full (capacity 8)");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (GameError::validation("bad").into(), StatusCode::BAD_REQUEST),
            (
                GameError::SessionNotFound("x".to_string()).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                GameError::NotHost {
                    session_id: "x".to_string(),
                    identity: "y".to_string(),
                }
                .into(),
                StatusCode::FORBIDDEN,
            ),
            (
                GameError::GenerationExhausted(16).into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::BadRequest("nope".to_string()),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status_code(), expected, "{err}");
        }
    }

    #[tokio::test]
    async fn test_retryable_errors_carry_details() {
        let err: ApiError = GameError::Storage(StorageError::Backend("down".to_string())).into();
        let (status, body) = body_of(err).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "STORAGE_ERROR");
        assert_eq!(body["details"], "retryable");
    }
}
