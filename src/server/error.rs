use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::designer::collaborator::CollaboratorError;
use crate::designer::orchestrator::OrchestratorError;
use crate::designer::session::SessionError;

/// Error envelope matching the wire contract:
/// `{ success: false, error, correlationId, retryAfter? }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub retry_after_seconds: Option<u64>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            retry_after_seconds: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            retry_after_seconds: None,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::CONFLICT,
            message: message.into(),
            retry_after_seconds: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            retry_after_seconds: None,
        }
    }
}

impl From<CollaboratorError> for ApiError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::RateLimited { retry_after } => ApiError {
                status: StatusCode::TOO_MANY_REQUESTS,
                message: "Image service quota exceeded. Please try again later.".to_string(),
                retry_after_seconds: Some(retry_after.map(|d| d.as_secs().max(1)).unwrap_or(60)),
            },
            other => ApiError {
                status: StatusCode::BAD_GATEWAY,
                message: format!("{other}. Please try again."),
                retry_after_seconds: None,
            },
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Collaborator(inner) => inner.into(),
            SessionError::Orchestrator(OrchestratorError::Busy) => {
                ApiError::conflict("Another request is already in flight for this session.")
            }
            SessionError::Orchestrator(inner) => ApiError::conflict(inner.to_string()),
            SessionError::Context(inner) => ApiError::conflict(inner.to_string()),
            SessionError::Cancelled => {
                ApiError::conflict("The session was reset while the request was in flight.")
            }
            SessionError::NoBaseImage => {
                ApiError::conflict("Upload a room photo before requesting changes.")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let correlation_id = format!("err-{}", Uuid::new_v4());
        error!(
            "API error: correlation_id={} status={} message={}",
            correlation_id, self.status, self.message
        );

        let mut body = json!({
            "success": false,
            "error": self.message,
            "correlationId": correlation_id,
        });
        if let Some(retry_after) = self.retry_after_seconds {
            body["retryAfter"] = json!(retry_after);
        }

        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rate_limits_map_to_429_with_a_retry_hint() {
        let err: ApiError = CollaboratorError::RateLimited {
            retry_after: Some(Duration::from_secs(37)),
        }
        .into();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.retry_after_seconds, Some(37));
    }

    #[test]
    fn generic_collaborator_failures_map_to_502() {
        let err: ApiError = CollaboratorError::NoPayload.into();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(err.retry_after_seconds.is_none());
    }

    #[test]
    fn busy_sessions_map_to_409() {
        let err: ApiError = SessionError::Orchestrator(OrchestratorError::Busy).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }
}
