//! API error types and HTTP response mapping.
//!
//! All errors serialize as `{"error": string}`. Status mapping: 400 for bad
//! request bodies, 404 for missing sessions/components, 409 for
//! precondition-class failures (already populated, still initializing), 500
//! for everything else including lock contention and transport failures.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use autodev_core::Error as CoreError;
use autodev_engine::SessionError;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    /// Human-readable error message.
    pub error: String,
}

/// HTTP API error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Returns an error response for invalid input (400).
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Returns an error response for missing resources (404).
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Returns an error response for failed preconditions (409).
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// Returns an internal error response (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(value: SessionError) -> Self {
        let message = value.to_string();
        match value {
            SessionError::NotFound { .. } | SessionError::ComponentNotFound { .. } => {
                Self::not_found(message)
            }
            SessionError::AlreadyPopulated { .. } | SessionError::StillInitializing { .. } => {
                Self::conflict(message)
            }
            SessionError::UnsupportedComponent { .. } => Self::bad_request(message),
            SessionError::NoPods { .. }
            | SessionError::AmbiguousPods { .. }
            | SessionError::Core(_) => Self::internal(message),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(value: CoreError) -> Self {
        let message = value.to_string();
        match value {
            CoreError::InvalidInput(_) => Self::bad_request(message),
            _ => Self::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_status_mapping() {
        let missing = ApiError::from(SessionError::NotFound {
            session_id: "session-x".into(),
        });
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let populated = ApiError::from(SessionError::AlreadyPopulated {
            session_id: "session-x".into(),
        });
        assert_eq!(populated.status(), StatusCode::CONFLICT);

        let initializing = ApiError::from(SessionError::StillInitializing {
            session_id: "session-x".into(),
        });
        assert_eq!(initializing.status(), StatusCode::CONFLICT);

        let unsupported = ApiError::from(SessionError::UnsupportedComponent {
            kind: "gpu".into(),
        });
        assert_eq!(unsupported.status(), StatusCode::BAD_REQUEST);

        let transport = ApiError::from(SessionError::Core(CoreError::transport("kv down")));
        assert_eq!(transport.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_contention_surfaces_as_internal() {
        let error = ApiError::from(CoreError::Contention {
            name: "session-x".into(),
            message: "backoff budget exhausted".into(),
        });
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
