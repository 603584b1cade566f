//! Room service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl.
//! Internal failures are logged server-side and returned as a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Room registry error type.
///
/// Maps to HTTP status codes:
/// - AlreadyExists, Conflict: 409
/// - NotFound: 404
/// - Unauthorized: 401
/// - Forbidden, Locked: 403
/// - BadRequest: 400
/// - Unavailable: 503
/// - Internal: 500
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("Room already exists")]
    AlreadyExists,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Room is locked")]
    Locked,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Registry is shutting down")]
    Unavailable,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoomError {
    /// Shorthand for the common "room not found" case.
    pub(crate) fn room_not_found() -> Self {
        Self::NotFound("Room not found".to_string())
    }

    /// Returns the HTTP status code for this error (for metrics recording).
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            RoomError::AlreadyExists | RoomError::Conflict(_) => 409,
            RoomError::NotFound(_) => 404,
            RoomError::Unauthorized(_) => 401,
            RoomError::Forbidden(_) | RoomError::Locked => 403,
            RoomError::BadRequest(_) => 400,
            RoomError::Unavailable => 503,
            RoomError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code returned in error bodies.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            RoomError::AlreadyExists => "ALREADY_EXISTS",
            RoomError::NotFound(_) => "NOT_FOUND",
            RoomError::Unauthorized(_) => "UNAUTHORIZED",
            RoomError::Forbidden(_) => "FORBIDDEN",
            RoomError::Locked => "ROOM_LOCKED",
            RoomError::Conflict(_) => "CONFLICT",
            RoomError::BadRequest(_) => "BAD_REQUEST",
            RoomError::Unavailable => "SERVICE_UNAVAILABLE",
            RoomError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match &self {
            RoomError::AlreadyExists => "Room already exists".to_string(),
            RoomError::NotFound(what) => what.clone(),
            RoomError::Unauthorized(reason)
            | RoomError::Forbidden(reason)
            | RoomError::Conflict(reason)
            | RoomError::BadRequest(reason) => reason.clone(),
            RoomError::Locked => "Room is locked".to_string(),
            RoomError::Unavailable => "Service temporarily unavailable".to_string(),
            RoomError::Internal(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "rs.errors", error = %err, "Internal error");
                "An internal error occurred".to_string()
            }
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}
