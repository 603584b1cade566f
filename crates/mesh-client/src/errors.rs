//! Participant error types.
//!
//! Registry failures come back from the room service as
//! `{"error": {"code", "message"}}` and are mapped onto the same taxonomy the
//! service uses, so callers can match on `Locked` or `Forbidden` without
//! looking at HTTP status codes.

use crate::transport::TransportError;
use mesh_protocol::{CodecError, TransferError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
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

    #[error("Room service unavailable: {0}")]
    Unavailable(String),

    /// Operation not allowed in the participant's current admission state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("File transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Ban list storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Map a room service error body onto a typed error.
    ///
    /// The machine-readable `code` wins; the status is only consulted when the
    /// code is unknown.
    #[must_use]
    pub fn from_service(status: u16, code: &str, message: String) -> Self {
        match code {
            "ALREADY_EXISTS" => Self::AlreadyExists,
            "NOT_FOUND" => Self::NotFound(message),
            "UNAUTHORIZED" => Self::Unauthorized(message),
            "FORBIDDEN" => Self::Forbidden(message),
            "ROOM_LOCKED" => Self::Locked,
            "CONFLICT" => Self::Conflict(message),
            "BAD_REQUEST" => Self::BadRequest(message),
            "SERVICE_UNAVAILABLE" => Self::Unavailable(message),
            _ => match status {
                400 | 422 => Self::BadRequest(message),
                401 => Self::Unauthorized(message),
                403 => Self::Forbidden(message),
                404 => Self::NotFound(message),
                409 => Self::Conflict(message),
                503 => Self::Unavailable(message),
                _ => Self::Internal(format!("status {status}: {message}")),
            },
        }
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyExists => "already_exists",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Locked => "locked",
            Self::Conflict(_) => "conflict",
            Self::BadRequest(_) => "bad_request",
            Self::Unavailable(_) => "unavailable",
            Self::InvalidState(_) => "invalid_state",
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::Transfer(_) => "transfer",
            Self::Storage(_) => "storage",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}
