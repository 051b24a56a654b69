//! Error types for quadrpc.
//!
//! `RpcError` is the structured error returned to callers. `Status` is its
//! cloneable, serializable projection, used wherever an error has to travel
//! through a Message Channel or across the wire and be rebuilt on the other side.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for quadrpc operations.
#[derive(Debug, Error)]
pub enum RpcError {
    // Transport errors
    #[error("Transport failure: {message}")]
    TransportFailure { message: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Stream contract errors
    #[error("Stream closed: {message}")]
    StreamClosed { message: String },

    #[error("Cardinality violation: {message}")]
    CardinalityViolation { message: String },

    // Time and cancellation
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Call cancelled")]
    Cancelled,

    // Application errors
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Unimplemented: {message}")]
    Unimplemented { message: String },

    #[error("Codec error: {message}")]
    Codec { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result type alias for quadrpc operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Wire-level status code for a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Unavailable,
    StreamClosed,
    CardinalityViolation,
    DeadlineExceeded,
    Cancelled,
    InvalidArgument,
    Unimplemented,
    Internal,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Unavailable => "unavailable",
            StatusCode::StreamClosed => "stream_closed",
            StatusCode::CardinalityViolation => "cardinality_violation",
            StatusCode::DeadlineExceeded => "deadline_exceeded",
            StatusCode::Cancelled => "cancelled",
            StatusCode::InvalidArgument => "invalid_argument",
            StatusCode::Unimplemented => "unimplemented",
            StatusCode::Internal => "internal",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal error status of a call, as carried over a channel or the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// Conversion implementations for common error types

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<Status> for RpcError {
    fn from(status: Status) -> Self {
        let message = status.message;
        match status.code {
            StatusCode::Unavailable => RpcError::TransportFailure { message },
            StatusCode::StreamClosed => RpcError::StreamClosed { message },
            StatusCode::CardinalityViolation => RpcError::CardinalityViolation { message },
            StatusCode::DeadlineExceeded => RpcError::DeadlineExceeded,
            StatusCode::Cancelled => RpcError::Cancelled,
            StatusCode::InvalidArgument => RpcError::InvalidArgument { message },
            StatusCode::Unimplemented => RpcError::Unimplemented { message },
            StatusCode::Internal => RpcError::Internal { message },
        }
    }
}

impl RpcError {
    /// Shorthand for an `InvalidArgument` error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        RpcError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Shorthand for a `TransportFailure` error.
    pub fn transport(message: impl Into<String>) -> Self {
        RpcError::TransportFailure {
            message: message.into(),
        }
    }

    /// Map onto the wire-level status code.
    ///
    /// IO and JSON failures belong to the connection, not the call, so they
    /// surface as `Unavailable`. Codec failures on a single payload are
    /// reported as `Internal`.
    pub fn code(&self) -> StatusCode {
        match self {
            RpcError::TransportFailure { .. } | RpcError::Io { .. } | RpcError::Json { .. } => {
                StatusCode::Unavailable
            }
            RpcError::StreamClosed { .. } => StatusCode::StreamClosed,
            RpcError::CardinalityViolation { .. } => StatusCode::CardinalityViolation,
            RpcError::DeadlineExceeded => StatusCode::DeadlineExceeded,
            RpcError::Cancelled => StatusCode::Cancelled,
            RpcError::InvalidArgument { .. } => StatusCode::InvalidArgument,
            RpcError::Unimplemented { .. } => StatusCode::Unimplemented,
            RpcError::Codec { .. } | RpcError::Internal { .. } => StatusCode::Internal,
        }
    }

    /// Project this error onto a `Status` for transmission.
    pub fn to_status(&self) -> Status {
        let message = match self {
            RpcError::TransportFailure { message }
            | RpcError::Io { message, .. }
            | RpcError::Json { message, .. }
            | RpcError::StreamClosed { message }
            | RpcError::CardinalityViolation { message }
            | RpcError::InvalidArgument { message }
            | RpcError::Unimplemented { message }
            | RpcError::Codec { message }
            | RpcError::Internal { message } => message.clone(),
            RpcError::DeadlineExceeded | RpcError::Cancelled => self.to_string(),
        };
        Status::new(self.code(), message)
    }

    /// Deadline expiry must stay distinguishable from transport failure.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, RpcError::DeadlineExceeded)
    }

    /// Whether the failure belongs to the connection rather than the call.
    pub fn is_transport(&self) -> bool {
        self.code() == StatusCode::Unavailable
    }
}
