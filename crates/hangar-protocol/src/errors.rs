//! Error codes carried in `error` payloads.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of codes a client can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Frame was not a valid JSON envelope.
    InvalidJson,
    /// Envelope was valid but its payload did not match the message type.
    InvalidPayload,
    /// `type` is not part of the protocol.
    UnknownType,
    /// Operation requires an authenticated connection.
    Unauthenticated,
    /// No handler is registered for this message type.
    HandlerUnavailable,
    /// `task.action` named an action the task handler does not support.
    UnknownAction,
    /// The referenced task or session does not exist.
    NotFound,
    /// A domain callback failed.
    ActionFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidJson => "INVALID_JSON",
            ErrorCode::InvalidPayload => "INVALID_PAYLOAD",
            ErrorCode::UnknownType => "UNKNOWN_TYPE",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::HandlerUnavailable => "HANDLER_UNAVAILABLE",
            ErrorCode::UnknownAction => "UNKNOWN_ACTION",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ActionFailed => "ACTION_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
