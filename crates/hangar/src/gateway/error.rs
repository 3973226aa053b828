//! Gateway error types.

use hangar_protocol::ErrorCode;
use thiserror::Error;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors raised by the gateway itself.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The client is not (or no longer) registered.
    #[error("client not registered: {0}")]
    ClientNotFound(String),

    /// The gateway has been stopped and refuses new work.
    #[error("gateway is not accepting connections")]
    NotAccepting,

    /// A subscribe/unsubscribe request named no channel.
    #[error("channel must not be empty")]
    EmptyChannel,
}

/// Errors returned by the domain callbacks (`task.action`, `session.exec`).
///
/// Every variant is reported back to the originating client as an `error`
/// message; none of them closes the connection.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    /// Protocol code sent to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidPayload(_) => ErrorCode::InvalidPayload,
            Self::UnknownAction(_) => ErrorCode::UnknownAction,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Failed(_) => ErrorCode::ActionFailed,
        }
    }

    /// Categorize a collaborator error by its message.
    ///
    /// - "not found" -> NotFound
    /// - "invalid" / "must be" / "cannot" -> InvalidPayload
    /// - anything else -> Failed
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        let msg = err.to_string();
        let msg_lower = msg.to_lowercase();

        if msg_lower.contains("not found") {
            ActionError::NotFound(msg)
        } else if msg_lower.contains("invalid")
            || msg_lower.contains("must be")
            || msg_lower.contains("cannot")
        {
            ActionError::InvalidPayload(msg)
        } else {
            ActionError::Failed(msg)
        }
    }
}

impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        Self::from_anyhow(err)
    }
}
