//! Authentication errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Token failed signature or format checks.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    TokenExpired,

    /// `dev:<user>` token for a user not in `dev_users`.
    #[error("unknown dev user: {0}")]
    UnknownDevUser(String),

    /// No secret configured outside dev mode.
    #[error("jwt_secret is required when dev_mode is false")]
    MissingJwtSecret,

    #[error("jwt_secret must be at least {0} characters long")]
    JwtSecretTooShort(usize),

    /// `env:VAR` indirection pointed at an unset variable.
    #[error("environment variable '{0}' not found (referenced via env:{0})")]
    EnvVarNotFound(String),

    #[error("environment variable '{0}' is empty (referenced via env:{0})")]
    EnvVarEmpty(String),

    #[error("internal auth error: {0}")]
    Internal(String),
}
