//! Container runtime error types.

use thiserror::Error;

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

#[derive(Debug, Error)]
pub enum ContainerError {
    /// Container name failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The runtime binary could not be started.
    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// The child process did not expose the expected pipe.
    #[error("container exec has no {0} pipe")]
    MissingPipe(&'static str),
}
