//! Container-backed sessions.
//!
//! A session is a running Docker or Podman container; its name is the
//! session id. Commands run through `<runtime> exec`.

mod error;
mod session;

pub use error::{ContainerError, ContainerResult};
pub use session::ContainerSessionManager;

use serde::{Deserialize, Serialize};

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    Docker,
    #[default]
    Podman,
}

impl RuntimeType {
    pub fn default_binary(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.default_binary())
    }
}

/// `[container]` config section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub runtime: RuntimeType,
    /// Runtime binary override (path or name). Defaults to the runtime's name.
    pub binary: Option<String>,
}

impl ContainerConfig {
    pub fn binary(&self) -> String {
        self.binary
            .clone()
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| self.runtime.default_binary().to_string())
    }
}

/// Validate a container ID or name before passing it to the runtime.
///
/// IDs are hex; names are alphanumeric plus `-`, `_` and `.`, and may not
/// start with `-` so they are never read as a flag.
pub fn validate_container_name(name: &str) -> ContainerResult<()> {
    if name.is_empty() {
        return Err(ContainerError::InvalidInput(
            "container name cannot be empty".to_string(),
        ));
    }

    if name.len() > 128 {
        return Err(ContainerError::InvalidInput(
            "container name exceeds maximum length".to_string(),
        ));
    }

    if name.starts_with('-') {
        return Err(ContainerError::InvalidInput(format!(
            "container name '{}' cannot start with '-'",
            name
        )));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    if !name.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "container name '{}' contains invalid characters",
            name
        )));
    }

    Ok(())
}
