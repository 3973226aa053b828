//! Extension points injected into the gateway.
//!
//! The gateway performs no credential checks and knows nothing about tasks or
//! sessions. It holds at most one implementation of each trait; setting a new
//! one replaces the previous.

use async_trait::async_trait;
use hangar_protocol::payloads::{SessionExecPayload, TaskActionPayload};

use super::client::Client;
use super::error::ActionError;

/// Validates the token carried by an `auth` message.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns the authenticated user id.
    async fn authenticate(&self, token: &str) -> anyhow::Result<String>;
}

/// Handles `task.action` messages.
#[async_trait]
pub trait TaskActionHandler: Send + Sync {
    async fn handle_task_action(
        &self,
        client: &Client,
        request: TaskActionPayload,
    ) -> Result<(), ActionError>;
}

/// Handles `session.exec` messages.
#[async_trait]
pub trait SessionExecHandler: Send + Sync {
    async fn handle_session_exec(
        &self,
        client: &Client,
        request: SessionExecPayload,
    ) -> Result<(), ActionError>;
}
