//! Typed payloads for each message type.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ErrorCode;

// ============================================================================
// Connection
// ============================================================================

/// `auth` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
    #[serde(default)]
    pub device_id: String,
}

/// `auth.result` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResultPayload {
    pub success: bool,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `error` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

/// `subscribe` / `unsubscribe` request and the matching `subscribed` /
/// `unsubscribed` ack. An empty topic list means the whole channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPayload {
    pub channel: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// `event` delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub channel: String,
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

// ============================================================================
// Domain actions
// ============================================================================

/// `task.action` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskActionPayload {
    pub task_id: String,
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

/// `data` of an `append_turn` task action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendTurnData {
    pub prompt: String,
}

/// `session.exec` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionExecPayload {
    pub session_id: String,
    pub command: String,
}

/// Kind of a session output event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutputKind {
    /// One line of command output.
    Message,
    /// The command's output source closed.
    Done,
}

/// `data` of a `session.output` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOutputPayload {
    pub session_id: String,
    pub exec_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: SessionOutputKind,
}

// ============================================================================
// Introspection
// ============================================================================

/// Body of `GET /api/v1/gateway/stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayStats {
    pub connected_clients: usize,
    /// Subscriber entries per channel.
    pub subscriptions: BTreeMap<String, usize>,
}
