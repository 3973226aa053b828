//! Message envelope.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// Message types
// ============================================================================

/// Every `type` value the gateway understands.
///
/// Inbound: `ping`, `auth`, `subscribe`, `unsubscribe`, `task.action`, `session.exec`.
/// Outbound: `pong`, `auth.result`, `subscribed`, `unsubscribed`, `event`, `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Ping,
    Pong,
    Auth,
    AuthResult,
    Subscribe,
    Subscribed,
    Unsubscribe,
    Unsubscribed,
    Event,
    Error,
    TaskAction,
    SessionExec,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Auth => "auth",
            MessageType::AuthResult => "auth.result",
            MessageType::Subscribe => "subscribe",
            MessageType::Subscribed => "subscribed",
            MessageType::Unsubscribe => "unsubscribe",
            MessageType::Unsubscribed => "unsubscribed",
            MessageType::Event => "event",
            MessageType::Error => "error",
            MessageType::TaskAction => "task.action",
            MessageType::SessionExec => "session.exec",
        }
    }

    /// Resolve a wire `type` string. Returns `None` for anything outside the catalog.
    pub fn parse(value: &str) -> Option<Self> {
        let kind = match value {
            "ping" => MessageType::Ping,
            "pong" => MessageType::Pong,
            "auth" => MessageType::Auth,
            "auth.result" => MessageType::AuthResult,
            "subscribe" => MessageType::Subscribe,
            "subscribed" => MessageType::Subscribed,
            "unsubscribe" => MessageType::Unsubscribe,
            "unsubscribed" => MessageType::Unsubscribed,
            "event" => MessageType::Event,
            "error" => MessageType::Error,
            "task.action" => MessageType::TaskAction,
            "session.exec" => MessageType::SessionExec,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// The wire-level unit exchanged over a gateway connection.
///
/// `kind` stays a plain string so that frames with an unknown `type` still
/// parse and can be answered with an `error` instead of being dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub payload: Value,

    /// Unix ms timestamp.
    #[serde(default)]
    pub timestamp: i64,
}

impl Message {
    /// Build a message with a fresh id and the current timestamp.
    pub fn new(kind: MessageType, payload: impl Serialize) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), kind, payload)
    }

    /// Build a message that answers a request, reusing its id.
    pub fn reply(request_id: &str, kind: MessageType, payload: impl Serialize) -> Self {
        let id = if request_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            request_id.to_string()
        };
        Self::with_id(id, kind, payload)
    }

    fn with_id(id: String, kind: MessageType, payload: impl Serialize) -> Self {
        Self {
            id,
            kind: kind.as_str().to_string(),
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// The catalogued type of this message, if it has one.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::parse(&self.kind)
    }

    /// Decode the payload into a typed struct.
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        // A missing payload decodes like an empty object so structs with
        // all-default fields still parse.
        match &self.payload {
            Value::Null => serde_json::from_value(Value::Object(Default::default())),
            other => T::deserialize(other),
        }
    }
}
