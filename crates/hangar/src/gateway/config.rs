//! Gateway tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outbound queue capacity per connection.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Largest inbound frame accepted (64 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Connections without inbound traffic for this long are dropped.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 60_000;

/// Deadline for a single outbound write.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;

/// Keepalive ping interval when the writer is idle.
pub const DEFAULT_PING_INTERVAL_MS: u64 = 30_000;

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Outbound queue capacity; a full queue disconnects the client.
    pub queue_capacity: usize,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
    /// Idle read deadline, renewed on every frame (including pongs).
    pub read_timeout_ms: u64,
    /// Per-write deadline.
    pub write_timeout_ms: u64,
    /// Idle keepalive interval.
    pub ping_interval_ms: u64,
    /// Reject `task.action` / `session.exec` from unauthenticated connections.
    pub require_auth_for_actions: bool,
}

impl GatewayConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            require_auth_for_actions: false,
        }
    }
}
