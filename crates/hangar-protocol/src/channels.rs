//! Reserved channel names and the wildcard topic.

/// Task execution events, topic = task id.
pub const TASK: &str = "task";

/// Session command output, topic = session id.
pub const SESSION: &str = "session";

/// Platform-wide notifications (resource creation, alerts).
pub const SYSTEM: &str = "system";

/// Topic entry meaning "every topic on this channel".
pub const WILDCARD: &str = "*";

/// Fixed topics used on the system channel.
pub mod system_topics {
    pub const TASKS: &str = "tasks";
    pub const AGENTS: &str = "agents";
    pub const SESSIONS: &str = "sessions";
    pub const BATCHES: &str = "batches";
    pub const ALERTS: &str = "alerts";
}
