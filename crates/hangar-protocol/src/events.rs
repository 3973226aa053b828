//! Event vocabulary published on the reserved channels.

/// Event types observed on the `task` channel.
pub mod task {
    pub const STARTED: &str = "task.started";
    pub const TURN_STARTED: &str = "task.turn_started";
    pub const AGENT_THINKING: &str = "agent.thinking";
    pub const AGENT_MESSAGE: &str = "agent.message";
    pub const TURN_COMPLETED: &str = "task.turn_completed";
    pub const COMPLETED: &str = "task.completed";
    pub const FAILED: &str = "task.failed";
    pub const CANCELLED: &str = "task.cancelled";

    /// Events after which a task produces nothing further.
    pub const TERMINAL: [&str; 3] = [COMPLETED, FAILED, CANCELLED];

    /// Whether `event_type` ends a task's lifecycle.
    pub fn is_terminal(event_type: &str) -> bool {
        TERMINAL.contains(&event_type)
    }
}

/// Event types published on the `session` channel.
pub mod session {
    pub const OUTPUT: &str = "session.output";
}

/// Event types published on the `system` channel.
pub mod system {
    pub const TASK_CREATED: &str = "task.created";
    pub const AGENT_CREATED: &str = "agent.created";
    pub const SESSION_CREATED: &str = "session.created";
    pub const BATCH_CREATED: &str = "batch.created";
    pub const ALERT: &str = "system.alert";
}

/// Actions accepted in `task.action` payloads.
pub mod task_actions {
    pub const CANCEL: &str = "cancel";
    pub const APPEND_TURN: &str = "append_turn";
}
