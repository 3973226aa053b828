//! Interfaces the bridges consume.
//!
//! Task execution and container sessions live elsewhere; the bridges only
//! need to subscribe to their output and trigger a few operations.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hangar_protocol::events;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// One event emitted by a running task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    /// Unix ms timestamp.
    #[serde(default)]
    pub timestamp: i64,
}

impl TaskEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Completed, failed or cancelled.
    pub fn is_terminal(&self) -> bool {
        events::task::is_terminal(&self.event_type)
    }
}

/// A live subscription to one task's events.
///
/// The receiver closes when the task manager drops the subscription.
#[derive(Debug)]
pub struct EventSubscription {
    pub id: u64,
    pub events: mpsc::Receiver<TaskEvent>,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// A task as reported by the task manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    /// Prompts submitted so far, first turn included.
    pub turns: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Start a task, or append a turn to an existing one when `task_id` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub task_id: Option<String>,
    pub prompt: String,
}

/// Task execution backend.
#[async_trait]
pub trait TaskManager: Send + Sync {
    /// Subscribe to a task's events.
    async fn subscribe_events(&self, task_id: &str) -> Result<EventSubscription>;

    /// Drop a subscription. Unknown ids are ignored.
    async fn unsubscribe_events(&self, task_id: &str, subscription_id: u64);

    /// Cancel a running task.
    async fn cancel_task(&self, task_id: &str) -> Result<()>;

    /// Start a task, or continue one (see [`CreateTaskRequest`]).
    async fn create_task(&self, request: CreateTaskRequest) -> Result<Task>;
}

/// A command started inside a session.
#[derive(Debug)]
pub struct Execution {
    pub exec_id: String,
    /// One item per output line; closes when the command exits.
    pub output: mpsc::Receiver<String>,
}

/// Session (container) execution backend.
#[async_trait]
pub trait SessionManager: Send + Sync {
    async fn execute(&self, session_id: &str, command: &str) -> Result<Execution>;
}
