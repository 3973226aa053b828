//! Process-local task registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use hangar_protocol::events;
use log::{debug, info, warn};
use serde_json::json;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::bridge::{
    CreateTaskRequest, EventSubscription, SystemEventPublisher, Task, TaskEvent, TaskManager,
    TaskStatus,
};

/// Default per-subscriber event buffer.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

struct TaskRecord {
    task: Task,
    subscribers: HashMap<u64, mpsc::Sender<TaskEvent>>,
}

impl TaskRecord {
    /// Deliver without blocking. Full subscribers miss the event; closed ones
    /// are dropped.
    fn emit(&mut self, event: &TaskEvent) -> usize {
        let task_id = &self.task.id;
        let mut delivered = 0;
        self.subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Subscriber {} of task {} is full, dropping {}",
                    id, task_id, event.event_type
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        delivered
    }
}

/// Keeps tasks and their subscribers in memory.
///
/// Executors push progress through [`InMemoryTaskManager::publish`].
pub struct InMemoryTaskManager {
    tasks: DashMap<String, TaskRecord>,
    subscriber_capacity: usize,
    next_subscription_id: AtomicU64,
    notifier: Option<SystemEventPublisher>,
}

impl Default for InMemoryTaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskManager {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            next_subscription_id: AtomicU64::new(1),
            notifier: None,
        }
    }

    /// Announce newly created tasks on the system channel.
    pub fn with_notifier(mut self, notifier: SystemEventPublisher) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity.max(1);
        self
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).map(|record| record.task.clone())
    }

    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.iter().map(|r| r.task.clone()).collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// Push an event to a task's subscribers. Terminal events also settle the
    /// task's status.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, task_id: &str, event: TaskEvent) -> Result<usize> {
        let Some(mut record) = self.tasks.get_mut(task_id) else {
            bail!("task not found: {task_id}");
        };

        let status = match event.event_type.as_str() {
            events::task::COMPLETED => Some(TaskStatus::Completed),
            events::task::FAILED => Some(TaskStatus::Failed),
            events::task::CANCELLED => Some(TaskStatus::Cancelled),
            _ => None,
        };
        if let Some(status) = status {
            record.task.status = status;
        }
        record.task.updated_at = Utc::now();

        Ok(record.emit(&event))
    }

    fn start_task(&self, prompt: String) -> Task {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            status: TaskStatus::Running,
            turns: vec![prompt.clone()],
            created_at: now,
            updated_at: now,
        };

        let mut record = TaskRecord {
            task: task.clone(),
            subscribers: HashMap::new(),
        };
        record.emit(&TaskEvent::new(
            events::task::STARTED,
            json!({ "task_id": task.id, "prompt": prompt }),
        ));
        self.tasks.insert(task.id.clone(), record);

        if let Some(notifier) = &self.notifier {
            notifier.publish_task_created(&task);
        }
        info!("Created task {}", task.id);
        task
    }

    fn continue_task(&self, task_id: &str, prompt: String) -> Result<Task> {
        let Some(mut record) = self.tasks.get_mut(task_id) else {
            bail!("task not found: {task_id}");
        };
        if record.task.status == TaskStatus::Cancelled {
            bail!("task {task_id} was cancelled and cannot be continued");
        }

        record.task.turns.push(prompt.clone());
        record.task.status = TaskStatus::Running;
        record.task.updated_at = Utc::now();
        let turn = record.task.turns.len();
        record.emit(&TaskEvent::new(
            events::task::TURN_STARTED,
            json!({ "task_id": task_id, "turn": turn, "prompt": prompt }),
        ));

        debug!("Task {} turn {} started", task_id, turn);
        Ok(record.task.clone())
    }
}

#[async_trait]
impl TaskManager for InMemoryTaskManager {
    async fn subscribe_events(&self, task_id: &str) -> Result<EventSubscription> {
        let Some(mut record) = self.tasks.get_mut(task_id) else {
            bail!("task not found: {task_id}");
        };
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.subscriber_capacity);
        // A cancelled task never emits again; hand back an already-closed source.
        if record.task.status != TaskStatus::Cancelled {
            record.subscribers.insert(id, tx);
        }
        Ok(EventSubscription { id, events: rx })
    }

    async fn unsubscribe_events(&self, task_id: &str, subscription_id: u64) {
        if let Some(mut record) = self.tasks.get_mut(task_id) {
            record.subscribers.remove(&subscription_id);
        }
    }

    async fn cancel_task(&self, task_id: &str) -> Result<()> {
        let Some(mut record) = self.tasks.get_mut(task_id) else {
            bail!("task not found: {task_id}");
        };
        if record.task.status.is_finished() {
            bail!(
                "task {task_id} cannot be cancelled, it is already {:?}",
                record.task.status
            );
        }

        record.task.status = TaskStatus::Cancelled;
        record.task.updated_at = Utc::now();
        record.emit(&TaskEvent::new(
            events::task::CANCELLED,
            json!({ "task_id": task_id }),
        ));

        info!("Cancelled task {}", task_id);
        Ok(())
    }

    async fn create_task(&self, request: CreateTaskRequest) -> Result<Task> {
        if request.prompt.trim().is_empty() {
            bail!("prompt must not be empty");
        }
        match request.task_id {
            Some(task_id) => self.continue_task(&task_id, request.prompt),
            None => Ok(self.start_task(request.prompt)),
        }
    }
}
