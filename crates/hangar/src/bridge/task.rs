//! Task event forwarding.
//!
//! Relays a task's events onto the `task` channel (topic = task id) and
//! handles `task.action` requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use hangar_protocol::channels;
use hangar_protocol::events::task_actions;
use hangar_protocol::payloads::{AppendTurnData, TaskActionPayload};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::collaborators::{CreateTaskRequest, EventSubscription, TaskManager};
use crate::gateway::{ActionError, Client, Gateway, TaskActionHandler};

/// A running forwarder. The id tells a finished worker whether the map entry
/// is still its own.
struct Worker {
    id: u64,
    token: CancellationToken,
}

type Workers = Arc<Mutex<HashMap<String, Worker>>>;

/// Forwards task events to gateway subscribers. At most one forwarder runs
/// per task.
pub struct TaskEventBridge {
    gateway: Arc<Gateway>,
    tasks: Arc<dyn TaskManager>,
    workers: Workers,
    next_worker_id: AtomicU64,
}

impl TaskEventBridge {
    pub fn new(gateway: Arc<Gateway>, tasks: Arc<dyn TaskManager>) -> Self {
        Self {
            gateway,
            tasks,
            workers: Arc::new(Mutex::new(HashMap::new())),
            next_worker_id: AtomicU64::new(1),
        }
    }

    /// Start forwarding a task's events. Returns `false` if a forwarder was
    /// already running for it.
    ///
    /// The forwarder stops on a terminal event, when the event source closes,
    /// on [`TaskEventBridge::stop_forwarding`] or when the gateway stops.
    pub async fn start_forwarding(&self, task_id: &str) -> Result<bool> {
        Ok(self.spawn_worker(task_id).await?.is_some())
    }

    /// Spawn a forwarder unless one is running. Returns the new worker's id.
    async fn spawn_worker(&self, task_id: &str) -> Result<Option<u64>> {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let token = self.gateway.shutdown_token();

        {
            let mut workers = self.workers.lock();
            if workers.contains_key(task_id) {
                debug!("Task {} is already being forwarded", task_id);
                return Ok(None);
            }
            // Claim the slot before subscribing so concurrent callers back off.
            workers.insert(
                task_id.to_string(),
                Worker {
                    id: worker_id,
                    token: token.clone(),
                },
            );
        }

        let subscription = match self.tasks.subscribe_events(task_id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                release(&self.workers, task_id, worker_id);
                return Err(e).with_context(|| format!("subscribing to task {task_id}"));
            }
        };

        tokio::spawn(forward_task_events(
            Arc::clone(&self.gateway),
            Arc::clone(&self.tasks),
            Arc::clone(&self.workers),
            task_id.to_string(),
            worker_id,
            subscription,
            token,
        ));

        info!("Forwarding events for task {}", task_id);
        Ok(Some(worker_id))
    }

    /// Cancel the forwarder `worker_id` if it still owns `task_id`'s slot.
    fn abort_worker(&self, task_id: &str, worker_id: u64) {
        let mut workers = self.workers.lock();
        if !workers.get(task_id).is_some_and(|w| w.id == worker_id) {
            return;
        }
        if let Some(worker) = workers.remove(task_id) {
            worker.token.cancel();
            debug!("Abandoned forwarder for task {}", task_id);
        }
    }

    /// Stop a task's forwarder. Returns `false` if none was running.
    pub fn stop_forwarding(&self, task_id: &str) -> bool {
        match self.workers.lock().remove(task_id) {
            Some(worker) => {
                worker.token.cancel();
                info!("Stopped forwarding events for task {}", task_id);
                true
            }
            None => false,
        }
    }

    /// Stop every forwarder.
    pub fn stop_all(&self) {
        let workers: Vec<Worker> = self.workers.lock().drain().map(|(_, w)| w).collect();
        for worker in &workers {
            worker.token.cancel();
        }
    }

    pub fn is_forwarding(&self, task_id: &str) -> bool {
        self.workers.lock().contains_key(task_id)
    }

    pub fn active_count(&self) -> usize {
        self.workers.lock().len()
    }

    async fn append_turn(&self, task_id: &str, data: serde_json::Value) -> Result<(), ActionError> {
        let data: AppendTurnData = serde_json::from_value(data)
            .map_err(|e| ActionError::invalid_payload(format!("append_turn data: {e}")))?;
        if data.prompt.trim().is_empty() {
            return Err(ActionError::invalid_payload("prompt must not be empty"));
        }

        // Subscribe first so the new turn's own events are not missed.
        let started = self.spawn_worker(task_id).await?;
        let created = self
            .tasks
            .create_task(CreateTaskRequest {
                task_id: Some(task_id.to_string()),
                prompt: data.prompt,
            })
            .await;
        let task = match created {
            Ok(task) => task,
            Err(e) => {
                // Nothing will flow for a turn that was never created.
                if let Some(worker_id) = started {
                    self.abort_worker(task_id, worker_id);
                }
                return Err(e.into());
            }
        };

        info!("Appended turn {} to task {}", task.turns.len(), task.id);
        Ok(())
    }
}

/// Remove `task_id`'s entry if it still belongs to `worker_id`.
fn release(workers: &Workers, task_id: &str, worker_id: u64) {
    let mut workers = workers.lock();
    if workers.get(task_id).is_some_and(|w| w.id == worker_id) {
        workers.remove(task_id);
    }
}

async fn forward_task_events(
    gateway: Arc<Gateway>,
    tasks: Arc<dyn TaskManager>,
    workers: Workers,
    task_id: String,
    worker_id: u64,
    mut subscription: EventSubscription,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = subscription.events.recv() => event,
        };
        let Some(event) = event else {
            debug!("Event source for task {} closed", task_id);
            break;
        };

        let terminal = event.is_terminal();
        let delivered =
            gateway.broadcast_event(channels::TASK, &task_id, &event.event_type, event.data);
        debug!(
            "Task {} event {} delivered to {} client(s)",
            task_id, event.event_type, delivered
        );

        if terminal {
            break;
        }
    }

    tasks.unsubscribe_events(&task_id, subscription.id).await;
    release(&workers, &task_id, worker_id);
    debug!("Forwarder for task {} exited", task_id);
}

#[async_trait]
impl TaskActionHandler for TaskEventBridge {
    async fn handle_task_action(
        &self,
        client: &Client,
        request: TaskActionPayload,
    ) -> Result<(), ActionError> {
        if request.task_id.is_empty() {
            return Err(ActionError::invalid_payload("task_id must not be empty"));
        }

        match request.action.as_str() {
            task_actions::CANCEL => {
                self.tasks.cancel_task(&request.task_id).await?;
                info!(
                    "Client {} cancelled task {}",
                    client.id(),
                    request.task_id
                );
                Ok(())
            }
            task_actions::APPEND_TURN => self.append_turn(&request.task_id, request.data).await,
            other => {
                warn!("Client {} sent unknown task action {:?}", client.id(), other);
                Err(ActionError::UnknownAction(other.to_string()))
            }
        }
    }
}
