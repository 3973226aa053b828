//! Platform-wide notifications on the `system` channel.

use std::sync::Arc;

use hangar_protocol::channels::{self, system_topics};
use hangar_protocol::events::system;
use log::warn;
use serde::Serialize;

use crate::gateway::Gateway;

/// Publishes resource-creation notices and alerts.
///
/// Each method returns how many clients the event was queued for.
#[derive(Clone)]
pub struct SystemEventPublisher {
    gateway: Arc<Gateway>,
}

impl SystemEventPublisher {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub fn publish_task_created(&self, task: impl Serialize) -> usize {
        self.publish(system_topics::TASKS, system::TASK_CREATED, task)
    }

    pub fn publish_agent_created(&self, agent: impl Serialize) -> usize {
        self.publish(system_topics::AGENTS, system::AGENT_CREATED, agent)
    }

    pub fn publish_session_created(&self, session: impl Serialize) -> usize {
        self.publish(system_topics::SESSIONS, system::SESSION_CREATED, session)
    }

    pub fn publish_batch_created(&self, batch: impl Serialize) -> usize {
        self.publish(system_topics::BATCHES, system::BATCH_CREATED, batch)
    }

    pub fn publish_alert(&self, alert: impl Serialize) -> usize {
        self.publish(system_topics::ALERTS, system::ALERT, alert)
    }

    fn publish(&self, topic: &str, event_type: &str, data: impl Serialize) -> usize {
        match serde_json::to_value(data) {
            Ok(data) => self
                .gateway
                .broadcast_event(channels::SYSTEM, topic, event_type, data),
            Err(e) => {
                warn!("Failed to encode {} notification: {}", event_type, e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayConfig;
    use hangar_protocol::Message;
    use serde_json::json;

    #[test]
    fn test_each_notice_uses_its_topic_and_event() {
        let gateway = Arc::new(Gateway::new(GatewayConfig::default()));
        gateway.start();
        let (client, mut rx) = gateway.connect().unwrap();
        gateway.subscribe(&client, channels::SYSTEM, &[]).unwrap();
        let publisher = SystemEventPublisher::new(Arc::clone(&gateway));

        assert_eq!(publisher.publish_task_created(json!({"id": "t1"})), 1);
        assert_eq!(publisher.publish_agent_created(json!({"id": "a1"})), 1);
        assert_eq!(publisher.publish_session_created(json!({"id": "s1"})), 1);
        assert_eq!(publisher.publish_batch_created(json!({"id": "b1"})), 1);
        assert_eq!(publisher.publish_alert(json!({"level": "warn"})), 1);

        let expected = [
            ("tasks", "task.created"),
            ("agents", "agent.created"),
            ("sessions", "session.created"),
            ("batches", "batch.created"),
            ("alerts", "system.alert"),
        ];
        for (topic, event) in expected {
            let frame = rx.try_recv().unwrap();
            let msg: Message = serde_json::from_str(&frame).unwrap();
            assert_eq!(msg.payload["channel"], "system");
            assert_eq!(msg.payload["topic"], topic);
            assert_eq!(msg.payload["event"], event);
        }
    }

    #[test]
    fn test_topic_filter_applies_to_system_channel() {
        let gateway = Arc::new(Gateway::new(GatewayConfig::default()));
        gateway.start();
        let (client, mut rx) = gateway.connect().unwrap();
        gateway
            .subscribe(&client, channels::SYSTEM, &["alerts".to_string()])
            .unwrap();
        let publisher = SystemEventPublisher::new(gateway);

        assert_eq!(publisher.publish_task_created(json!({"id": "t1"})), 0);
        assert_eq!(publisher.publish_alert(json!({"msg": "disk full"})), 1);
        let msg: Message = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(msg.payload["data"]["msg"], "disk full");
    }
}
