//! The gateway hub.
//!
//! Owns the client registry and the reverse subscription index, dispatches
//! inbound messages and fans events out to subscribers.
//!
//! Lock order: the subscription index is always taken before a client's own
//! locks. Sends never happen while the index lock is held, because a send can
//! close a slow client and closing re-enters the index through `unregister`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::WebSocket;
use dashmap::DashMap;
use futures::StreamExt;
use hangar_protocol::channels::WILDCARD;
use hangar_protocol::payloads::{
    AuthPayload, AuthResultPayload, EventPayload, GatewayStats, SessionExecPayload,
    SubscriptionPayload, TaskActionPayload,
};
use hangar_protocol::{ErrorCode, Message, MessageType};
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::client::{Client, Frame};
use super::config::GatewayConfig;
use super::error::{GatewayError, GatewayResult};
use super::handler::{Authenticator, SessionExecHandler, TaskActionHandler};

/// topic -> connection id -> client
type TopicIndex = HashMap<String, HashMap<String, Arc<Client>>>;

/// The WebSocket gateway.
pub struct Gateway {
    config: GatewayConfig,
    /// connection id -> client
    clients: DashMap<String, Arc<Client>>,
    /// channel -> topic -> subscribers
    subscriptions: RwLock<HashMap<String, TopicIndex>>,
    authenticator: RwLock<Option<Arc<dyn Authenticator>>>,
    task_actions: RwLock<Option<Arc<dyn TaskActionHandler>>>,
    session_exec: RwLock<Option<Arc<dyn SessionExecHandler>>>,
    accepting: AtomicBool,
    shutdown: CancellationToken,
}

impl Gateway {
    /// Create a gateway. It refuses connections until [`Gateway::start`].
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
            subscriptions: RwLock::new(HashMap::new()),
            authenticator: RwLock::new(None),
            task_actions: RwLock::new(None),
            session_exec: RwLock::new(None),
            accepting: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Begin accepting connections. A stopped gateway stays stopped.
    pub fn start(&self) {
        if self.shutdown.is_cancelled() {
            warn!("Gateway was stopped and cannot be restarted");
            return;
        }
        self.accepting.store(true, Ordering::SeqCst);
        info!("Gateway started");
    }

    /// Refuse new connections, stop background workers and close every client.
    pub fn stop(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown.cancel();

        let clients: Vec<Arc<Client>> = self
            .clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for client in &clients {
            client.close();
        }

        info!("Gateway stopped, closed {} connection(s)", clients.len());
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Fail with [`GatewayError::NotAccepting`] unless started and not stopped.
    pub fn ensure_accepting(&self) -> GatewayResult<()> {
        if self.is_accepting() {
            Ok(())
        } else {
            Err(GatewayError::NotAccepting)
        }
    }

    /// A token cancelled when the gateway stops. Background workers derive
    /// their own tokens from it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    pub fn set_auth_func(&self, authenticator: Arc<dyn Authenticator>) {
        *self.authenticator.write() = Some(authenticator);
    }

    pub fn set_task_action_func(&self, handler: Arc<dyn TaskActionHandler>) {
        *self.task_actions.write() = Some(handler);
    }

    pub fn set_session_exec_func(&self, handler: Arc<dyn SessionExecHandler>) {
        *self.session_exec.write() = Some(handler);
    }

    fn authenticator(&self) -> Option<Arc<dyn Authenticator>> {
        self.authenticator.read().clone()
    }

    fn task_action_handler(&self) -> Option<Arc<dyn TaskActionHandler>> {
        self.task_actions.read().clone()
    }

    fn session_exec_handler(&self) -> Option<Arc<dyn SessionExecHandler>> {
        self.session_exec.read().clone()
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Create and register a client that is not yet attached to a socket.
    ///
    /// The caller drives the returned outbound receiver. [`Gateway::handle_connection`]
    /// uses this for real sockets.
    pub fn connect(self: &Arc<Self>) -> GatewayResult<(Arc<Client>, mpsc::Receiver<Frame>)> {
        self.ensure_accepting()?;

        let (client, outbound) = Client::new(
            Uuid::new_v4().to_string(),
            Arc::downgrade(self),
            self.config.queue_capacity,
        );
        self.register(Arc::clone(&client));

        // Lost a race with `stop`.
        if client.is_closed() {
            return Err(GatewayError::NotAccepting);
        }
        Ok((client, outbound))
    }

    /// Attach an upgraded socket: register a client and spawn its read and
    /// write workers. Returns once the workers are running.
    pub fn handle_connection(self: &Arc<Self>, socket: WebSocket) -> GatewayResult<Arc<Client>> {
        let (client, outbound) = self.connect()?;
        let (sink, stream) = socket.split();

        tokio::spawn(Arc::clone(&client).write_loop(sink, outbound, self.config.clone()));
        tokio::spawn(Arc::clone(&client).read_loop(stream, self.config.read_timeout()));

        Ok(client)
    }

    /// Add a client to the registry.
    pub fn register(&self, client: Arc<Client>) {
        let id = client.id().to_string();
        self.clients.insert(id.clone(), Arc::clone(&client));
        info!(
            "Client {} connected (total: {})",
            id,
            self.clients.len()
        );

        if !self.is_accepting() {
            client.close();
        }
    }

    /// Remove a client from the registry and purge its subscriptions.
    ///
    /// Called from [`Client::close`]; a no-op for clients already removed.
    pub fn unregister(&self, client: &Client) {
        let removed = self.clients.remove(client.id()).is_some();

        {
            let mut index = self.subscriptions.write();
            for (channel, topics) in client.take_subscriptions() {
                let Some(topic_index) = index.get_mut(&channel) else {
                    continue;
                };
                for topic in topics {
                    remove_subscriber(topic_index, &topic, client.id());
                }
                if topic_index.is_empty() {
                    index.remove(&channel);
                }
            }
        }

        if removed {
            info!(
                "Client {} disconnected (total: {})",
                client.id(),
                self.clients.len()
            );
        }
    }

    pub fn get_client(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribe a registered client. An empty topic list subscribes to the
    /// whole channel.
    ///
    /// The client's own view and the index are updated under one lock.
    pub fn subscribe(&self, client: &Client, channel: &str, topics: &[String]) -> GatewayResult<()> {
        if channel.is_empty() {
            return Err(GatewayError::EmptyChannel);
        }

        let mut index = self.subscriptions.write();
        let Some(handle) = self.get_client(client.id()) else {
            return Err(GatewayError::ClientNotFound(client.id().to_string()));
        };

        let change = client.subscribe(channel, topics);
        let topic_index = index.entry(channel.to_string()).or_default();
        for topic in &change.removed {
            remove_subscriber(topic_index, topic, client.id());
        }
        for topic in change.added {
            topic_index
                .entry(topic)
                .or_default()
                .insert(client.id().to_string(), Arc::clone(&handle));
        }
        if topic_index.is_empty() {
            index.remove(channel);
        }

        debug!("Client {} subscribed to {} {:?}", client.id(), channel, topics);
        Ok(())
    }

    /// Unsubscribe a registered client. An empty topic list drops the whole
    /// channel.
    pub fn unsubscribe(
        &self,
        client: &Client,
        channel: &str,
        topics: &[String],
    ) -> GatewayResult<()> {
        if channel.is_empty() {
            return Err(GatewayError::EmptyChannel);
        }

        let mut index = self.subscriptions.write();
        if !self.clients.contains_key(client.id()) {
            return Err(GatewayError::ClientNotFound(client.id().to_string()));
        }

        let removed = client.unsubscribe(channel, topics);
        if let Some(topic_index) = index.get_mut(channel) {
            for topic in &removed {
                remove_subscriber(topic_index, topic, client.id());
            }
            if topic_index.is_empty() {
                index.remove(channel);
            }
        }

        debug!("Client {} unsubscribed from {} {:?}", client.id(), channel, topics);
        Ok(())
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Route one inbound message. Replies carry the request's id.
    pub async fn handle_message(&self, client: &Client, msg: Message) {
        let Some(kind) = msg.message_type() else {
            debug!("Client {} sent unknown type {:?}", client.id(), msg.kind);
            client.send_error(
                &msg.id,
                ErrorCode::UnknownType,
                format!("unknown message type: {}", msg.kind),
            );
            return;
        };

        debug!("Client {} -> {}", client.id(), kind);

        match kind {
            MessageType::Ping => {
                client.send_message(&Message::reply(&msg.id, MessageType::Pong, json!({})));
            }
            MessageType::Pong => {}
            MessageType::Auth => self.handle_auth(client, &msg).await,
            MessageType::Subscribe => self.handle_subscribe(client, &msg),
            MessageType::Unsubscribe => self.handle_unsubscribe(client, &msg),
            MessageType::TaskAction => self.handle_task_action(client, &msg).await,
            MessageType::SessionExec => self.handle_session_exec(client, &msg).await,
            MessageType::AuthResult
            | MessageType::Subscribed
            | MessageType::Unsubscribed
            | MessageType::Event
            | MessageType::Error => {
                client.send_error(
                    &msg.id,
                    ErrorCode::UnknownType,
                    format!("{} is not accepted from clients", kind),
                );
            }
        }
    }

    async fn handle_auth(&self, client: &Client, msg: &Message) {
        let request: AuthPayload = match msg.decode_payload() {
            Ok(request) => request,
            Err(e) => {
                let payload = AuthResultPayload {
                    success: false,
                    user_id: String::new(),
                    device_id: String::new(),
                    error: Some(format!("invalid auth payload: {e}")),
                };
                client.send_message(&Message::reply(&msg.id, MessageType::AuthResult, payload));
                return;
            }
        };

        let result = match self.authenticator() {
            Some(authenticator) => authenticator.authenticate(&request.token).await,
            None => Err(anyhow::anyhow!("authentication is not configured")),
        };

        // A failed attempt leaves any earlier identity untouched.
        let payload = match result {
            Ok(user_id) => {
                client.set_identity(&user_id, &request.device_id);
                info!("Client {} authenticated as {}", client.id(), user_id);
                AuthResultPayload {
                    success: true,
                    user_id,
                    device_id: request.device_id,
                    error: None,
                }
            }
            Err(e) => {
                warn!("Client {} failed to authenticate: {}", client.id(), e);
                AuthResultPayload {
                    success: false,
                    user_id: String::new(),
                    device_id: request.device_id,
                    error: Some(e.to_string()),
                }
            }
        };

        client.send_message(&Message::reply(&msg.id, MessageType::AuthResult, payload));
    }

    fn handle_subscribe(&self, client: &Client, msg: &Message) {
        let request: SubscriptionPayload = match msg.decode_payload() {
            Ok(request) => request,
            Err(e) => {
                client.send_error(&msg.id, ErrorCode::InvalidPayload, e.to_string());
                return;
            }
        };

        match self.subscribe(client, &request.channel, &request.topics) {
            Ok(()) => {
                client.send_message(&Message::reply(&msg.id, MessageType::Subscribed, &request));
            }
            Err(e) => client.send_error(&msg.id, ErrorCode::InvalidPayload, e.to_string()),
        }
    }

    fn handle_unsubscribe(&self, client: &Client, msg: &Message) {
        let request: SubscriptionPayload = match msg.decode_payload() {
            Ok(request) => request,
            Err(e) => {
                client.send_error(&msg.id, ErrorCode::InvalidPayload, e.to_string());
                return;
            }
        };

        match self.unsubscribe(client, &request.channel, &request.topics) {
            Ok(()) => {
                client.send_message(&Message::reply(
                    &msg.id,
                    MessageType::Unsubscribed,
                    &request,
                ));
            }
            Err(e) => client.send_error(&msg.id, ErrorCode::InvalidPayload, e.to_string()),
        }
    }

    /// Whether an action may run; answers the client when it may not.
    fn check_action_allowed(&self, client: &Client, msg: &Message) -> bool {
        if self.config.require_auth_for_actions && !client.is_authenticated() {
            client.send_error(
                &msg.id,
                ErrorCode::Unauthenticated,
                format!("{} requires authentication", msg.kind),
            );
            return false;
        }
        true
    }

    async fn handle_task_action(&self, client: &Client, msg: &Message) {
        if !self.check_action_allowed(client, msg) {
            return;
        }

        let request: TaskActionPayload = match msg.decode_payload() {
            Ok(request) => request,
            Err(e) => {
                client.send_error(&msg.id, ErrorCode::InvalidPayload, e.to_string());
                return;
            }
        };

        let Some(handler) = self.task_action_handler() else {
            client.send_error(
                &msg.id,
                ErrorCode::HandlerUnavailable,
                "no task action handler registered",
            );
            return;
        };

        let task_id = request.task_id.clone();
        let action = request.action.clone();
        if let Err(e) = handler.handle_task_action(client, request).await {
            warn!(
                "Task action {} on {} from client {} failed: {}",
                action,
                task_id,
                client.id(),
                e
            );
            client.send_error(&msg.id, e.code(), e.to_string());
        }
    }

    async fn handle_session_exec(&self, client: &Client, msg: &Message) {
        if !self.check_action_allowed(client, msg) {
            return;
        }

        let request: SessionExecPayload = match msg.decode_payload() {
            Ok(request) => request,
            Err(e) => {
                client.send_error(&msg.id, ErrorCode::InvalidPayload, e.to_string());
                return;
            }
        };

        let Some(handler) = self.session_exec_handler() else {
            client.send_error(
                &msg.id,
                ErrorCode::HandlerUnavailable,
                "no session exec handler registered",
            );
            return;
        };

        let session_id = request.session_id.clone();
        if let Err(e) = handler.handle_session_exec(client, request).await {
            warn!(
                "Session exec on {} from client {} failed: {}",
                session_id,
                client.id(),
                e
            );
            client.send_error(&msg.id, e.code(), e.to_string());
        }
    }

    // ========================================================================
    // Fan-out
    // ========================================================================

    /// Deliver an event to every client subscribed to `channel` with `*` or
    /// exactly `topic`. Each client receives it at most once.
    ///
    /// Returns the number of clients the event was queued for.
    pub fn broadcast_event(&self, channel: &str, topic: &str, event_type: &str, data: Value) -> usize {
        let recipients: Vec<Arc<Client>> = {
            let index = self.subscriptions.read();
            let Some(topic_index) = index.get(channel) else {
                return 0;
            };
            let mut matched: HashMap<&str, &Arc<Client>> = HashMap::new();
            for key in [WILDCARD, topic] {
                if let Some(subscribers) = topic_index.get(key) {
                    for (id, client) in subscribers {
                        matched.insert(id.as_str(), client);
                    }
                }
            }
            matched.into_values().cloned().collect()
        };

        if recipients.is_empty() {
            return 0;
        }

        let msg = Message::new(
            MessageType::Event,
            EventPayload {
                channel: channel.to_string(),
                topic: topic.to_string(),
                event: event_type.to_string(),
                data,
            },
        );
        let frame: Frame = match serde_json::to_string(&msg) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!("Failed to serialize {} event: {}", event_type, e);
                return 0;
            }
        };

        recipients
            .iter()
            .filter(|client| client.send_frame(Arc::clone(&frame)))
            .count()
    }

    /// Deliver a message to every connection authenticated as `user_id`.
    ///
    /// Returns the number of connections it was queued for.
    pub fn broadcast_to_user(&self, user_id: &str, msg: &Message) -> usize {
        if user_id.is_empty() {
            return 0;
        }

        let recipients: Vec<Arc<Client>> = self
            .clients
            .iter()
            .filter(|entry| entry.value().user_id() == user_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        if recipients.is_empty() {
            return 0;
        }

        let frame: Frame = match serde_json::to_string(msg) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!("Failed to serialize message for user {}: {}", user_id, e);
                return 0;
            }
        };

        recipients
            .iter()
            .filter(|client| client.send_frame(Arc::clone(&frame)))
            .count()
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Connected clients and subscriber entries per channel.
    pub fn stats(&self) -> GatewayStats {
        let subscriptions = self
            .subscriptions
            .read()
            .iter()
            .map(|(channel, topics)| {
                let entries: usize = topics.values().map(HashMap::len).sum();
                (channel.clone(), entries)
            })
            .collect();

        GatewayStats {
            connected_clients: self.clients.len(),
            subscriptions,
        }
    }
}

fn remove_subscriber(topic_index: &mut TopicIndex, topic: &str, client_id: &str) {
    if let Some(subscribers) = topic_index.get_mut(topic) {
        subscribers.remove(client_id);
        if subscribers.is_empty() {
            topic_index.remove(topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::error::ActionError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn started(config: GatewayConfig) -> Arc<Gateway> {
        let gateway = Arc::new(Gateway::new(config));
        gateway.start();
        gateway
    }

    fn gateway() -> Arc<Gateway> {
        started(GatewayConfig::default())
    }

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn recv(rx: &mut mpsc::Receiver<Frame>) -> Message {
        let frame = rx.try_recv().expect("expected a queued frame");
        serde_json::from_str(&frame).unwrap()
    }

    fn request(id: &str, kind: &str, payload: Value) -> Message {
        Message {
            id: id.into(),
            kind: kind.into(),
            payload,
            timestamp: 0,
        }
    }

    struct StaticAuth;

    #[async_trait]
    impl Authenticator for StaticAuth {
        async fn authenticate(&self, token: &str) -> anyhow::Result<String> {
            match token {
                "valid-token" => Ok("user-123".into()),
                _ => anyhow::bail!("invalid token"),
            }
        }
    }

    #[derive(Default)]
    struct RecordingTasks {
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl TaskActionHandler for RecordingTasks {
        async fn handle_task_action(
            &self,
            _client: &Client,
            request: TaskActionPayload,
        ) -> Result<(), ActionError> {
            if request.action == "explode" {
                return Err(ActionError::UnknownAction(request.action));
            }
            self.seen.lock().push((request.task_id, request.action));
            Ok(())
        }
    }

    #[test]
    fn test_new_gateway_refuses_connections_until_started() {
        let gateway = Arc::new(Gateway::new(GatewayConfig::default()));
        assert!(matches!(gateway.connect(), Err(GatewayError::NotAccepting)));
        gateway.start();
        assert!(gateway.connect().is_ok());
    }

    #[test]
    fn test_register_and_close_updates_count() {
        let gateway = gateway();
        let (a, _rx_a) = gateway.connect().unwrap();
        let (_b, _rx_b) = gateway.connect().unwrap();
        assert_eq!(gateway.client_count(), 2);
        a.close();
        assert_eq!(gateway.client_count(), 1);
        assert!(gateway.get_client(a.id()).is_none());
    }

    #[test]
    fn test_wildcard_subscriber_receives_any_topic() {
        let gateway = gateway();
        let (client, mut rx) = gateway.connect().unwrap();
        gateway.subscribe(&client, "task", &[]).unwrap();

        assert_eq!(gateway.broadcast_event("task", "t1", "task.started", json!({})), 1);
        let msg = recv(&mut rx);
        assert_eq!(msg.kind, "event");
        assert_eq!(msg.payload["channel"], "task");
        assert_eq!(msg.payload["topic"], "t1");
        assert_eq!(msg.payload["event"], "task.started");
    }

    #[test]
    fn test_topic_subscriber_only_receives_its_topic() {
        let gateway = gateway();
        let (client, mut rx) = gateway.connect().unwrap();
        gateway.subscribe(&client, "task", &topics(&["t1"])).unwrap();

        assert_eq!(gateway.broadcast_event("task", "t2", "task.started", json!({})), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(gateway.broadcast_event("task", "t1", "task.started", json!({})), 1);
    }

    #[test]
    fn test_wildcard_and_exact_subscription_deliver_once() {
        let gateway = gateway();
        let (client, mut rx) = gateway.connect().unwrap();
        gateway.subscribe(&client, "task", &[]).unwrap();
        gateway.subscribe(&client, "task", &topics(&["t1"])).unwrap();

        assert_eq!(gateway.broadcast_event("task", "t1", "task.started", json!({})), 1);
        recv(&mut rx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_reaches_every_subscriber() {
        let gateway = gateway();
        let (a, mut rx_a) = gateway.connect().unwrap();
        let (b, mut rx_b) = gateway.connect().unwrap();
        let (_c, mut rx_c) = gateway.connect().unwrap();
        gateway.subscribe(&a, "system", &topics(&["tasks"])).unwrap();
        gateway.subscribe(&b, "system", &[]).unwrap();

        assert_eq!(
            gateway.broadcast_event("system", "tasks", "task.created", json!({"id": "t1"})),
            2
        );
        assert_eq!(recv(&mut rx_a).payload["data"]["id"], "t1");
        assert_eq!(recv(&mut rx_b).payload["data"]["id"], "t1");
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_stops_delivery_and_cleans_index() {
        let gateway = gateway();
        let (client, _rx) = gateway.connect().unwrap();
        gateway.subscribe(&client, "task", &topics(&["t1", "t2"])).unwrap();
        assert_eq!(gateway.stats().subscriptions["task"], 2);

        gateway.unsubscribe(&client, "task", &topics(&["t1"])).unwrap();
        assert_eq!(gateway.broadcast_event("task", "t1", "x", json!({})), 0);
        assert_eq!(gateway.stats().subscriptions["task"], 1);

        gateway.unsubscribe(&client, "task", &[]).unwrap();
        assert!(gateway.stats().subscriptions.is_empty());
        assert!(client.subscriptions().is_empty());
    }

    #[test]
    fn test_wildcard_subscribe_replaces_topic_entries_in_index() {
        let gateway = gateway();
        let (client, _rx) = gateway.connect().unwrap();
        gateway.subscribe(&client, "task", &topics(&["t1", "t2"])).unwrap();
        gateway.subscribe(&client, "task", &[]).unwrap();
        assert_eq!(gateway.stats().subscriptions["task"], 1);
    }

    #[test]
    fn test_close_purges_subscriptions() {
        let gateway = gateway();
        let (client, _rx) = gateway.connect().unwrap();
        gateway.subscribe(&client, "task", &[]).unwrap();
        gateway.subscribe(&client, "session", &topics(&["s1"])).unwrap();

        client.close();
        let stats = gateway.stats();
        assert_eq!(stats.connected_clients, 0);
        assert!(stats.subscriptions.is_empty());
        assert!(client.subscriptions().is_empty());
    }

    #[test]
    fn test_subscribe_unregistered_client_fails() {
        let gateway = gateway();
        let (client, _rx) = gateway.connect().unwrap();
        client.close();
        assert!(matches!(
            gateway.subscribe(&client, "task", &[]),
            Err(GatewayError::ClientNotFound(_))
        ));
        assert!(gateway.stats().subscriptions.is_empty());
    }

    #[test]
    fn test_empty_channel_is_rejected() {
        let gateway = gateway();
        let (client, _rx) = gateway.connect().unwrap();
        assert!(matches!(
            gateway.subscribe(&client, "", &[]),
            Err(GatewayError::EmptyChannel)
        ));
    }

    #[test]
    fn test_slow_client_is_disconnected_and_others_still_receive() {
        let gateway = started(GatewayConfig {
            queue_capacity: 2,
            ..GatewayConfig::default()
        });
        let (slow, _slow_rx) = gateway.connect().unwrap();
        let (fast, mut fast_rx) = gateway.connect().unwrap();
        gateway.subscribe(&slow, "task", &[]).unwrap();
        gateway.subscribe(&fast, "task", &[]).unwrap();

        for _ in 0..2 {
            assert_eq!(gateway.broadcast_event("task", "t1", "x", json!({})), 2);
            recv(&mut fast_rx);
        }
        assert_eq!(gateway.broadcast_event("task", "t1", "x", json!({})), 1);
        assert!(slow.is_closed());
        assert_eq!(gateway.client_count(), 1);
        recv(&mut fast_rx);
    }

    #[test]
    fn test_broadcast_to_user_reaches_all_their_connections() {
        let gateway = gateway();
        let (a, mut rx_a) = gateway.connect().unwrap();
        let (b, mut rx_b) = gateway.connect().unwrap();
        let (c, mut rx_c) = gateway.connect().unwrap();
        a.set_identity("user-1", "laptop");
        b.set_identity("user-1", "phone");
        c.set_identity("user-2", "laptop");

        let msg = Message::new(MessageType::Event, json!({"hello": true}));
        assert_eq!(gateway.broadcast_to_user("user-1", &msg), 2);
        assert_eq!(recv(&mut rx_a).id, msg.id);
        assert_eq!(recv(&mut rx_b).id, msg.id);
        assert!(rx_c.try_recv().is_err());
        assert_eq!(gateway.broadcast_to_user("", &msg), 0);
    }

    #[tokio::test]
    async fn test_ping_gets_pong_with_same_id() {
        let gateway = gateway();
        let (client, mut rx) = gateway.connect().unwrap();
        gateway
            .handle_message(&client, request("p1", "ping", Value::Null))
            .await;
        let reply = recv(&mut rx);
        assert_eq!(reply.kind, "pong");
        assert_eq!(reply.id, "p1");
    }

    #[tokio::test]
    async fn test_unknown_type_gets_error() {
        let gateway = gateway();
        let (client, mut rx) = gateway.connect().unwrap();
        gateway
            .handle_message(&client, request("u1", "task.explode", json!({})))
            .await;
        let reply = recv(&mut rx);
        assert_eq!(reply.kind, "error");
        assert_eq!(reply.id, "u1");
        assert_eq!(reply.payload["code"], "UNKNOWN_TYPE");
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn test_auth_success_sets_identity() {
        let gateway = gateway();
        gateway.set_auth_func(Arc::new(StaticAuth));
        let (client, mut rx) = gateway.connect().unwrap();

        gateway
            .handle_message(
                &client,
                request("a1", "auth", json!({"token": "valid-token", "device_id": "d1"})),
            )
            .await;

        let reply = recv(&mut rx);
        assert_eq!(reply.kind, "auth.result");
        assert_eq!(reply.payload["success"], true);
        assert_eq!(reply.payload["user_id"], "user-123");
        assert_eq!(client.user_id(), "user-123");
        assert_eq!(client.device_id(), "d1");
    }

    #[tokio::test]
    async fn test_failed_auth_keeps_previous_identity() {
        let gateway = gateway();
        gateway.set_auth_func(Arc::new(StaticAuth));
        let (client, mut rx) = gateway.connect().unwrap();
        client.set_identity("user-123", "d1");

        gateway
            .handle_message(&client, request("a2", "auth", json!({"token": "nope"})))
            .await;

        let reply = recv(&mut rx);
        assert_eq!(reply.payload["success"], false);
        assert_eq!(reply.payload["error"], "invalid token");
        assert_eq!(client.user_id(), "user-123");
    }

    #[tokio::test]
    async fn test_auth_without_authenticator_fails() {
        let gateway = gateway();
        let (client, mut rx) = gateway.connect().unwrap();
        gateway
            .handle_message(&client, request("a3", "auth", json!({"token": "valid-token"})))
            .await;
        let reply = recv(&mut rx);
        assert_eq!(reply.kind, "auth.result");
        assert_eq!(reply.payload["success"], false);
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_subscribe_message_is_acked_with_request() {
        let gateway = gateway();
        let (client, mut rx) = gateway.connect().unwrap();
        gateway
            .handle_message(
                &client,
                request("s1", "subscribe", json!({"channel": "task", "topics": ["t1"]})),
            )
            .await;

        let reply = recv(&mut rx);
        assert_eq!(reply.kind, "subscribed");
        assert_eq!(reply.id, "s1");
        assert_eq!(reply.payload, json!({"channel": "task", "topics": ["t1"]}));
        assert!(client.is_subscribed("task", "t1"));
    }

    #[tokio::test]
    async fn test_subscribe_without_channel_gets_error() {
        let gateway = gateway();
        let (client, mut rx) = gateway.connect().unwrap();
        gateway
            .handle_message(&client, request("s2", "subscribe", json!({"channel": ""})))
            .await;
        let reply = recv(&mut rx);
        assert_eq!(reply.kind, "error");
        assert_eq!(reply.payload["code"], "INVALID_PAYLOAD");
    }

    #[tokio::test]
    async fn test_unsubscribe_message_is_acked() {
        let gateway = gateway();
        let (client, mut rx) = gateway.connect().unwrap();
        gateway.subscribe(&client, "task", &[]).unwrap();
        gateway
            .handle_message(&client, request("s3", "unsubscribe", json!({"channel": "task"})))
            .await;
        let reply = recv(&mut rx);
        assert_eq!(reply.kind, "unsubscribed");
        assert!(!client.is_subscribed("task", "t1"));
    }

    #[tokio::test]
    async fn test_task_action_without_handler_gets_error() {
        let gateway = gateway();
        let (client, mut rx) = gateway.connect().unwrap();
        gateway
            .handle_message(
                &client,
                request("t1", "task.action", json!({"task_id": "t-1", "action": "cancel"})),
            )
            .await;
        let reply = recv(&mut rx);
        assert_eq!(reply.payload["code"], "HANDLER_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_task_action_routes_to_handler_and_reports_errors() {
        let gateway = gateway();
        let tasks = Arc::new(RecordingTasks::default());
        gateway.set_task_action_func(tasks.clone());
        let (client, mut rx) = gateway.connect().unwrap();

        gateway
            .handle_message(
                &client,
                request("t2", "task.action", json!({"task_id": "t-1", "action": "cancel"})),
            )
            .await;
        assert_eq!(
            tasks.seen.lock().clone(),
            vec![("t-1".to_string(), "cancel".to_string())]
        );
        assert!(rx.try_recv().is_err());

        gateway
            .handle_message(
                &client,
                request("t3", "task.action", json!({"task_id": "t-1", "action": "explode"})),
            )
            .await;
        let reply = recv(&mut rx);
        assert_eq!(reply.id, "t3");
        assert_eq!(reply.payload["code"], "UNKNOWN_ACTION");
    }

    #[tokio::test]
    async fn test_task_action_with_bad_payload_gets_error() {
        let gateway = gateway();
        gateway.set_task_action_func(Arc::new(RecordingTasks::default()));
        let (client, mut rx) = gateway.connect().unwrap();
        gateway
            .handle_message(&client, request("t4", "task.action", json!({"task_id": 7})))
            .await;
        let reply = recv(&mut rx);
        assert_eq!(reply.payload["code"], "INVALID_PAYLOAD");
    }

    #[tokio::test]
    async fn test_actions_require_auth_when_configured() {
        let gateway = started(GatewayConfig {
            require_auth_for_actions: true,
            ..GatewayConfig::default()
        });
        let tasks = Arc::new(RecordingTasks::default());
        gateway.set_task_action_func(tasks.clone());
        let (client, mut rx) = gateway.connect().unwrap();

        gateway
            .handle_message(
                &client,
                request("t5", "task.action", json!({"task_id": "t-1", "action": "cancel"})),
            )
            .await;
        assert_eq!(recv(&mut rx).payload["code"], "UNAUTHENTICATED");
        assert!(tasks.seen.lock().is_empty());

        client.set_identity("user-123", "");
        gateway
            .handle_message(
                &client,
                request("t6", "task.action", json!({"task_id": "t-1", "action": "cancel"})),
            )
            .await;
        assert_eq!(tasks.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_session_exec_without_handler_gets_error() {
        let gateway = gateway();
        let (client, mut rx) = gateway.connect().unwrap();
        gateway
            .handle_message(
                &client,
                request("e1", "session.exec", json!({"session_id": "s1", "command": "ls"})),
            )
            .await;
        assert_eq!(recv(&mut rx).payload["code"], "HANDLER_UNAVAILABLE");
    }

    #[test]
    fn test_stop_closes_clients_and_refuses_new_ones() {
        let gateway = gateway();
        let (a, _rx_a) = gateway.connect().unwrap();
        let (b, _rx_b) = gateway.connect().unwrap();
        let token = gateway.shutdown_token();

        gateway.stop();
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(token.is_cancelled());
        assert_eq!(gateway.client_count(), 0);
        assert!(matches!(gateway.connect(), Err(GatewayError::NotAccepting)));

        gateway.start();
        assert!(!gateway.is_accepting());
    }

    #[test]
    fn test_stats_counts_subscriber_entries_per_channel() {
        let gateway = gateway();
        let (a, _rx_a) = gateway.connect().unwrap();
        let (b, _rx_b) = gateway.connect().unwrap();
        gateway.subscribe(&a, "task", &topics(&["t1", "t2"])).unwrap();
        gateway.subscribe(&b, "task", &[]).unwrap();
        gateway.subscribe(&b, "system", &[]).unwrap();

        let stats = gateway.stats();
        assert_eq!(stats.connected_clients, 2);
        assert_eq!(stats.subscriptions["task"], 3);
        assert_eq!(stats.subscriptions["system"], 1);
    }
}
