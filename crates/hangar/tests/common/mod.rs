//! Test utilities and common setup.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures::{SinkExt, StreamExt};
use hangar::api::{self, AppState};
use hangar::auth::{AuthConfig, TokenValidator};
use hangar::bridge::{SystemEventPublisher, TaskEventBridge};
use hangar::gateway::{Gateway, GatewayConfig};
use hangar::task::InMemoryTaskManager;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

pub const TEST_SECRET: &str = "test-secret-for-integration-tests-minimum-32-chars";

pub fn test_auth_config() -> AuthConfig {
    AuthConfig {
        dev_mode: true,
        jwt_secret: Some(TEST_SECRET.to_string()),
        dev_users: vec!["dev".to_string()],
        ..AuthConfig::default()
    }
}

pub fn test_validator() -> TokenValidator {
    TokenValidator::new(test_auth_config()).unwrap()
}

/// A started gateway wired the way `hangar serve` wires it, minus containers.
pub struct TestHarness {
    pub gateway: Arc<Gateway>,
    pub tasks: Arc<InMemoryTaskManager>,
    pub task_bridge: Arc<TaskEventBridge>,
}

pub fn test_harness() -> TestHarness {
    test_harness_with(GatewayConfig::default())
}

pub fn test_harness_with(config: GatewayConfig) -> TestHarness {
    let gateway = Arc::new(Gateway::new(config));
    gateway.start();
    gateway.set_auth_func(Arc::new(test_validator()));

    let system = SystemEventPublisher::new(Arc::clone(&gateway));
    let tasks = Arc::new(InMemoryTaskManager::new().with_notifier(system));
    let task_bridge = Arc::new(TaskEventBridge::new(Arc::clone(&gateway), tasks.clone()));
    gateway.set_task_action_func(task_bridge.clone());

    TestHarness {
        gateway,
        tasks,
        task_bridge,
    }
}

pub fn test_router(gateway: Arc<Gateway>) -> Router {
    api::create_router(AppState::new(gateway).with_dev_mode(true))
}

/// Router over a fresh harness, for `oneshot` requests.
pub fn test_app() -> (Router, TestHarness) {
    let harness = test_harness();
    (test_router(Arc::clone(&harness.gateway)), harness)
}

/// Serve the router on an ephemeral local port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

pub fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{addr}/api/v1/gateway/ws")
}

/// WebSocket test client that splits batched frames into messages.
pub struct WsClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pending: VecDeque<Value>,
    next_id: u64,
}

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

impl WsClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (socket, _) = connect_async(ws_url(addr)).await.unwrap();
        Self {
            socket,
            pending: VecDeque::new(),
            next_id: 0,
        }
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.socket
            .send(WsMessage::Text(text.to_string().into()))
            .await
            .unwrap();
    }

    /// Send a request and return its id.
    pub async fn send(&mut self, kind: &str, payload: Value) -> String {
        self.next_id += 1;
        let id = format!("req-{}", self.next_id);
        let msg = serde_json::json!({ "id": id, "type": kind, "payload": payload });
        self.send_raw(&msg.to_string()).await;
        id
    }

    /// Next gateway message, or `None` once the socket closes.
    pub async fn try_recv(&mut self) -> Option<Value> {
        loop {
            if let Some(msg) = self.pending.pop_front() {
                return Some(msg);
            }
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.socket.next())
                .await
                .expect("timed out waiting for a gateway frame");
            match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    for line in text.as_str().split('\n').filter(|l| !l.is_empty()) {
                        self.pending.push_back(serde_json::from_str(line).unwrap());
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => return None,
                Some(Ok(_)) => continue,
            }
        }
    }

    /// A message already read off the socket but not yet consumed.
    pub fn try_recv_pending(&mut self) -> Option<Value> {
        self.pending.pop_front()
    }

    pub async fn close(&mut self) {
        self.socket.close(None).await.unwrap();
    }

    pub async fn recv(&mut self) -> Value {
        self.try_recv().await.expect("gateway closed the socket")
    }

    /// Send a request and wait for the reply carrying its id. Events that
    /// arrive first stay queued for [`WsClient::recv_event`].
    pub async fn request(&mut self, kind: &str, payload: Value) -> Value {
        let id = self.send(kind, payload).await;
        let mut skipped = Vec::new();
        let reply = loop {
            let msg = self.recv().await;
            if msg["id"] == id.as_str() {
                break msg;
            }
            skipped.push(msg);
        };
        for msg in skipped.into_iter().rev() {
            self.pending.push_front(msg);
        }
        reply
    }

    pub async fn auth(&mut self, token: &str) -> Value {
        self.request("auth", serde_json::json!({ "token": token }))
            .await
    }

    pub async fn subscribe(&mut self, channel: &str, topics: &[&str]) -> Value {
        self.request(
            "subscribe",
            serde_json::json!({ "channel": channel, "topics": topics }),
        )
        .await
    }

    /// Next message, which must be an `event`; returns its payload.
    pub async fn recv_event(&mut self) -> Value {
        let msg = self.recv().await;
        assert_eq!(msg["type"], "event", "expected an event, got {msg}");
        msg["payload"].clone()
    }
}
