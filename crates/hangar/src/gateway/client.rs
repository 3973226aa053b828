//! Connection actor: one per live WebSocket.
//!
//! A client owns its outbound queue, its local view of the subscriptions and
//! its identity. Two workers run per connection: [`Client::read_loop`] parses
//! inbound frames and hands them to the gateway, [`Client::write_loop`]
//! drains the outbound queue onto the socket.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message as WsMessage;
use futures::{Sink, SinkExt, Stream, StreamExt};
use hangar_protocol::channels::WILDCARD;
use hangar_protocol::payloads::ErrorPayload;
use hangar_protocol::{ErrorCode, Message, MessageType};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;

use super::config::GatewayConfig;
use super::hub::Gateway;

/// Upper bound on messages coalesced into one outbound frame.
const MAX_BATCH_MESSAGES: usize = 256;

/// A serialized outbound frame, shared between all recipients of a broadcast.
pub type Frame = Arc<str>;

/// Who is on the other end of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Empty until an `auth` message succeeds.
    pub user_id: String,
    pub device_id: String,
}

/// Topics added to and removed from a client's local view by one operation.
///
/// The gateway replays this onto its reverse index inside the same critical
/// section.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct SubscriptionChange {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// One live connection.
pub struct Client {
    id: String,
    identity: Mutex<Identity>,
    /// channel -> topics (`*` = whole channel)
    subscriptions: Mutex<HashMap<String, HashSet<String>>>,
    /// `None` once the client is closed.
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    gateway: Weak<Gateway>,
}

impl Client {
    /// Create a client and the receiving end of its outbound queue.
    pub(crate) fn new(
        id: String,
        gateway: Weak<Gateway>,
        queue_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let client = Arc::new(Self {
            id,
            identity: Mutex::new(Identity::default()),
            subscriptions: Mutex::new(HashMap::new()),
            outbound: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            gateway,
        });
        (client, rx)
    }

    /// Connection id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> Identity {
        self.identity.lock().clone()
    }

    pub fn user_id(&self) -> String {
        self.identity.lock().user_id.clone()
    }

    pub fn device_id(&self) -> String {
        self.identity.lock().device_id.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        !self.identity.lock().user_id.is_empty()
    }

    pub(crate) fn set_identity(&self, user_id: &str, device_id: &str) {
        let mut identity = self.identity.lock();
        identity.user_id = user_id.to_string();
        identity.device_id = device_id.to_string();
    }

    // ========================================================================
    // Subscriptions (local view only, see `Gateway::subscribe`)
    // ========================================================================

    /// Add topics to a channel. An empty list replaces the channel's topics
    /// with the wildcard.
    pub(crate) fn subscribe(&self, channel: &str, topics: &[String]) -> SubscriptionChange {
        let mut subscriptions = self.subscriptions.lock();
        let entry = subscriptions.entry(channel.to_string()).or_default();
        let mut change = SubscriptionChange::default();

        if topics.is_empty() {
            change.removed = entry
                .drain()
                .filter(|topic| topic != WILDCARD)
                .collect();
            entry.insert(WILDCARD.to_string());
            // The index entry for `*` is rewritten unconditionally; inserting
            // an existing client is a no-op there.
            change.added.push(WILDCARD.to_string());
        } else {
            for topic in topics {
                if entry.insert(topic.clone()) {
                    change.added.push(topic.clone());
                }
            }
        }

        change
    }

    /// Remove topics from a channel. An empty list removes the whole channel.
    /// Returns the topics that were actually removed.
    pub(crate) fn unsubscribe(&self, channel: &str, topics: &[String]) -> Vec<String> {
        let mut subscriptions = self.subscriptions.lock();

        if topics.is_empty() {
            return subscriptions
                .remove(channel)
                .map(|set| set.into_iter().collect())
                .unwrap_or_default();
        }

        let Some(entry) = subscriptions.get_mut(channel) else {
            return Vec::new();
        };
        let removed: Vec<String> = topics
            .iter()
            .filter(|topic| entry.remove(topic.as_str()))
            .cloned()
            .collect();
        if entry.is_empty() {
            subscriptions.remove(channel);
        }
        removed
    }

    /// Drop every subscription, returning what was held.
    pub(crate) fn take_subscriptions(&self) -> HashMap<String, HashSet<String>> {
        std::mem::take(&mut *self.subscriptions.lock())
    }

    /// Whether a broadcast on (`channel`, `topic`) reaches this client.
    pub fn is_subscribed(&self, channel: &str, topic: &str) -> bool {
        self.subscriptions
            .lock()
            .get(channel)
            .map(|topics| topics.contains(WILDCARD) || topics.contains(topic))
            .unwrap_or(false)
    }

    /// Snapshot of the subscriptions, topics sorted.
    pub fn subscriptions(&self) -> HashMap<String, Vec<String>> {
        self.subscriptions
            .lock()
            .iter()
            .map(|(channel, topics)| {
                let mut topics: Vec<String> = topics.iter().cloned().collect();
                topics.sort();
                (channel.clone(), topics)
            })
            .collect()
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Serialize and enqueue a message without blocking.
    ///
    /// Returns `true` if the message was queued. Sending to a closed client is
    /// a silent no-op. A full queue means the consumer cannot keep up: the
    /// client is closed.
    pub fn send_message(&self, msg: &Message) -> bool {
        if self.is_closed() {
            return false;
        }
        match serde_json::to_string(msg) {
            Ok(json) => self.send_frame(json.into()),
            Err(e) => {
                warn!("Failed to serialize message for client {}: {}", self.id, e);
                false
            }
        }
    }

    /// Enqueue an already-serialized frame. Same policy as [`Client::send_message`].
    pub(crate) fn send_frame(&self, frame: Frame) -> bool {
        let result = {
            let outbound = self.outbound.lock();
            let Some(tx) = outbound.as_ref() else {
                return false;
            };
            tx.try_send(frame)
        };

        match result {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Outbound queue full for client {} (user {:?}), disconnecting",
                    self.id,
                    self.user_id()
                );
                self.close();
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.close();
                false
            }
        }
    }

    /// Reply to `request_id` with an `error` message.
    pub(crate) fn send_error(&self, request_id: &str, code: ErrorCode, message: impl Into<String>) {
        let payload = ErrorPayload::new(code, message);
        self.send_message(&Message::reply(request_id, MessageType::Error, payload));
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Close the connection. Safe to call any number of times from any worker.
    ///
    /// Unregisters from the gateway, closes the outbound queue (the write loop
    /// flushes what is left, then sends a close frame) and stops the read loop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.outbound.lock().take();
        self.shutdown.cancel();

        if let Some(gateway) = self.gateway.upgrade() {
            gateway.unregister(self);
        }

        info!("Client {} closed", self.id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ========================================================================
    // Workers
    // ========================================================================

    /// Read frames until the peer goes away, the idle deadline passes or the
    /// client is closed.
    ///
    /// The deadline restarts with every frame received, including pongs
    /// answering our keepalive pings.
    pub(crate) async fn read_loop<S, E>(self: Arc<Self>, mut stream: S, read_timeout: Duration)
    where
        S: Stream<Item = Result<WsMessage, E>> + Unpin,
        E: Display,
    {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = timeout(read_timeout, stream.next()) => next,
            };

            let frame = match next {
                Err(_) => {
                    info!(
                        "Client {} idle for {:?}, disconnecting",
                        self.id, read_timeout
                    );
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    debug!("Read error for client {}: {}", self.id, e);
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            let parsed = match frame {
                WsMessage::Text(text) => serde_json::from_str::<Message>(text.as_str()),
                WsMessage::Binary(data) => serde_json::from_slice::<Message>(&data),
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                WsMessage::Close(_) => {
                    debug!("Client {} sent close frame", self.id);
                    break;
                }
            };

            match parsed {
                Ok(msg) => {
                    let Some(gateway) = self.gateway.upgrade() else {
                        break;
                    };
                    gateway.handle_message(&self, msg).await;
                }
                Err(e) => {
                    debug!("Invalid frame from client {}: {}", self.id, e);
                    self.send_error("", ErrorCode::InvalidJson, format!("invalid JSON: {e}"));
                }
            }
        }

        self.close();
    }

    /// Drain the outbound queue onto the socket.
    ///
    /// Messages already waiting when a write starts are coalesced into the
    /// same frame, newline-separated. A transport ping goes out whenever the
    /// writer has been idle for a full keepalive interval.
    pub(crate) async fn write_loop<S>(
        self: Arc<Self>,
        mut sink: S,
        mut outbound: mpsc::Receiver<Frame>,
        config: GatewayConfig,
    ) where
        S: Sink<WsMessage> + Unpin,
        S::Error: Display,
    {
        let write_timeout = config.write_timeout();
        let ping_interval = config.ping_interval();
        let mut keepalive = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(first) = frame else {
                        let _ = timeout(write_timeout, sink.send(WsMessage::Close(None))).await;
                        break;
                    };
                    let batch = drain_batch(first, &mut outbound);
                    match timeout(write_timeout, sink.send(WsMessage::Text(batch.into()))).await {
                        Ok(Ok(())) => keepalive.reset(),
                        Ok(Err(e)) => {
                            debug!("Write error for client {}: {}", self.id, e);
                            break;
                        }
                        Err(_) => {
                            warn!("Write to client {} timed out after {:?}", self.id, write_timeout);
                            break;
                        }
                    }
                }
                _ = keepalive.tick() => {
                    match timeout(write_timeout, sink.send(WsMessage::Ping(Bytes::new()))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!("Ping to client {} failed: {}", self.id, e);
                            break;
                        }
                        Err(_) => {
                            warn!("Ping to client {} timed out", self.id);
                            break;
                        }
                    }
                }
            }
        }

        self.close();
    }
}

/// Join `first` with whatever is already queued behind it.
fn drain_batch(first: Frame, outbound: &mut mpsc::Receiver<Frame>) -> String {
    let mut batch = String::from(&*first);
    for _ in 1..MAX_BATCH_MESSAGES {
        match outbound.try_recv() {
            Ok(next) => {
                batch.push('\n');
                batch.push_str(&next);
            }
            Err(_) => break,
        }
    }
    batch
}
