//! Multiplexed WebSocket gateway.
//!
//! Clients connect over a single socket, authenticate, subscribe to
//! (channel, topic) pairs and receive events. Task and session actions are
//! forwarded to injected handlers.

mod client;
mod config;
mod error;
mod handler;
mod hub;

pub use client::{Client, Frame, Identity};
pub use config::GatewayConfig;
pub use error::{ActionError, GatewayError, GatewayResult};
pub use handler::{Authenticator, SessionExecHandler, TaskActionHandler};
pub use hub::Gateway;
