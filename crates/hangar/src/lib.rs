//! Hangar: the real-time event gateway of the agent container platform.
//!
//! Browser and CLI clients hold one WebSocket each, authenticate in-band,
//! subscribe to task, session and system events, and issue task and session
//! actions over the same socket.

pub mod api;
pub mod auth;
pub mod bridge;
pub mod config;
pub mod container;
pub mod gateway;
pub mod task;

pub use hangar_protocol as protocol;
