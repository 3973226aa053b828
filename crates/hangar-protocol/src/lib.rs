//! Wire protocol types for the Hangar event gateway.
//!
//! Every frame exchanged over a gateway connection is a single JSON envelope:
//!
//! ```text
//! { "id": "...", "type": "subscribe", "payload": { ... }, "timestamp": 1717171717171 }
//! ```
//!
//! The envelope is the only serialized form crossing the transport boundary.
//! Payloads are flat JSON objects whose shape depends on `type`; the typed
//! structs in [`payloads`] describe each one.
//!
//! ## Channels
//!
//! Channels are an open string namespace. Three are reserved by convention:
//! [`channels::TASK`], [`channels::SESSION`] and [`channels::SYSTEM`].

pub mod channels;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod payloads;

pub use envelope::{Message, MessageType};
pub use errors::ErrorCode;
