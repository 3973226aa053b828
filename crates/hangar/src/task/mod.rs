//! Task execution backends.

mod memory;

pub use memory::{DEFAULT_SUBSCRIBER_CAPACITY, InMemoryTaskManager};
