//! Bridges between the gateway and the platform's task and session services.

mod collaborators;
mod session;
mod system;
mod task;

pub use collaborators::{
    CreateTaskRequest, EventSubscription, Execution, SessionManager, Task, TaskEvent,
    TaskManager, TaskStatus,
};
pub use session::SessionEventBridge;
pub use system::SystemEventPublisher;
pub use task::TaskEventBridge;
