//! HTTP surface: health, the gateway socket and gateway stats.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ErrorResponse};
pub use handlers::HealthResponse;
pub use routes::create_router;
pub use state::AppState;
