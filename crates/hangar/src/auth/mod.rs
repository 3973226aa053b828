//! Authentication for gateway connections.
//!
//! Provides the default [`crate::gateway::Authenticator`]:
//! - HS256 JWT validation (production)
//! - `dev:<user>` tokens for configured users (dev mode)

mod config;
mod error;
mod validator;

pub use config::{AuthConfig, DEFAULT_TOKEN_TTL_SECS, MIN_SECRET_LEN};
pub use error::AuthError;
pub use validator::{Claims, TokenValidator};
