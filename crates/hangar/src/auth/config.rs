//! Authentication configuration.

use serde::{Deserialize, Serialize};

use super::AuthError;

/// Shortest accepted HS256 secret.
pub const MIN_SECRET_LEN: usize = 32;

/// Default lifetime of minted tokens (24 hours).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accept `dev:<user>` tokens for the users listed in `dev_users`.
    pub dev_mode: bool,

    /// HS256 secret. `env:VAR_NAME` reads it from the environment.
    pub jwt_secret: Option<String>,

    /// User ids accepted as `dev:<id>` tokens in dev mode.
    pub dev_users: Vec<String>,

    /// Lifetime of tokens minted by `hangar token`.
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            jwt_secret: None,
            dev_users: Vec::new(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

impl AuthConfig {
    /// Resolve the JWT secret, expanding `env:VAR_NAME`.
    pub fn resolve_jwt_secret(&self) -> Result<Option<String>, AuthError> {
        let Some(value) = &self.jwt_secret else {
            return Ok(None);
        };
        let Some(var_name) = value.strip_prefix("env:") else {
            return Ok(Some(value.clone()));
        };
        match std::env::var(var_name) {
            Ok(secret) if !secret.is_empty() => Ok(Some(secret)),
            Ok(_) => Err(AuthError::EnvVarEmpty(var_name.to_string())),
            Err(_) => Err(AuthError::EnvVarNotFound(var_name.to_string())),
        }
    }

    /// Outside dev mode a secret of at least [`MIN_SECRET_LEN`] characters
    /// is required.
    pub fn validate(&self) -> Result<(), AuthError> {
        let secret = self.resolve_jwt_secret()?;
        match secret {
            Some(secret) if secret.len() < MIN_SECRET_LEN => {
                Err(AuthError::JwtSecretTooShort(MIN_SECRET_LEN))
            }
            Some(_) => Ok(()),
            None if self.dev_mode => Ok(()),
            None => Err(AuthError::MissingJwtSecret),
        }
    }
}
