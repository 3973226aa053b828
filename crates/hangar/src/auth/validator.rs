//! Token validation for gateway `auth` messages.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AuthConfig, AuthError};
use crate::gateway::Authenticator;

/// JWT claims. `sub` is the user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Validates HS256 tokens and, in dev mode, `dev:<user>` tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: Arc<AuthConfig>,
    secret: Option<String>,
}

impl TokenValidator {
    /// Build from config, resolving `env:VAR_NAME` secrets up front.
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let secret = config.resolve_jwt_secret()?;
        Ok(Self {
            config: Arc::new(config),
            secret,
        })
    }

    pub fn is_dev_mode(&self) -> bool {
        self.config.dev_mode
    }

    /// Validate a token and return its claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        if self.config.dev_mode {
            if let Some(user_id) = token.strip_prefix("dev:") {
                return self.dev_claims(user_id);
            }
        }

        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            warn!("JWT validation failed: {:?}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        if token_data.claims.sub.is_empty() {
            return Err(AuthError::InvalidToken("missing subject".to_string()));
        }
        Ok(token_data.claims)
    }

    fn dev_claims(&self, user_id: &str) -> Result<Claims, AuthError> {
        if !self.config.dev_users.iter().any(|u| u == user_id) {
            return Err(AuthError::UnknownDevUser(user_id.to_string()));
        }
        debug!("Accepted dev token for {}", user_id);
        let now = Utc::now().timestamp();
        Ok(Claims {
            sub: user_id.to_string(),
            exp: now + self.config.token_ttl_secs as i64,
            iat: Some(now),
            iss: Some("dev".to_string()),
        })
    }

    /// Mint a token for `user_id` valid for `token_ttl_secs`.
    pub fn generate_token(&self, user_id: &str) -> Result<String, AuthError> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + self.config.token_ttl_secs as i64,
            iat: Some(now),
            iss: Some("hangar".to_string()),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| AuthError::Internal(e.to_string()))
    }
}

#[async_trait]
impl Authenticator for TokenValidator {
    async fn authenticate(&self, token: &str) -> anyhow::Result<String> {
        Ok(self.validate_token(token)?.sub)
    }
}
