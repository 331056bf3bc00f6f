//! Token validation for the WebSocket handshake.
//!
//! The upgrade request carries a bearer token as the `token` query
//! parameter — the transport cannot reliably deliver custom headers during
//! the handshake, so the query string is the one deliberate wire
//! compromise. Validation happens before the upgrade completes; an invalid
//! token never produces a connection.

use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::UserId;

/// Party role carried in the token claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// Validated claims of an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the platform user id.
    pub sub: UserId,
    /// Role assigned at token issuance.
    pub role: Role,
    /// Expiry (Unix seconds).
    pub exp: i64,
}

/// Handshake authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    Missing,

    #[error("token expired")]
    Expired,

    #[error("token invalid")]
    Invalid,
}

impl AuthError {
    /// Static error code for metrics labeling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Expired => "expired",
            Self::Invalid => "invalid",
        }
    }
}

/// The auth collaborator: called once per upgrade attempt.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<Claims, AuthError>;
}

/// HMAC-signed JWT validation against the platform's shared secret.
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid,
            })
    }
}
