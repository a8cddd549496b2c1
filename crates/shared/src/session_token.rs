//! Session token verification.
//!
//! The console does not authenticate users itself. The external auth service
//! issues signed session tokens; this module verifies them and extracts the
//! user id. RS256 is used in production, HS256 with a shared secret is
//! accepted for local development and tests.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for session token operations.
#[derive(Debug, Error)]
pub enum SessionTokenError {
    #[error("Failed to encode token: {0}")]
    EncodingError(String),

    #[error("Failed to decode token: {0}")]
    DecodingError(String),

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user id in the profile store)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Verifier for session tokens issued by the auth service.
#[derive(Clone)]
pub struct SessionVerifier {
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    /// Leeway in seconds for clock skew tolerance
    pub leeway_secs: u64,
}

impl std::fmt::Debug for SessionVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionVerifier")
            .field("algorithm", &self.algorithm)
            .field("leeway_secs", &self.leeway_secs)
            .field("decoding_key", &"[REDACTED]")
            .finish()
    }
}

/// Default leeway in seconds for clock skew tolerance
pub const DEFAULT_LEEWAY_SECS: u64 = 30;

impl SessionVerifier {
    /// Creates a verifier from the auth service's RSA public key in PEM format.
    pub fn from_rsa_public_key(public_key_pem: &str, leeway_secs: u64) -> Result<Self, SessionTokenError> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| SessionTokenError::InvalidKey(format!("Invalid public key: {}", e)))?;

        Ok(Self {
            decoding_key,
            algorithm: Algorithm::RS256,
            leeway_secs,
        })
    }

    /// Creates a verifier for HS256 tokens signed with a shared secret.
    pub fn from_shared_secret(secret: &str, leeway_secs: u64) -> Result<Self, SessionTokenError> {
        if secret.is_empty() {
            return Err(SessionTokenError::InvalidKey(
                "Shared secret cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            algorithm: Algorithm::HS256,
            leeway_secs,
        })
    }

    /// Validates a token and returns its claims.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionTokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.leeway = self.leeway_secs;

        let token_data =
            decode::<SessionClaims>(token, &self.decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        SessionTokenError::TokenExpired
                    }
                    jsonwebtoken::errors::ErrorKind::InvalidToken
                    | jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        SessionTokenError::InvalidToken
                    }
                    _ => SessionTokenError::DecodingError(e.to_string()),
                }
            })?;

        if token_data.claims.sub.trim().is_empty() {
            return Err(SessionTokenError::InvalidToken);
        }

        Ok(token_data.claims)
    }
}

/// Issues an HS256 session token.
///
/// Only meant for local development tooling and tests; production tokens come
/// from the auth service.
pub fn issue_shared_secret_token(
    secret: &str,
    user_id: &str,
    ttl_secs: i64,
) -> Result<String, SessionTokenError> {
    let now = Utc::now();
    let claims = SessionClaims {
        sub: user_id.to_string(),
        exp: (now + Duration::seconds(ttl_secs)).timestamp(),
        iat: now.timestamp(),
        email: None,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| SessionTokenError::EncodingError(e.to_string()))
}
