use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;

/// Session token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated username
    pub sub: String,
    /// Token ID (UUIDv7)
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// A freshly issued session token.
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub token: String,
    pub expires_at: i64,
}

/// Load or generate the session signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/session_secret.
pub fn load_or_generate_session_secret(data_dir: &str) -> Result<Vec<u8>, std::io::Error> {
    std::fs::create_dir_all(data_dir)?;
    let key_path = Path::new(data_dir).join("session_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("Session signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("Session key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("Session signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Issue a session token for `username`, valid for `ttl_secs`.
pub fn issue_session_token(
    secret: &[u8],
    username: &str,
    ttl_secs: u64,
) -> Result<SessionToken, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let exp = now + ttl_secs as i64;
    let claims = Claims {
        sub: username.to_string(),
        jti: Uuid::now_v7().to_string(),
        iat: now,
        exp,
    };

    let token = encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(secret),
    )?;

    Ok(SessionToken {
        token,
        expires_at: exp,
    })
}

/// Validate a session token and return its claims.
pub fn validate_session_token(secret: &[u8], token: &str) -> Result<Claims, SessionError> {
    let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.leeway = 0;
    decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(|err| match err.kind() {
            ErrorKind::ExpiredSignature => SessionError::Expired,
            _ => SessionError::InvalidToken,
        })
}
