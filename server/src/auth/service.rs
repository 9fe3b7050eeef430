//! Register/login against the credential store.
//!
//! The service is stateless: it never marks sessions authenticated or issues
//! tokens itself. bcrypt hashing and store calls run together on the blocking
//! pool so a slow hash never stalls another connection's I/O.

use std::sync::Arc;

use crate::db::CredentialStore;
use crate::error::{AuthError, StoreError};

/// bcrypt's accepted work-factor range.
pub const MIN_COST: u32 = 4;
pub const MAX_COST: u32 = 31;

/// bcrypt only reads this many password bytes; longer passwords are rejected
/// instead of silently truncated.
pub const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    cost: u32,
}

impl AuthService {
    pub fn new(store: Arc<dyn CredentialStore>, cost: u32) -> Self {
        Self {
            store,
            cost: cost.clamp(MIN_COST, MAX_COST),
        }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash `password` and insert a new credential record.
    pub async fn register(&self, username: &str, password: String) -> Result<(), AuthError> {
        let store = self.store.clone();
        let cost = self.cost;
        let username = username.to_string();

        tokio::task::spawn_blocking(move || {
            let hash = bcrypt::non_truncating_hash(password, cost).map_err(|e| match e {
                bcrypt::BcryptError::Truncation(_) => AuthError::PasswordTooLong,
                other => AuthError::Io(format!("hash password: {}", other)),
            })?;
            store.insert(&username, &hash).map_err(|e| match e {
                StoreError::Duplicate => AuthError::DuplicateUser,
                StoreError::NotFound => AuthError::Io("insert reported missing row".to_string()),
                StoreError::Io(msg) => AuthError::Io(msg),
            })
        })
        .await
        .map_err(|e| AuthError::Io(format!("Task join: {}", e)))?
    }

    /// Verify `password` against the stored hash for `username`.
    pub async fn login(&self, username: &str, password: String) -> Result<(), AuthError> {
        // Nothing longer can have been registered
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(AuthError::PasswordTooLong);
        }

        let store = self.store.clone();
        let username = username.to_string();

        tokio::task::spawn_blocking(move || {
            let hash = store.lookup(&username).map_err(|e| match e {
                StoreError::NotFound => AuthError::NotFound,
                StoreError::Duplicate => AuthError::Io("lookup reported duplicate".to_string()),
                StoreError::Io(msg) => AuthError::Io(msg),
            })?;

            match bcrypt::non_truncating_verify(password, &hash) {
                Ok(true) => Ok(()),
                Ok(false) => Err(AuthError::InvalidCredentials),
                Err(bcrypt::BcryptError::Truncation(_)) => Err(AuthError::PasswordTooLong),
                // A stored value bcrypt can't parse is a storage problem, not a bad password
                Err(e) => Err(AuthError::Io(format!("verify hash: {}", e))),
            }
        })
        .await
        .map_err(|e| AuthError::Io(format!("Task join: {}", e)))?
    }

    /// Check the store answers. Called once at startup.
    pub fn check_store(&self) -> Result<(), StoreError> {
        self.store.ping()
    }
}
