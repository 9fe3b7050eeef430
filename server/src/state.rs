use std::time::Duration;

use crate::auth::AuthService;
use crate::config::Config;
use crate::ws::ConnectionRegistry;

/// Per-connection limits and session lifetime.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Lifetime of issued session tokens, in seconds.
    pub session_ttl_secs: u64,
    /// A peer silent for this long is disconnected.
    pub idle_timeout: Duration,
    /// Deadline for writing a single outbound frame.
    pub write_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            session_ttl_secs: 3600,
            idle_timeout: Duration::from_secs(90),
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            session_ttl_secs: config.session_ttl_secs,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs.max(1)),
            write_timeout: Duration::from_secs(config.write_timeout_secs.max(1)),
        }
    }
}

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Register/login against the credential store
    pub auth: AuthService,
    /// Live connection per authenticated identity
    pub connections: ConnectionRegistry,
    /// Session token signing secret (256-bit random key)
    pub session_secret: Vec<u8>,
    pub settings: SessionSettings,
}
