//! Error taxonomy for the gateway.
//!
//! Every error a client can observe maps to a stable `kind()` string that is
//! written into the outbound error frame. Only [`StartupError`] is allowed to
//! terminate the process.

use thiserror::Error;

/// Envelope decoding failures. Connection-local.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The frame is not valid JSON, or a known envelope type has the wrong shape.
    /// Closes the offending connection.
    #[error("malformed JSON envelope: {0}")]
    MalformedJson(String),
    /// Well-formed JSON whose `type` discriminant is missing or unrecognized.
    /// The connection stays open.
    #[error("unknown envelope type: {0}")]
    UnknownType(String),
}

impl ParseError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedJson(_) => "MalformedJSON",
            Self::UnknownType(_) => "UnknownType",
        }
    }

    /// Message safe to send to the client. Decoder detail stays in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::MalformedJson(_) => "malformed JSON envelope".to_string(),
            Self::UnknownType(_) => self.to_string(),
        }
    }

    /// Whether this failure must terminate the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MalformedJson(_))
    }
}

/// Failures surfaced by the credential store seam.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("username already exists")]
    Duplicate,
    #[error("no such user")]
    NotFound,
    #[error("store I/O error: {0}")]
    Io(String),
}

/// Failures of the register/login operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("username is already registered")]
    DuplicateUser,
    #[error("no user found with that username")]
    NotFound,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("password exceeds 72 bytes")]
    PasswordTooLong,
    #[error("internal error: {0}")]
    Io(String),
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateUser => "DuplicateUser",
            Self::NotFound => "NotFound",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::PasswordTooLong => "PasswordTooLong",
            Self::Io(_) => "IOError",
        }
    }

    /// Message safe to send to the client. Internal detail stays in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::Io(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Connection registry lookups.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("identity has no bound connection")]
    NotFound,
}

/// Session-level authorization failures for `message` envelopes and tokens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("login required before sending messages")]
    Unauthenticated,
    #[error("sender does not match the authenticated identity")]
    IdentityMismatch,
    #[error("session token expired")]
    Expired,
    #[error("session token invalid")]
    InvalidToken,
}

impl SessionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "Unauthenticated",
            Self::IdentityMismatch => "IdentityMismatch",
            Self::Expired => "TokenExpired",
            Self::InvalidToken => "InvalidToken",
        }
    }
}

/// Process-fatal failures raised before the listener starts serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),
    #[error("database error: {0}")]
    Database(String),
    #[error("credential store unreachable: {0}")]
    StoreUnreachable(StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StartupError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<rusqlite_migration::Error> for StartupError {
    fn from(err: rusqlite_migration::Error) -> Self {
        Self::Database(err.to_string())
    }
}
