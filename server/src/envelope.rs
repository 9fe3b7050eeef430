//! Wire envelope codec.
//!
//! Inbound frames are JSON objects discriminated by a `type` field:
//!
//! ```text
//! {"type":"message","from":"alice","to":"bob","content_type":"text/plain","content":"hi"}
//! {"type":"action","action":"login","username":"alice","password":"secret"}
//! ```
//!
//! Decoding is two-phase: the frame is first parsed into a generic
//! string-keyed map to resolve the discriminant, then the original bytes
//! are decoded into the concrete variant the discriminant selects.
//!
//! Outbound frames are either the bare acknowledgement token `Ok` or a
//! [`Reply`] object.

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Plain-text acknowledgement written for accepted messages and registrations.
pub const ACK: &str = "Ok";

/// Chat message traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub from: String,
    pub to: String,
    pub content_type: String,
    pub content: String,
}

/// Account-management action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Register,
    Login,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
        }
    }
}

/// Account-management request. The password is cleartext on the wire and
/// must not outlive hashing/verification.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEnvelope {
    pub action: ActionKind,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ActionEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionEnvelope")
            .field("action", &self.action)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A decoded inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Message(MessageEnvelope),
    Action(ActionEnvelope),
}

impl Envelope {
    /// The discriminant value this envelope encodes with.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Action(_) => "action",
        }
    }
}

/// Server-originated structured frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Reply {
    /// Successful login: the session is now bound to `username`.
    Session {
        username: String,
        token: String,
        /// Unix timestamp (seconds) after which the token is rejected.
        expires_at: i64,
    },
    /// A failure, named by its stable kind string.
    Error { kind: String, message: String },
}

impl Reply {
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Self::Error {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

/// Decode a raw frame into an [`Envelope`].
///
/// Not a JSON object, or a known type whose body does not fit → `MalformedJson`.
/// An object with a missing, non-string or unrecognized `type` → `UnknownType`.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, ParseError> {
    let raw: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(bytes).map_err(|e| ParseError::MalformedJson(e.to_string()))?;

    let discriminant = match raw.get("type") {
        Some(serde_json::Value::String(t)) => t.as_str(),
        Some(other) => return Err(ParseError::UnknownType(other.to_string())),
        None => return Err(ParseError::UnknownType("<missing>".to_string())),
    };

    match discriminant {
        "message" => decode_variant(bytes).map(Envelope::Message),
        "action" => decode_variant(bytes).map(Envelope::Action),
        other => Err(ParseError::UnknownType(other.to_string())),
    }
}

fn decode_variant<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ParseError> {
    serde_json::from_slice(bytes).map_err(|e| ParseError::MalformedJson(e.to_string()))
}

/// Encode an envelope back to its wire form.
pub fn encode_envelope(envelope: &Envelope) -> String {
    // Envelope contains only strings and unit enums; serialization cannot fail.
    serde_json::to_string(envelope).unwrap_or_default()
}

/// Encode a structured server reply.
pub fn encode_reply(reply: &Reply) -> String {
    serde_json::to_string(reply).unwrap_or_default()
}
