pub mod actor;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod session;

use axum::extract::ws::Message;
use tokio::sync::mpsc;

pub use registry::{ConnectionHandle, ConnectionRegistry, ConnectionState};
pub use session::Session;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;
