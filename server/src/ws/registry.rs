//! Identity → live connection mapping.
//!
//! At most one connection is bound per identity. Binding a second connection
//! evicts the first: it is marked closed and sent a Close frame. Per-key
//! exclusion comes from DashMap's shard locks.

use axum::extract::ws::{CloseFrame, Message};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::ws::ConnectionSender;

/// Close code sent to a connection displaced by a newer login.
pub const CLOSE_SESSION_REPLACED: u16 = 4000;

/// Lifecycle of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// Cloneable reference to one connection's outbound channel plus its state.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    sender: ConnectionSender,
    state: Arc<AtomicU8>,
}

impl ConnectionHandle {
    pub fn new(sender: ConnectionSender) -> Self {
        Self {
            id: Uuid::now_v7(),
            sender,
            state: Arc::new(AtomicU8::new(ConnectionState::Connecting as u8)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Connecting → Open. No effect once closed.
    pub fn mark_open(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Connecting as u8,
            ConnectionState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Queue a frame for the writer task. Returns false if the writer is gone.
    pub fn send(&self, msg: Message) -> bool {
        self.sender.send(msg).is_ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        let text: String = text.into();
        self.send(Message::Text(text.into()))
    }

    /// Mark closed and ask the writer to send a Close frame.
    pub fn close(&self, code: u16, reason: &str) {
        self.mark_closed();
        let _ = self.sender.send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })));
    }
}

/// Connection registry: the only owner of the identity map.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `handle`, returning the evicted handle if a
    /// different connection held the identity.
    pub fn bind(&self, identity: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let new_id = handle.id();
        let previous = self.connections.insert(identity.to_string(), handle)?;
        if previous.id() == new_id {
            return None;
        }

        tracing::info!(
            username = %identity,
            evicted = %previous.id(),
            connection_id = %new_id,
            "Identity rebound, evicting previous connection"
        );
        previous.close(CLOSE_SESSION_REPLACED, "Session replaced");
        Some(previous)
    }

    /// Remove the entry for `identity` if it is still owned by `connection_id`.
    /// Returns whether an entry was removed.
    pub fn unbind(&self, identity: &str, connection_id: Uuid) -> bool {
        let removed = self
            .connections
            .remove_if(identity, |_, handle| handle.id() == connection_id)
            .is_some();
        if removed {
            tracing::debug!(username = %identity, connection_id = %connection_id, "Connection unbound");
        }
        removed
    }

    pub fn lookup(&self, identity: &str) -> Result<ConnectionHandle, RegistryError> {
        self.connections
            .get(identity)
            .map(|entry| entry.value().clone())
            .ok_or(RegistryError::NotFound)
    }

    /// Send a text frame to the connection bound to `identity`.
    pub fn send_to(&self, identity: &str, text: &str) -> Result<(), RegistryError> {
        let handle = self.lookup(identity)?;
        if handle.state() == ConnectionState::Closed || !handle.send_text(text) {
            return Err(RegistryError::NotFound);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
