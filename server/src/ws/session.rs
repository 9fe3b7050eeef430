use crate::envelope::MessageEnvelope;
use crate::error::SessionError;
use crate::ws::{ConnectionHandle, ConnectionRegistry};

/// Per-connection authentication state, owned by the connection's actor.
#[derive(Debug)]
pub struct Session {
    handle: ConnectionHandle,
    identity: Option<String>,
}

impl Session {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            identity: None,
        }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Mark the session authenticated as `identity` and bind it in the registry.
    /// A previous identity held by this connection is released first.
    pub fn authenticate(&mut self, registry: &ConnectionRegistry, identity: &str) {
        if let Some(previous) = self.identity.take() {
            if previous != identity {
                registry.unbind(&previous, self.handle.id());
            }
        }
        registry.bind(identity, self.handle.clone());
        self.identity = Some(identity.to_string());
    }

    /// Check that this session may send `message`.
    pub fn authorize(&self, message: &MessageEnvelope) -> Result<(), SessionError> {
        match self.identity.as_deref() {
            None => Err(SessionError::Unauthenticated),
            Some(identity) if identity != message.from => Err(SessionError::IdentityMismatch),
            Some(_) => Ok(()),
        }
    }

    /// Release the registry entry owned by this connection, if any.
    pub fn release(&mut self, registry: &ConnectionRegistry) {
        if let Some(identity) = self.identity.take() {
            registry.unbind(&identity, self.handle.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn message(from: &str) -> MessageEnvelope {
        MessageEnvelope {
            from: from.into(),
            to: "bob".into(),
            content_type: "text/plain".into(),
            content: "hi".into(),
        }
    }

    fn session() -> (Session, mpsc::UnboundedReceiver<axum::extract::ws::Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new(ConnectionHandle::new(tx)), rx)
    }

    #[test]
    fn test_unauthenticated_cannot_send() {
        let (session, _rx) = session();
        assert_eq!(
            session.authorize(&message("alice")),
            Err(SessionError::Unauthenticated)
        );
    }

    #[test]
    fn test_sender_must_match_identity() {
        let registry = ConnectionRegistry::new();
        let (mut session, _rx) = session();
        session.authenticate(&registry, "alice");
        assert!(session.authorize(&message("alice")).is_ok());
        assert_eq!(
            session.authorize(&message("mallory")),
            Err(SessionError::IdentityMismatch)
        );
    }

    #[test]
    fn test_switching_identity_releases_old_binding() {
        let registry = ConnectionRegistry::new();
        let (mut session, _rx) = session();
        session.authenticate(&registry, "alice");
        session.authenticate(&registry, "bob");
        assert!(registry.lookup("alice").is_err());
        assert_eq!(registry.lookup("bob").unwrap().id(), session.handle().id());

        session.release(&registry);
        assert!(registry.lookup("bob").is_err());
        assert_eq!(session.identity(), None);
    }
}
