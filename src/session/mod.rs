//! Messaging session lifecycle
//!
//! [`SessionManager`] owns the one live protocol session. It is the only
//! writer of the published [`SessionSnapshot`]; everything else reads it
//! through a cloneable [`SessionHandle`].

pub mod manager;
pub mod pairing;
pub mod state;

use std::sync::Arc;
use tokio::sync::watch;

use crate::protocol::Session;

pub use manager::{SessionConfig, SessionManager};
pub use state::{CloseKind, ConnectionState};

/// What the session manager publishes after every transition
#[derive(Clone, Default)]
pub struct SessionSnapshot {
    /// Current connection state
    pub state: ConnectionState,
    /// Current session; present from connect until close
    pub session: Option<Arc<dyn Session>>,
    /// Pairing code waiting to be scanned, if any
    pub pairing_code: Option<String>,
}

impl std::fmt::Debug for SessionSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("state", &self.state)
            .field("has_session", &self.session.is_some())
            .field("pairing_code", &self.pairing_code.is_some())
            .finish()
    }
}

/// Read-only view of the session manager's state
#[derive(Clone)]
pub struct SessionHandle {
    rx: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub(crate) fn new(rx: watch::Receiver<SessionSnapshot>) -> Self {
        Self { rx }
    }

    /// Handle frozen at `snapshot`, with no manager behind it
    #[cfg(test)]
    pub(crate) fn fixed(snapshot: SessionSnapshot) -> Self {
        let (_tx, rx) = watch::channel(snapshot);
        Self { rx }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.rx.borrow().state
    }

    /// Copy of the latest snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.rx.borrow().clone()
    }

    /// The session, but only if it exists and is open
    pub fn live_session(&self) -> Option<Arc<dyn Session>> {
        let snapshot = self.rx.borrow();
        match (&snapshot.session, snapshot.state) {
            (Some(session), ConnectionState::Open) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Receiver that is notified on every transition
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phone::PhoneAddress;
    use crate::protocol::{ProtocolError, RegistrationEntry};

    struct NullSession;

    #[async_trait::async_trait]
    impl Session for NullSession {
        async fn query_registration(
            &self,
            _address: &PhoneAddress,
        ) -> Result<Vec<RegistrationEntry>, ProtocolError> {
            Ok(vec![])
        }

        async fn close(&self) {}
    }

    #[test]
    fn test_live_session_requires_open() {
        let session: Arc<dyn Session> = Arc::new(NullSession);

        let connecting = SessionHandle::fixed(SessionSnapshot {
            state: ConnectionState::Connecting,
            session: Some(Arc::clone(&session)),
            pairing_code: None,
        });
        assert!(connecting.live_session().is_none());

        let open = SessionHandle::fixed(SessionSnapshot {
            state: ConnectionState::Open,
            session: Some(session),
            pairing_code: None,
        });
        assert!(open.live_session().is_some());

        let open_without_session = SessionHandle::fixed(SessionSnapshot {
            state: ConnectionState::Open,
            session: None,
            pairing_code: None,
        });
        assert!(open_without_session.live_session().is_none());
    }
}
