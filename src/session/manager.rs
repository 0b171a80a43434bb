//! Session manager
//!
//! Keeps exactly one protocol session alive. The loop is:
//!
//! 1. load credentials, connect, publish `Connecting`
//! 2. consume connection events until the connection closes
//! 3. on logout, wipe the stored credentials
//! 4. wait the reconnect delay and go back to 1
//!
//! Setup failures take the same path as a recoverable close. Nothing in
//! here ever returns an error to a caller; faults are logged and retried.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::pairing;
use super::state::{CloseKind, ConnectionState};
use super::{SessionHandle, SessionSnapshot};
use crate::credentials::{CredentialStore, CredentialsUpdate};
use crate::protocol::{
    ConnectionEvent, DisconnectReason, ProtocolClient, ProtocolEvent, Session,
};
use crate::types::Result;

/// Default wait between a close and the next connection attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Session manager configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed delay before reconnecting, for every kind of close
    pub reconnect_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// How one connection ended
enum Outcome {
    Restart,
    Shutdown,
}

/// Owner of the live protocol session
pub struct SessionManager {
    client: Arc<dyn ProtocolClient>,
    store: Arc<dyn CredentialStore>,
    config: SessionConfig,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl SessionManager {
    /// Create a manager and the read-only handle to its state
    pub fn new(
        client: Arc<dyn ProtocolClient>,
        store: Arc<dyn CredentialStore>,
        config: SessionConfig,
    ) -> (Self, SessionHandle) {
        let (snapshot, rx) = watch::channel(SessionSnapshot::default());
        let manager = Self {
            client,
            store,
            config,
            snapshot,
        };
        (manager, SessionHandle::new(rx))
    }

    /// Run the manager on its own task until `shutdown` flips to true
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Connection loop
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = match self.start().await {
                Ok((session, events)) => self.drive(session, events, &mut shutdown).await,
                Err(e) => {
                    error!("Failed to start messaging session: {}", e);
                    self.publish(|s| {
                        s.state = ConnectionState::Disconnected;
                        s.session = None;
                    });
                    Outcome::Restart
                }
            };

            if let Outcome::Shutdown = outcome {
                break;
            }

            info!("Reconnecting in {:?}...", self.config.reconnect_delay);
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        self.publish(|s| {
            s.state = ConnectionState::Disconnected;
            s.session = None;
            s.pairing_code = None;
        });
        info!("Session manager stopped");
    }

    /// Load credentials and open a new connection
    async fn start(
        &self,
    ) -> Result<(Arc<dyn Session>, mpsc::UnboundedReceiver<ProtocolEvent>)> {
        self.publish(|s| {
            s.state = ConnectionState::Connecting;
            s.session = None;
        });

        let credentials = self.store.load().await?;
        if credentials.is_empty() {
            info!("No paired device, a QR code will be shown for pairing");
        }

        // A fresh channel per connection: events from a replaced session
        // can't reach this one.
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = self.client.connect(credentials, events_tx).await?;

        self.publish(|s| s.session = Some(Arc::clone(&session)));
        debug!("Protocol connection established, waiting for it to open");

        Ok((session, events_rx))
    }

    /// Consume events for one connection until it closes
    async fn drive(
        &self,
        session: Arc<dyn Session>,
        mut events: mpsc::UnboundedReceiver<ProtocolEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Outcome {
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = wait_for_shutdown(shutdown) => {
                    session.close().await;
                    return Outcome::Shutdown;
                }
            };

            // Channel gone without a close event: the client dropped us
            let event = event.unwrap_or_else(|| {
                ProtocolEvent::Connection(ConnectionEvent::Closed(
                    DisconnectReason::connection_lost(),
                ))
            });

            match event {
                ProtocolEvent::CredentialsUpdated(update) => {
                    self.persist(&update).await;
                }
                ProtocolEvent::Connection(event) => {
                    let next = self.snapshot.borrow().state.on_event(&event);
                    match event {
                        ConnectionEvent::QrPresented(code) => {
                            pairing::present(&code);
                            self.publish(|s| s.pairing_code = Some(code));
                        }
                        ConnectionEvent::Opened => {
                            info!("Messaging session open");
                            self.publish(|s| {
                                s.state = next;
                                s.pairing_code = None;
                            });
                        }
                        ConnectionEvent::Closed(reason) => {
                            self.publish(|s| {
                                s.state = next;
                                s.session = None;
                            });
                            session.close().await;
                            self.on_closed(&reason).await;
                            return Outcome::Restart;
                        }
                    }
                }
            }
        }
    }

    /// Write a credential update before looking at the next event
    async fn persist(&self, update: &CredentialsUpdate) {
        if let Err(e) = self.store.apply(update).await {
            error!("Failed to persist credential update: {}", e);
        }
    }

    async fn on_closed(&self, reason: &DisconnectReason) {
        match CloseKind::classify(reason) {
            CloseKind::Recoverable => {
                warn!("Messaging connection closed: {}", reason);
            }
            CloseKind::Terminal => {
                warn!("Device logged out ({}), deleting stored session", reason);
                if let Err(e) = self.store.clear().await {
                    error!("Failed to delete stored session: {}", e);
                }
            }
        }
    }

    fn publish(&self, modify: impl FnOnce(&mut SessionSnapshot)) {
        self.snapshot.send_modify(modify);
    }
}

/// Resolves once shutdown is requested. A dropped sender never resolves.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
