//! Messaging protocol client seam
//!
//! The protocol itself (framing, Noise handshake, multi-device pairing) is
//! not implemented here. Everything the rest of the crate needs from it is
//! captured by two traits:
//!
//! - [`ProtocolClient`] opens a connection from stored credentials and
//!   reports what happens to it on an event channel.
//! - [`Session`] is the live connection; it answers registration queries
//!   and can be closed.
//!
//! [`bridge::BridgeClient`] implements both against a bridge sidecar that
//! owns the real protocol stack.

pub mod bridge;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::credentials::{Credentials, CredentialsUpdate};
use crate::phone::PhoneAddress;

pub use bridge::{BridgeClient, BridgeOptions};

/// Status code the network uses to signal that the device was logged out
pub const LOGGED_OUT_STATUS: u16 = 401;

/// Protocol client errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Connection closed")]
    Closed,

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed frame: {0}")]
    Malformed(String),
}

/// Why a connection closed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectReason {
    /// Protocol status code, when the close came from the network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Human-readable description for logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DisconnectReason {
    pub fn new(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: Some(message.into()),
        }
    }

    /// Transport went away without a close frame
    pub fn connection_lost() -> Self {
        Self::new(None, "connection lost")
    }

    /// Device was explicitly logged out; stored credentials are dead
    pub fn is_logged_out(&self) -> bool {
        self.status_code == Some(LOGGED_OUT_STATUS)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.status_code, &self.message) {
            (Some(code), Some(msg)) => write!(f, "{} (status {})", msg, code),
            (Some(code), None) => write!(f, "status {}", code),
            (None, Some(msg)) => f.write_str(msg),
            (None, None) => f.write_str("unknown"),
        }
    }
}

/// Connection lifecycle event
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Pairing is required; `code` must be shown to an operator as a QR
    QrPresented(String),
    /// Connection is authenticated and usable
    Opened,
    /// Connection is gone
    Closed(DisconnectReason),
}

/// Everything a connection reports back to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    CredentialsUpdated(CredentialsUpdate),
    Connection(ConnectionEvent),
}

/// One entry of a registration query result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationEntry {
    /// Canonical address the network knows the number by
    #[serde(default)]
    pub jid: Option<String>,
}

/// Sender half handed to the client for a single connection
pub type EventSender = mpsc::UnboundedSender<ProtocolEvent>;

/// Live protocol connection
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    /// Ask the network which of the given addresses are registered.
    ///
    /// Only registered numbers appear in the result.
    async fn query_registration(
        &self,
        address: &PhoneAddress,
    ) -> Result<Vec<RegistrationEntry>, ProtocolError>;

    /// Close the connection. Safe to call more than once.
    async fn close(&self);
}

/// Factory for protocol connections
#[async_trait::async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Open a connection using `credentials`.
    ///
    /// Returning `Ok` means the transport is up, not that the session is
    /// authenticated; that is reported later as [`ConnectionEvent::Opened`]
    /// on `events`.
    async fn connect(
        &self,
        credentials: Credentials,
        events: EventSender,
    ) -> Result<Arc<dyn Session>, ProtocolError>;
}
