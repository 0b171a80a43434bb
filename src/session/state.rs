//! Connection state machine
//!
//! ```text
//! Disconnected --start--> Connecting --opened--> Open
//!      ^                      |                   |
//!      +-------closed---------+-------closed------+
//! ```
//!
//! A QR code never changes state. After a close the manager waits the
//! reconnect delay and goes back to `Connecting`; whether it wipes the
//! stored credentials first depends on [`CloseKind`].

use serde::Serialize;

use crate::protocol::{ConnectionEvent, DisconnectReason};

/// Connection state as seen by readers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
        }
    }

    /// State after `event`
    pub fn on_event(self, event: &ConnectionEvent) -> Self {
        match event {
            ConnectionEvent::QrPresented(_) => self,
            ConnectionEvent::Opened => Self::Open,
            ConnectionEvent::Closed(_) => Self::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to recover from a close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Reconnect with the same credentials
    Recoverable,
    /// Credentials were revoked; wipe them and pair again
    Terminal,
}

impl CloseKind {
    pub fn classify(reason: &DisconnectReason) -> Self {
        if reason.is_logged_out() {
            Self::Terminal
        } else {
            Self::Recoverable
        }
    }
}
