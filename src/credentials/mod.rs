//! Session credential persistence
//!
//! The protocol client hands us opaque JSON documents: one `creds` document
//! describing the paired device, plus a set of named key documents that
//! change as sessions with other devices are established. Both must survive
//! restarts or the device has to be paired again.
//!
//! Updates are applied one at a time by the session manager, in the order
//! the protocol client emitted them.

pub mod file;
pub mod memory;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;

/// Credential store errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt credential file {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid key name: {0}")]
    InvalidKey(String),
}

/// Everything needed to resume a paired session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    /// Device identity and registration document (null until paired)
    #[serde(default)]
    pub creds: Value,
    /// Named key documents (pre-keys, sessions, sender keys, ...)
    #[serde(default)]
    pub keys: BTreeMap<String, Value>,
}

impl Credentials {
    /// True when nothing has been stored yet (fresh pairing required)
    pub fn is_empty(&self) -> bool {
        self.creds.is_null() && self.keys.is_empty()
    }

    /// Apply an update in place
    pub fn apply(&mut self, update: &CredentialsUpdate) {
        if let Some(ref creds) = update.creds {
            self.creds = creds.clone();
        }
        for (name, value) in &update.keys {
            match value {
                Some(v) => {
                    self.keys.insert(name.clone(), v.clone());
                }
                None => {
                    self.keys.remove(name);
                }
            }
        }
    }
}

/// Incremental credential change emitted by the protocol client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialsUpdate {
    /// Replacement `creds` document, if it changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creds: Option<Value>,
    /// Key upserts; `None` deletes the key
    #[serde(default)]
    pub keys: BTreeMap<String, Option<Value>>,
}

/// Durable home for session credentials
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load stored credentials, returning empty ones if nothing is stored
    async fn load(&self) -> Result<Credentials, CredentialError>;

    /// Persist an update. Must complete before the next update is applied.
    async fn apply(&self, update: &CredentialsUpdate) -> Result<(), CredentialError>;

    /// Delete everything (after a logout)
    async fn clear(&self) -> Result<(), CredentialError>;
}
