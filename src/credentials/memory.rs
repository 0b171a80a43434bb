//! In-memory credential store
//!
//! Nothing survives a restart. Used by tests and `--ephemeral-session` runs.

use tokio::sync::RwLock;

use super::{CredentialError, CredentialStore, Credentials, CredentialsUpdate};

/// Credential store backed by process memory
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<Credentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with existing credentials
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            inner: RwLock::new(credentials),
        }
    }

    /// Current contents
    pub async fn snapshot(&self) -> Credentials {
        self.inner.read().await.clone()
    }
}

#[async_trait::async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Credentials, CredentialError> {
        Ok(self.inner.read().await.clone())
    }

    async fn apply(&self, update: &CredentialsUpdate) -> Result<(), CredentialError> {
        self.inner.write().await.apply(update);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CredentialError> {
        *self.inner.write().await = Credentials::default();
        Ok(())
    }
}
