//! Registration lookup
//!
//! Asks the live session whether a normalized number is registered,
//! retrying transient failures according to a [`RetryPolicy`].

pub mod retry;

use serde::Serialize;
use tracing::debug;

use crate::phone::PhoneAddress;
use crate::protocol::{ProtocolError, RegistrationEntry, Session};

pub use retry::RetryPolicy;

/// Outcome of a lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRecord {
    pub exists: bool,
    /// Address reported by the network when registered, otherwise the
    /// normalized digits without the domain suffix
    pub canonical_address: String,
}

impl RegistrationRecord {
    /// Map a query result for `address`
    pub fn from_entries(address: &PhoneAddress, entries: &[RegistrationEntry]) -> Self {
        match entries.first().and_then(|e| e.jid.as_deref()) {
            Some(jid) if !jid.is_empty() => Self {
                exists: true,
                canonical_address: jid.to_string(),
            },
            _ => Self {
                exists: false,
                canonical_address: address.user().to_string(),
            },
        }
    }
}

/// Registration lookup service
#[derive(Debug, Clone, Default)]
pub struct RegistrationLookup {
    policy: RetryPolicy,
}

impl RegistrationLookup {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Query `address` on `session`, retrying per the policy
    pub async fn lookup(
        &self,
        session: &dyn Session,
        address: &PhoneAddress,
    ) -> Result<RegistrationRecord, ProtocolError> {
        let entries = self
            .policy
            .run(move |attempt| {
                debug!(attempt, address = %address, "Querying registration");
                session.query_registration(address)
            })
            .await?;

        Ok(RegistrationRecord::from_entries(address, &entries))
    }
}
