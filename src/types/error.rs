//! Error types for wa-check
//!
//! `ServiceError` is what the HTTP layer sees. The protocol and credential
//! seams have their own enums and convert into it.

use hyper::StatusCode;

use crate::credentials::CredentialError;
use crate::phone::InvalidPhoneNumber;
use crate::protocol::ProtocolError;

/// Main error type for wa-check operations
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    InvalidPhoneNumber(#[from] InvalidPhoneNumber),

    #[error("Messaging session is not connected")]
    NotConnected,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Credential store error: {0}")]
    Credentials(#[from] CredentialError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidPhoneNumber(_) => StatusCode::BAD_REQUEST,
            Self::NotConnected => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Protocol(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Credentials(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error came from caller input rather than the system
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::BadRequest(_) | Self::InvalidPhoneNumber(_))
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Result type alias for wa-check operations
pub type Result<T> = std::result::Result<T, ServiceError>;
