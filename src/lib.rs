//! wa-check - WhatsApp number registration check API
//!
//! A small HTTP service that keeps one paired messaging session alive and
//! answers "is this phone number registered?" queries through it.
//!
//! ## Components
//!
//! - **Server**: hyper HTTP/1 endpoint `POST /check-whatsapp`
//! - **Session**: connection lifecycle, QR pairing and reconnect
//! - **Credentials**: durable storage of the paired device's keys
//! - **Phone**: Brazilian phone number normalization
//! - **Lookup**: registration queries with bounded retry
//! - **Protocol**: client for the messaging bridge

pub mod config;
pub mod credentials;
pub mod lookup;
pub mod phone;
pub mod protocol;
pub mod routes;
pub mod server;
pub mod session;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, ServiceError};
