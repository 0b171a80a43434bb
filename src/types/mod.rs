//! Shared types for wa-check

pub mod error;

pub use error::{Result, ServiceError};
