//! Configuration for wa-check
//!
//! CLI arguments and environment variable handling using clap.
//! Every option can come from the environment (or a `.env` file).

use clap::{Parser, ValueEnum};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::lookup::RetryPolicy;
use crate::protocol::BridgeOptions;
use crate::session::SessionConfig;

/// Log output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// wa-check - WhatsApp number registration check API
#[derive(Parser, Debug, Clone)]
#[command(name = "wa-check")]
#[command(about = "HTTP API that checks whether phone numbers are registered on WhatsApp")]
pub struct Args {
    /// HTTP port
    #[arg(long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Directory holding the paired session credentials
    #[arg(long, env = "SESSION_DIR", default_value = "./auth_session")]
    pub session_dir: PathBuf,

    /// Keep credentials in memory only (pairing is lost on restart)
    #[arg(long, env = "EPHEMERAL_SESSION", default_value = "false")]
    pub ephemeral_session: bool,

    /// WebSocket URL of the protocol bridge
    #[arg(long, env = "BRIDGE_URL", default_value = "ws://127.0.0.1:8085/socket")]
    pub bridge_url: String,

    /// Browser name shown in the phone's linked devices list
    #[arg(long, env = "BROWSER_NAME", default_value = "WhatsApp Check API")]
    pub browser_name: String,

    /// Connection establishment timeout in milliseconds
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value = "60000")]
    pub connect_timeout_ms: u64,

    /// Registration query timeout in milliseconds
    #[arg(long, env = "QUERY_TIMEOUT_MS", default_value = "20000")]
    pub query_timeout_ms: u64,

    /// How long each pairing QR code stays valid, in milliseconds
    #[arg(long, env = "QR_TIMEOUT_MS", default_value = "40000")]
    pub qr_timeout_ms: u64,

    /// Delay before the bridge re-sends a failed request, in milliseconds
    #[arg(long, env = "RETRY_REQUEST_DELAY_MS", default_value = "500")]
    pub retry_request_delay_ms: u64,

    /// Delay before reconnecting after the session closes, in milliseconds
    #[arg(long, env = "RECONNECT_DELAY_MS", default_value = "3000")]
    pub reconnect_delay_ms: u64,

    /// Registration query attempts per request
    #[arg(long, env = "LOOKUP_MAX_ATTEMPTS", default_value = "3")]
    pub lookup_max_attempts: u32,

    /// Backoff unit between query attempts in milliseconds (grows linearly)
    #[arg(long, env = "LOOKUP_BACKOFF_MS", default_value = "1000")]
    pub lookup_backoff_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

impl Args {
    /// Socket address to listen on
    pub fn listen(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Options for the bridge protocol client
    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            browser_name: self.browser_name.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            qr_timeout: Duration::from_millis(self.qr_timeout_ms),
            retry_request_delay: Duration::from_millis(self.retry_request_delay_ms),
        }
    }

    /// Session manager settings
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }

    /// Retry policy for registration queries
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.lookup_max_attempts,
            Duration::from_millis(self.lookup_backoff_ms),
        )
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.lookup_max_attempts == 0 {
            return Err("LOOKUP_MAX_ATTEMPTS must be at least 1".to_string());
        }

        // Built without TLS; the bridge runs alongside the service
        if !self.bridge_url.starts_with("ws://") {
            return Err("BRIDGE_URL must be a ws:// URL".to_string());
        }

        if self.connect_timeout_ms == 0 || self.query_timeout_ms == 0 {
            return Err("CONNECT_TIMEOUT_MS and QUERY_TIMEOUT_MS must be non-zero".to_string());
        }

        Ok(())
    }
}
