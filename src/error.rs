//! Error types for the gateway.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the MLLP connection pool.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The TCP connection to the MLLP endpoint could not be established.
    #[error("failed to connect to MLLP endpoint {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Connecting to the MLLP endpoint did not complete in time.
    #[error("timed out after {timeout:?} connecting to MLLP endpoint {address}")]
    ConnectTimeout { address: String, timeout: Duration },

    /// Writing the message or reading its acknowledgement failed.
    #[error("MLLP exchange failed: {0}")]
    Send(#[source] io::Error),

    /// No acknowledgement arrived within the configured timeout.
    #[error("no MLLP acknowledgement within {0:?}")]
    SendTimeout(Duration),

    /// The pool has been shut down.
    #[error("MLLP connection pool is shut down")]
    PoolClosed,
}

impl GatewayError {
    /// True for failures that happened before any byte reached the endpoint.
    pub fn is_connect(&self) -> bool {
        matches!(
            self,
            GatewayError::Connect { .. } | GatewayError::ConnectTimeout { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            GatewayError::ConnectTimeout { .. } | GatewayError::SendTimeout(_)
        )
    }
}

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors building a [`GatewayConfig`](crate::config::GatewayConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no MLLP address given (pass MLLP_ADDRESS or set mllp.address)")]
    MissingMllpAddress,

    #[error("invalid HTTP bind address {0:?}")]
    InvalidBindAddress(String),

    #[error("mllp.max_messages {0} is too large (negative means unlimited)")]
    InvalidMaxMessages(i64),

    #[error("TLS needs both a certificate and a key file")]
    IncompleteTls,
}
