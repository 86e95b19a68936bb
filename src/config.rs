//! Gateway configuration.
//!
//! [`PoolOptions`] drives the MLLP connection pool. [`GatewayConfig`] is the
//! whole process configuration, loadable from a TOML file and overridden by
//! command line flags (see `cli`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// How long an idle MLLP connection is kept in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAlive {
    /// Close every connection right after its single use.
    Disabled,
    /// Close a connection once it has been idle this long.
    Idle(Duration),
    /// Keep connections open until the pool shuts down.
    Forever,
}

impl KeepAlive {
    /// Positive seconds keep idle connections that long, zero disables pooling,
    /// negative keeps them forever.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            s if s > 0 => KeepAlive::Idle(Duration::from_secs(s as u64)),
            0 => KeepAlive::Disabled,
            _ => KeepAlive::Forever,
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        match self {
            KeepAlive::Idle(d) => Some(*d),
            _ => None,
        }
    }
}

impl Default for KeepAlive {
    fn default() -> Self {
        KeepAlive::Idle(Duration::from_secs(10))
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Default)]
pub struct PoolOptions {
    /// Idle connection policy.
    pub keep_alive: KeepAlive,
    /// Messages sent on one connection before it is closed. `None` for unlimited.
    pub max_messages: Option<u32>,
    /// Bound on connect and on each send/ack exchange. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl PoolOptions {
    /// Set the idle connection policy.
    pub fn with_keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Rotate connections after `max` messages.
    pub fn with_max_messages(mut self, max: u32) -> Self {
        self.max_messages = Some(max);
        self
    }

    /// Never rotate connections by message count.
    pub fn with_unlimited_messages(mut self) -> Self {
        self.max_messages = None;
        self
    }

    /// Set the connect and exchange timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub http: HttpConfig,
    pub mllp: MllpConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Checks the pieces serde cannot, so startup fails before binding anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.http.socket_addr()?;
        if self.mllp.address.trim().is_empty() {
            return Err(ConfigError::MissingMllpAddress);
        }
        if self.mllp.max_messages > i64::from(u32::MAX) {
            return Err(ConfigError::InvalidMaxMessages(self.mllp.max_messages));
        }
        if let Some(tls) = &self.http.tls {
            if tls.cert_path.as_os_str().is_empty() || tls.key_path.as_os_str().is_empty() {
                return Err(ConfigError::IncompleteTls);
            }
        }
        Ok(())
    }
}

/// Inbound HTTP(S) listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,
    /// Serve HTTPS with this certificate and key; plain HTTP when absent.
    pub tls: Option<TlsConfig>,
    /// `Content-Type` header for acknowledgements.
    pub content_type: Option<String>,
    /// Seconds advertised in a `Keep-Alive: timeout=<n>` response header.
    pub keep_alive: Option<u64>,
    /// Per-request timeout in seconds; zero or absent for none.
    pub timeout_secs: Option<f64>,
}

impl HttpConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.bind_address.clone()))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.timeout_secs.and_then(positive_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            tls: None,
            content_type: None,
            keep_alive: None,
            timeout_secs: None,
        }
    }
}

/// TLS certificate and key for the HTTPS listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,
    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Downstream MLLP endpoint and pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MllpConfig {
    /// `host:port` of the MLLP server.
    pub address: String,
    /// See [`KeepAlive::from_secs`].
    pub keep_alive_secs: i64,
    /// Negative for unlimited.
    pub max_messages: i64,
    /// Zero for no timeout.
    pub timeout_secs: f64,
}

impl MllpConfig {
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            keep_alive: KeepAlive::from_secs(self.keep_alive_secs),
            max_messages: u32::try_from(self.max_messages).ok(),
            timeout: positive_secs(self.timeout_secs),
        }
    }
}

impl Default for MllpConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            keep_alive_secs: 10,
            max_messages: -1,
            timeout_secs: 0.0,
        }
    }
}

/// Accepts `host:port` or `mllp://host:port`.
pub fn parse_mllp_address(raw: &str) -> String {
    let raw = raw.trim();
    raw.strip_prefix("mllp://")
        .unwrap_or(raw)
        .trim_end_matches('/')
        .to_string()
}

fn positive_secs(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
