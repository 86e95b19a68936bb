//! Command line flags. Anything given here overrides the config file.

use clap::Parser;
use std::path::PathBuf;

use crate::config::{parse_mllp_address, GatewayConfig, TlsConfig};
use crate::error::ConfigError;

#[derive(Parser, Debug)]
#[command(name = "https2mllp")]
#[command(about = "Forward HL7 messages from HTTP(S) POSTs to an MLLP endpoint", long_about = None)]
pub struct Args {
    /// MLLP endpoint, as host:port or mllp://host:port
    pub mllp_address: Option<String>,

    /// TOML config file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// HTTP(S) bind address
    #[arg(short, long)]
    pub bind: Option<String>,

    /// TLS certificate (PEM); serves HTTPS together with --keyfile
    #[arg(long)]
    pub certfile: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long)]
    pub keyfile: Option<PathBuf>,

    /// Content-Type of acknowledgement responses
    #[arg(long)]
    pub content_type: Option<String>,

    /// Seconds advertised in the Keep-Alive response header
    #[arg(long)]
    pub keep_alive: Option<u64>,

    /// HTTP request timeout in seconds (0 for none)
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Seconds an idle MLLP connection stays open (0 closes after each message, negative keeps it forever)
    #[arg(long, allow_negative_numbers = true)]
    pub mllp_keep_alive: Option<i64>,

    /// Messages per MLLP connection before it is replaced (negative for unlimited)
    #[arg(long, allow_negative_numbers = true)]
    pub mllp_max_messages: Option<i64>,

    /// MLLP connect and acknowledgement timeout in seconds (0 for none)
    #[arg(long)]
    pub mllp_timeout: Option<f64>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Merges the flags over the config file (or the defaults) and validates the result.
    pub fn into_config(self) -> Result<GatewayConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => GatewayConfig::load(path)?,
            None => GatewayConfig::default(),
        };

        if let Some(address) = &self.mllp_address {
            config.mllp.address = address.clone();
        }
        config.mllp.address = parse_mllp_address(&config.mllp.address);

        if let Some(bind) = self.bind {
            config.http.bind_address = bind;
        }
        match (self.certfile, self.keyfile) {
            (Some(cert_path), Some(key_path)) => {
                config.http.tls = Some(TlsConfig {
                    cert_path,
                    key_path,
                })
            }
            (None, None) => {}
            _ => return Err(ConfigError::IncompleteTls),
        }
        if self.content_type.is_some() {
            config.http.content_type = self.content_type;
        }
        if self.keep_alive.is_some() {
            config.http.keep_alive = self.keep_alive;
        }
        if self.timeout.is_some() {
            config.http.timeout_secs = self.timeout;
        }
        if let Some(keep_alive) = self.mllp_keep_alive {
            config.mllp.keep_alive_secs = keep_alive;
        }
        if let Some(max) = self.mllp_max_messages {
            config.mllp.max_messages = max;
        }
        if let Some(timeout) = self.mllp_timeout {
            config.mllp.timeout_secs = timeout;
        }

        config.validate()?;
        Ok(config)
    }
}
