/*!
# An HTTP(S) to HL7 MLLP gateway.

 HL7's MLLP is a simple, single-byte-text based protocol for framing HL7 messages over a TCP (or similar) transport.
 Many integration engines only speak MLLP, while the systems feeding them would rather speak HTTP. This crate bridges the two:
 each HTTP(S) `POST` body is sent to a single downstream MLLP endpoint, and the MLLP acknowledgement comes back as the
 `201 Created` response body.

 The interesting part is the outbound [`ConnectionPool`]: it turns many concurrent, independent requests into a small set of
 long-lived TCP connections.
 - A connection is leased to exactly one request at a time, and idle connections are reused most-recent first.
 - Connections are replaced after a configurable number of messages ([`PoolOptions::max_messages`]).
 - Each connection has a keep-alive watchdog that closes it once it has been idle too long ([`KeepAlive`]).
 - Any connect or send failure is returned to the caller and the connection is thrown away, never reused. Nothing is retried.

 ## Example
 ```no_run
use bytes::Bytes;
use hl7_mllp_gateway::{ConnectionPool, KeepAlive, PoolOptions};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let pool = ConnectionPool::new(
        "127.0.0.1:2575",
        PoolOptions::default()
            .with_keep_alive(KeepAlive::Idle(Duration::from_secs(10)))
            .with_max_messages(1000)
            .with_timeout(Duration::from_secs(5)),
    );

    // wrapped in MLLP framing on the way out, unwrapped on the way back
    let ack = pool.send(Bytes::from("MSH|^~\\&|...")).await?;
    println!("Received ack: {:?}", ack);

    pool.shutdown().await;
    Ok(())
}
```

 The `https2mllp` binary wraps the pool in an axum server; see `https2mllp --help`.
 */

pub mod cli;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod server;
mod watchdog;

#[cfg(test)]
mod test_support;

pub use codec::MllpCodec;
pub use config::{GatewayConfig, KeepAlive, PoolOptions};
pub use connection::PooledConnection;
pub use error::{ConfigError, GatewayError, Result};
pub use pool::{ConnectionPool, PoolStats};
