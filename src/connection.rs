//! A single long-lived TCP connection to the MLLP endpoint.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::debug;
use std::io;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::codec::MllpCodec;
use crate::error::{GatewayError, Result};

/// One MLLP connection, owned by the pool while idle and by exactly one
/// request while leased.
#[derive(Debug)]
pub struct PooledConnection {
    id: u64,
    transport: Framed<TcpStream, MllpCodec>,
    message_count: u32,
    /// `None` while leased.
    idle_since: Option<Instant>,
    timeout: Option<Duration>,
    /// Cancelled when the connection is closed, which stops its watchdog.
    cancel: CancellationToken,
}

impl PooledConnection {
    /// Connects to `address`, bounded by `connect_timeout` when set.
    pub async fn connect(
        id: u64,
        address: &str,
        connect_timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let connecting = TcpStream::connect(address);
        let stream = match connect_timeout {
            Some(limit) => timeout(limit, connecting)
                .await
                .map_err(|_| GatewayError::ConnectTimeout {
                    address: address.to_string(),
                    timeout: limit,
                })?,
            None => connecting.await,
        }
        .map_err(|source| GatewayError::Connect {
            address: address.to_string(),
            source,
        })?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("MLLP: Could not set TCP_NODELAY on connection {}: {}", id, e);
        }
        debug!("MLLP: Connection {} opened to {}", id, address);

        Ok(PooledConnection {
            id,
            transport: Framed::new(stream, MllpCodec::new()),
            message_count: 0,
            idle_since: None,
            timeout: connect_timeout,
            cancel,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Messages sent on this connection so far, including failed attempts.
    pub fn message_count(&self) -> u32 {
        self.message_count
    }

    pub fn idle_since(&self) -> Option<Instant> {
        self.idle_since
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn mark_idle(&mut self, now: Instant) {
        self.idle_since = Some(now);
    }

    pub(crate) fn mark_leased(&mut self) {
        self.idle_since = None;
    }

    /// Sends one message and waits for its acknowledgement frame.
    ///
    /// A failure leaves the connection in an unknown state; the caller should
    /// [`close`](Self::close) it rather than reuse it.
    pub async fn send(&mut self, payload: Bytes) -> Result<Bytes> {
        self.message_count += 1;

        let transport = &mut self.transport;
        let exchange = async move {
            transport.send(payload).await?;
            let ack = transport.next().await.unwrap_or_else(|| {
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "MLLP endpoint closed the connection before acknowledging",
                ))
            })?;
            Ok::<Bytes, io::Error>(ack.freeze())
        };

        match self.timeout {
            Some(limit) => timeout(limit, exchange)
                .await
                .map_err(|_| GatewayError::SendTimeout(limit))?,
            None => exchange.await,
        }
        .map_err(GatewayError::Send)
    }

    /// Shuts the socket down and releases it. Consuming `self` means a
    /// connection can only ever be closed once.
    pub async fn close(self) {
        self.cancel.cancel();

        let mut stream = self.transport.into_inner();
        if let Err(e) = stream.shutdown().await {
            debug!("MLLP: Error shutting down connection {}: {}", self.id, e);
        }
        debug!(
            "MLLP: Connection {} closed after {} messages",
            self.id, self.message_count
        );
    }
}
