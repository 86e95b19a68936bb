//! Pool of reusable MLLP connections to a single endpoint.
//!
//! Each HTTP request leases one connection for one message/ack exchange.
//! Idle connections are kept on a stack, so the most recently released one is
//! reused first and steady load settles on as few sockets as possible.
//!
//! The idle stack and the set of live connection ids sit behind one mutex.
//! The mutex is only held to push/pop/remove entries, never across connect,
//! send or receive, so a slow endpoint cannot stall other requests' access to
//! the pool.

use bytes::Bytes;
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::{KeepAlive, PoolOptions};
use crate::connection::PooledConnection;
use crate::error::{GatewayError, Result};
use crate::watchdog;

/// Point-in-time counters for a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections opened.
    pub connects: u64,
    /// Sends that reused an idle connection.
    pub reuses: u64,
    /// Connections closed, for any reason.
    pub closes: u64,
    /// Connections closed by their keep-alive watchdog.
    pub evictions: u64,
    /// Sends that failed on an established connection.
    pub send_failures: u64,
}

#[derive(Default)]
struct Counters {
    connects: AtomicU64,
    reuses: AtomicU64,
    closes: AtomicU64,
    evictions: AtomicU64,
    send_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Rotated,
    NotPooled,
    SendFailed,
    Evicted,
    Shutdown,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<PooledConnection>,
    /// Ids of connections that are open, idle or leased.
    live: HashSet<u64>,
    closed: bool,
}

/// Outcome of a watchdog's look at its connection.
#[derive(Debug)]
pub(crate) enum IdleCheck {
    /// Idle past its budget; removed from the pool and now owned by the watchdog.
    Expired(PooledConnection),
    /// Idle, but with this much budget left.
    Remaining(Duration),
    /// Leased to a request.
    Leased,
    /// Already closed through another path.
    Gone,
}

pub(crate) struct PoolInner {
    address: String,
    options: PoolOptions,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
    counters: Counters,
    shutdown: CancellationToken,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // nothing under the lock can panic halfway through a mutation
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes connection `id` from the idle stack if it has been idle for at
    /// least `keep_alive`. Membership is decided in a single critical section,
    /// so a connection is never both evicted and leased.
    pub(crate) fn check_idle(&self, id: u64, keep_alive: Duration, now: Instant) -> IdleCheck {
        let mut state = self.lock();
        if !state.live.contains(&id) {
            return IdleCheck::Gone;
        }

        let position = match state.idle.iter().position(|c| c.id() == id) {
            Some(position) => position,
            None => return IdleCheck::Leased,
        };

        let idle_for = state.idle[position]
            .idle_since()
            .map_or(Duration::ZERO, |since| now.saturating_duration_since(since));
        if idle_for < keep_alive {
            return IdleCheck::Remaining(keep_alive - idle_for);
        }

        state.live.remove(&id);
        IdleCheck::Expired(state.idle.remove(position))
    }

    pub(crate) async fn close_evicted(&self, conn: PooledConnection) {
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        self.close(conn, CloseReason::Evicted).await;
    }

    async fn close(&self, conn: PooledConnection, reason: CloseReason) {
        self.lock().live.remove(&conn.id());
        debug!(
            "MLLP: Closing connection {} to {} ({:?})",
            conn.id(),
            self.address,
            reason
        );
        conn.close().await;
        self.counters.closes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Held across a send. If the send future is dropped mid-exchange (request
/// timeout, client gone) the connection is dropped with it, so the guard
/// forgets its id and stops its watchdog.
struct Lease<'a> {
    inner: &'a PoolInner,
    id: u64,
    cancel: CancellationToken,
    armed: bool,
}

impl<'a> Lease<'a> {
    fn new(inner: &'a PoolInner, conn: &PooledConnection) -> Self {
        Lease {
            inner,
            id: conn.id(),
            cancel: conn.cancel_token().clone(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.inner.lock().live.remove(&self.id);
        self.cancel.cancel();
        self.inner.counters.closes.fetch_add(1, Ordering::Relaxed);
        debug!(
            "MLLP: Send on connection {} to {} abandoned, connection dropped",
            self.id, self.inner.address
        );
    }
}

/// Connection pool for one MLLP endpoint. Cloning is cheap and every clone
/// shares the same connections.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates an empty pool for `address` (`host:port`). Connections are opened on demand.
    pub fn new(address: impl Into<String>, options: PoolOptions) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                address: address.into(),
                options,
                state: Mutex::new(PoolState::default()),
                next_id: AtomicU64::new(1),
                counters: Counters::default(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    /// Sends one message on a pooled connection and returns the acknowledgement payload.
    ///
    /// Connect and send failures are returned as-is; nothing is retried.
    /// A connection that failed a send is closed, never put back.
    pub async fn send(&self, payload: Bytes) -> Result<Bytes> {
        let mut conn = match self.acquire()? {
            Some(conn) => conn,
            None => self.connect().await?,
        };

        let mut lease = Lease::new(&self.inner, &conn);
        let sent = conn.send(payload).await;
        lease.disarm();

        match sent {
            Ok(ack) => {
                self.release(conn).await;
                Ok(ack)
            }
            Err(err) => {
                warn!(
                    "MLLP: Send on connection {} to {} failed: {}",
                    conn.id(),
                    self.inner.address,
                    err
                );
                self.inner
                    .counters
                    .send_failures
                    .fetch_add(1, Ordering::Relaxed);
                self.inner.close(conn, CloseReason::SendFailed).await;
                Err(err)
            }
        }
    }

    /// Number of connections currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.inner.lock().idle.len()
    }

    pub fn stats(&self) -> PoolStats {
        let counters = &self.inner.counters;
        PoolStats {
            connects: counters.connects.load(Ordering::Relaxed),
            reuses: counters.reuses.load(Ordering::Relaxed),
            closes: counters.closes.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            send_failures: counters.send_failures.load(Ordering::Relaxed),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().closed
    }

    /// Stops every watchdog and closes the idle connections. Sends after this
    /// fail with [`GatewayError::PoolClosed`]; connections still leased are
    /// closed when their request finishes.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let idle = {
            let mut state = self.inner.lock();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };

        debug!(
            "MLLP: Pool for {} shutting down, closing {} idle connections",
            self.inner.address,
            idle.len()
        );
        for conn in idle {
            self.inner.close(conn, CloseReason::Shutdown).await;
        }
    }

    /// Pops the most recently released idle connection.
    fn acquire(&self) -> Result<Option<PooledConnection>> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(GatewayError::PoolClosed);
        }

        let conn = state.idle.pop().map(|mut conn| {
            conn.mark_leased();
            conn
        });
        if conn.is_some() {
            self.inner.counters.reuses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(conn)
    }

    /// Opens a new connection outside the lock and starts its watchdog.
    async fn connect(&self) -> Result<PooledConnection> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.shutdown.child_token();
        let conn = PooledConnection::connect(
            id,
            &self.inner.address,
            self.inner.options.timeout,
            cancel.clone(),
        )
        .await?;

        self.inner.lock().live.insert(id);
        self.inner.counters.connects.fetch_add(1, Ordering::Relaxed);

        if let Some(keep_alive) = self.inner.options.keep_alive.idle_timeout() {
            watchdog::spawn(Arc::downgrade(&self.inner), id, keep_alive, cancel);
        }
        Ok(conn)
    }

    /// Returns a connection after a successful exchange, or closes it when it
    /// has used up its message budget or pooling is disabled.
    async fn release(&self, mut conn: PooledConnection) {
        let exhausted = self
            .inner
            .options
            .max_messages
            .map_or(false, |max| conn.message_count() >= max);
        if exhausted {
            self.inner.close(conn, CloseReason::Rotated).await;
            return;
        }
        if self.inner.options.keep_alive == KeepAlive::Disabled {
            self.inner.close(conn, CloseReason::NotPooled).await;
            return;
        }

        conn.mark_idle(Instant::now());
        let rejected = {
            let mut state = self.inner.lock();
            if state.closed {
                Some(conn)
            } else {
                state.idle.push(conn);
                None
            }
        };
        if let Some(conn) = rejected {
            self.inner.close(conn, CloseReason::Shutdown).await;
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.inner.address)
            .field("options", &self.inner.options)
            .finish()
    }
}
