//! Keep-alive watchdog: one background task per pooled connection that closes
//! the connection once it has sat idle for its whole keep-alive budget.

use log::{debug, trace};
use std::sync::Weak;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::pool::{IdleCheck, PoolInner};

/// Starts the watchdog for connection `id`.
///
/// The task ends when it evicts the connection, when the connection is closed
/// some other way (`cancel` fires, or the id is no longer live), or when the
/// pool itself is dropped.
pub(crate) fn spawn(pool: Weak<PoolInner>, id: u64, keep_alive: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut wait = keep_alive;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    trace!("MLLP: Watchdog for connection {} cancelled", id);
                    return;
                }
                _ = sleep(wait) => {}
            }

            let inner = match pool.upgrade() {
                Some(inner) => inner,
                None => return,
            };

            match inner.check_idle(id, keep_alive, Instant::now()) {
                IdleCheck::Expired(conn) => {
                    debug!(
                        "MLLP: Connection {} idle for {:?}, evicting",
                        id, keep_alive
                    );
                    inner.close_evicted(conn).await;
                    return;
                }
                // woke early, or the connection was reused since we slept
                IdleCheck::Remaining(rest) => wait = rest,
                // a leased connection restarts the full budget
                IdleCheck::Leased => wait = keep_alive,
                IdleCheck::Gone => return,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use crate::config::{KeepAlive, PoolOptions};
    use crate::pool::ConnectionPool;
    use crate::test_support::{MockBehaviour, MockMllpServer};
    use bytes::Bytes;
    use std::time::Duration;

    fn pool_for(server: &MockMllpServer, keep_alive: Duration) -> ConnectionPool {
        ConnectionPool::new(
            server.address(),
            PoolOptions::default().with_keep_alive(KeepAlive::Idle(keep_alive)),
        )
    }

    #[tokio::test]
    async fn exits_when_connection_rotated() {
        let server = MockMllpServer::start(MockBehaviour::Ack).await;
        let pool = ConnectionPool::new(
            server.address(),
            PoolOptions::default()
                .with_keep_alive(KeepAlive::Idle(Duration::from_millis(50)))
                .with_max_messages(1),
        );

        pool.send(Bytes::from_static(b"MSH")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        // closed by rotation, not by the watchdog
        assert_eq!(pool.stats().closes, 1);
        assert_eq!(pool.stats().evictions, 0);
    }

    #[tokio::test]
    async fn evicts_each_idle_connection_independently() {
        let server =
            MockMllpServer::start(MockBehaviour::SlowAck(Duration::from_millis(50))).await;
        let pool = pool_for(&server, Duration::from_millis(150));

        let (a, b) = tokio::join!(
            pool.send(Bytes::from_static(b"one")),
            pool.send(Bytes::from_static(b"two"))
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(pool.idle_count(), 2);

        server.wait_for_closed(2).await;
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.stats().evictions, 2);
    }

    #[tokio::test]
    async fn stops_after_pool_dropped() {
        let server = MockMllpServer::start(MockBehaviour::Ack).await;
        let pool = pool_for(&server, Duration::from_millis(50));
        pool.send(Bytes::from_static(b"MSH")).await.unwrap();

        // dropping the last handle drops the idle connection with it
        drop(pool);

        server.wait_for_closed(1).await;
    }
}
