//! In-process MLLP endpoint for tests.

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::codec::MllpCodec;

/// How the mock endpoint answers each frame.
#[derive(Debug, Clone, Copy)]
pub enum MockBehaviour {
    /// Reply `ACK|<payload>` immediately.
    Ack,
    /// Reply `ACK|<payload>` after a delay.
    SlowAck(Duration),
    /// Read the frame and never answer.
    Silent,
    /// Read the frame and drop the connection.
    Hangup,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicUsize,
    closed: AtomicUsize,
    frames: AtomicUsize,
}

pub struct MockMllpServer {
    address: String,
    counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl MockMllpServer {
    pub async fn start(behaviour: MockBehaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let counters = Arc::new(Counters::default());

        let accept_counters = counters.clone();
        let task = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                accept_counters.accepted.fetch_add(1, Ordering::SeqCst);
                let counters = accept_counters.clone();
                tokio::spawn(async move {
                    serve(stream, behaviour, &counters).await;
                    counters.closed.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        MockMllpServer {
            address,
            counters,
            task,
        }
    }

    pub fn address(&self) -> String {
        self.address.clone()
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    /// Connections the client side has closed so far.
    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> usize {
        self.counters.frames.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` connections have closed, failing after 2s.
    pub async fn wait_for_closed(&self, count: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(2), async {
            while self.closed() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "expected {} closed connections, saw {}",
            count,
            self.closed()
        );
    }
}

impl Drop for MockMllpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, behaviour: MockBehaviour, counters: &Counters) {
    let mut transport = Framed::new(stream, MllpCodec::new());

    while let Some(Ok(message)) = transport.next().await {
        counters.frames.fetch_add(1, Ordering::SeqCst);
        match behaviour {
            MockBehaviour::Ack => {}
            MockBehaviour::SlowAck(delay) => tokio::time::sleep(delay).await,
            MockBehaviour::Silent => continue,
            MockBehaviour::Hangup => return,
        }
        if transport.send(ack_for(&message)).await.is_err() {
            return;
        }
    }
}

fn ack_for(message: &BytesMut) -> Bytes {
    let mut ack = BytesMut::from(&b"ACK|"[..]);
    ack.extend_from_slice(message);
    ack.freeze()
}

/// An address nothing is listening on.
pub async fn unused_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}
