//! In-process TCP peer for integration tests.
//!
//! Accepts any number of connections, records every frame body it
//! receives, and can push frames to every open connection.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

use communication_stack::Envelope;
use communication_stack::protocol::{DEFAULT_MAX_FRAME_SIZE, encode_frame, read_frame};

// ============================================================================
// Tracing
// ============================================================================

/// Installs a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Returns a local port nothing listens on.
pub async fn closed_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

// ============================================================================
// MockPeer
// ============================================================================

#[derive(Default)]
struct Shared {
    received: Mutex<Vec<Vec<u8>>>,
    writers: Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
    accepted: Mutex<usize>,
}

/// Recording peer.
pub struct MockPeer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl MockPeer {
    /// Starts a peer that never replies on its own.
    pub async fn start() -> Result<Self> {
        Self::spawn(false).await
    }

    /// Starts a peer that answers every envelope with its own payload.
    pub async fn echo() -> Result<Self> {
        Self::spawn(true).await
    }

    async fn spawn(echo: bool) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared::default());

        let accept_shared = Arc::clone(&shared);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let _ = stream.set_nodelay(true);
                let (mut reader, writer) = stream.into_split();
                let (tx, rx) = mpsc::unbounded_channel();

                *accept_shared.accepted.lock() += 1;
                let echo_tx = tx.downgrade();
                accept_shared.writers.lock().push(tx);
                tokio::spawn(write_loop(writer, rx));

                let shared = Arc::clone(&accept_shared);
                tokio::spawn(async move {
                    while let Ok(Some(body)) = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await
                    {
                        shared.received.lock().push(body.clone());
                        if echo
                            && let Ok(envelope) = Envelope::decode(&body)
                            && let Ok(encoded) =
                                Envelope::reply_to(&envelope, envelope.payload().to_vec()).encode()
                            && let Some(tx) = echo_tx.upgrade()
                        {
                            let _ = tx.send(encoded);
                        }
                    }
                });
            }
        });

        Ok(Self {
            addr,
            shared,
            accept_task,
        })
    }

    /// Returns the listening port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Returns how many received frames equal `envelope` byte for byte.
    pub fn message_count(&self, envelope: &Envelope) -> usize {
        let Ok(expected) = envelope.encode() else {
            return 0;
        };
        self.shared
            .received
            .lock()
            .iter()
            .filter(|body| **body == expected)
            .count()
    }

    /// Returns the number of frames received so far.
    pub fn received_count(&self) -> usize {
        self.shared.received.lock().len()
    }

    /// Returns the number of connections accepted so far.
    pub fn accepted_count(&self) -> usize {
        *self.shared.accepted.lock()
    }

    /// Sends `envelope` on every open connection. Returns how many took it.
    pub fn send_to_all(&self, envelope: &Envelope) -> Result<usize> {
        let body = envelope.encode()?;
        let mut writers = self.shared.writers.lock();
        writers.retain(|tx| tx.send(body.clone()).is_ok());
        Ok(writers.len())
    }

    /// Closes every open connection from the peer side.
    pub fn disconnect_all(&self) {
        self.shared.writers.lock().clear();
    }

    /// Polls until `envelope` was received `count` times.
    pub async fn wait_for_count(&self, envelope: &Envelope, count: usize, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        while Instant::now() < deadline {
            if self.message_count(envelope) >= count {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        self.message_count(envelope) >= count
    }

    /// Polls until `count` connections were accepted.
    pub async fn wait_for_connections(&self, count: usize, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        while Instant::now() < deadline {
            if self.accepted_count() >= count {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        self.accepted_count() >= count
    }
}

impl Drop for MockPeer {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.disconnect_all();
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(body) = rx.recv().await {
        let Ok(frame) = encode_frame(&body) else {
            break;
        };
        if writer.write_all(&frame).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}
