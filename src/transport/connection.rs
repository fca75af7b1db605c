//! Pooled TCP connection and its state machine.
//!
//! Each connection runs in its own tokio task:
//!
//! ```text
//! Disconnected ─► Connecting ─┬─► AwaitingHandshakeReply ─┬─► Ready
//!                             │                           │     │
//!                             └─► Ready (no handshake)    │     │
//!                                                         ▼     ▼
//!                                      Failed ◄───────────┴─────┘
//! ```
//!
//! The task owns the read half and the outbound queue. Messages arriving
//! before `Ready` are queued; on entering `Ready` the write half moves to a
//! writer task that drains the queue in order, so the handshake is always
//! the first frame on the wire and reads never wait behind a slow write.
//! `Failed` is terminal: the task reports its exit to the pool together
//! with every message it never wrote, and the pool spawns a fresh
//! connection.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::identifiers::{ConnectionId, RequestId};
use crate::protocol::{Envelope, Handshake, HandshakeVerdict, frame_stream, write_frame};

use super::correlator::Correlator;

// ============================================================================
// Endpoint
// ============================================================================

/// Remote address the pool dials.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    #[inline]
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Created, socket not yet requested.
    Disconnected = 0,
    /// Socket open in progress.
    Connecting = 1,
    /// Handshake sent, waiting for the reply.
    AwaitingHandshakeReply = 2,
    /// Carrying application traffic.
    Ready = 3,
    /// Terminal failure; the pool replaces this connection.
    Failed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::AwaitingHandshakeReply,
            3 => Self::Ready,
            4 => Self::Failed,
            _ => Self::Disconnected,
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Per-pool settings shared by every connection.
#[derive(Debug)]
pub(crate) struct ConnectionSettings {
    pub endpoint: Endpoint,
    pub handshake: Option<Handshake>,
    /// Encoded handshake envelope, identical on every connection.
    pub handshake_body: Option<Vec<u8>>,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub max_frame_size: usize,
}

impl ConnectionSettings {
    pub fn new(
        endpoint: Endpoint,
        handshake: Option<Handshake>,
        connect_timeout: Duration,
        handshake_timeout: Duration,
        max_frame_size: usize,
    ) -> Result<Self> {
        let handshake_body = handshake
            .as_ref()
            .map(|h| h.envelope().encode())
            .transpose()?;

        Ok(Self {
            endpoint,
            handshake,
            handshake_body,
            connect_timeout,
            handshake_timeout,
            max_frame_size,
        })
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// An encoded envelope waiting to be written.
#[derive(Debug, Clone)]
pub(crate) struct Outbound {
    pub id: RequestId,
    pub body: Vec<u8>,
}

impl Outbound {
    pub fn encode(envelope: &Envelope) -> Result<Self> {
        Ok(Self {
            id: envelope.id,
            body: envelope.encode()?,
        })
    }
}

// ============================================================================
// Outbox
// ============================================================================

/// Outbound queue shared between a connection task and its writer.
///
/// A message leaves the queue only after it was written, so whatever is
/// still queued when the connection ends goes to the replacement.
#[derive(Default)]
struct Outbox {
    queue: Mutex<VecDeque<Outbound>>,
    notify: Notify,
}

impl Outbox {
    fn push(&self, outbound: Outbound) {
        self.queue.lock().push_back(outbound);
        self.notify.notify_one();
    }

    fn front_body(&self) -> Option<(RequestId, Vec<u8>)> {
        self.queue
            .lock()
            .front()
            .map(|outbound| (outbound.id, outbound.body.clone()))
    }

    fn pop_front(&self) {
        self.queue.lock().pop_front();
    }

    fn len(&self) -> usize {
        self.queue.lock().len()
    }

    fn drain(&self) -> Vec<Outbound> {
        self.queue.lock().drain(..).collect()
    }
}

/// Writes queued messages until a write fails. Returns the failure reason.
async fn write_loop(id: ConnectionId, mut writer: OwnedWriteHalf, outbox: Arc<Outbox>) -> String {
    loop {
        let Some((request_id, body)) = outbox.front_body() else {
            outbox.notify.notified().await;
            continue;
        };
        if let Err(e) = write_frame(&mut writer, &body).await {
            return format!("write failed: {e}");
        }
        trace!(%id, %request_id, "Message sent");
        outbox.pop_front();
    }
}

// ============================================================================
// Events
// ============================================================================

/// Why a connection task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConnectionExit {
    /// Socket could not be opened.
    EstablishmentFailed(String),
    /// Handshake reply rejected or missing.
    HandshakeRejected(String),
    /// Socket failed or peer closed after it was open.
    Closed(String),
    /// Shut down by the pool.
    Shutdown,
}

/// Messages from connection tasks (and the pool itself) to the supervisor.
#[derive(Debug)]
pub(crate) enum PoolEvent {
    Connected {
        slot: usize,
        id: ConnectionId,
    },
    Ready {
        slot: usize,
        id: ConnectionId,
        handshake_reply: Option<Envelope>,
    },
    /// First inbound message after `Ready`.
    Responsive {
        slot: usize,
        id: ConnectionId,
    },
    Exited {
        slot: usize,
        id: ConnectionId,
        exit: ConnectionExit,
        leftover: Vec<Outbound>,
    },
    /// A message no live connection accepted.
    Orphaned(Outbound),
    Shutdown,
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the connection task.
enum ConnectionCommand {
    /// Write (or queue) a message.
    Send(Outbound),
    /// Close the socket and hand back unsent messages.
    Shutdown,
}

// ============================================================================
// ConnectionHandle
// ============================================================================

/// Pool-side handle to a running connection task.
pub(crate) struct ConnectionHandle {
    id: ConnectionId,
    slot: usize,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    state: Arc<AtomicU8>,
}

impl ConnectionHandle {
    /// Spawns a connection task for `slot`.
    ///
    /// `backlog` is queued ahead of anything sent later. The task waits
    /// `start_delay` before dialing.
    pub fn spawn(
        slot: usize,
        start_delay: Duration,
        backlog: Vec<Outbound>,
        settings: Arc<ConnectionSettings>,
        correlator: Arc<Correlator>,
        events: mpsc::UnboundedSender<PoolEvent>,
    ) -> Self {
        let id = ConnectionId::next();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8));

        let outbox = Arc::new(Outbox::default());
        for outbound in backlog {
            outbox.push(outbound);
        }

        let task = ConnectionTask {
            id,
            slot,
            settings,
            correlator,
            events,
            command_rx,
            state: Arc::clone(&state),
            outbox,
            writer: None,
            responsive: false,
        };
        tokio::spawn(task.run(start_delay));

        trace!(%id, slot, "Connection spawned");

        Self {
            id,
            slot,
            command_tx,
            state,
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Hands `outbound` to the task. Gives it back if the task has exited.
    pub fn send(&self, outbound: Outbound) -> std::result::Result<(), Outbound> {
        self.command_tx
            .send(ConnectionCommand::Send(outbound))
            .map_err(|err| match err.0 {
                ConnectionCommand::Send(outbound) => outbound,
                ConnectionCommand::Shutdown => unreachable!("only Send is returned here"),
            })
    }

    /// Asks the task to close. Unsent messages come back in its exit event.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }
}

// ============================================================================
// ConnectionTask
// ============================================================================

/// What to do after an inbound frame.
enum FrameAction {
    Continue,
    Ready(Envelope),
    Rejected(String),
}

struct ConnectionTask {
    id: ConnectionId,
    slot: usize,
    settings: Arc<ConnectionSettings>,
    correlator: Arc<Correlator>,
    events: mpsc::UnboundedSender<PoolEvent>,
    command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    state: Arc<AtomicU8>,
    outbox: Arc<Outbox>,
    /// Owns the write half once `Ready`.
    writer: Option<JoinHandle<String>>,
    responsive: bool,
}

impl ConnectionTask {
    async fn run(mut self, start_delay: Duration) {
        let exit = self.drive(start_delay).await;
        self.finish(exit).await;
    }

    /// Runs the state machine until the connection ends.
    async fn drive(&mut self, start_delay: Duration) -> ConnectionExit {
        let settings = Arc::clone(&self.settings);

        if !start_delay.is_zero() && self.pump(sleep(start_delay)).await.is_none() {
            return ConnectionExit::Shutdown;
        }

        // Disconnected -> Connecting
        self.set_state(ConnectionState::Connecting);
        let endpoint = &settings.endpoint;
        let dial = timeout(
            settings.connect_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        );

        let stream = match self.pump(dial).await {
            None => return ConnectionExit::Shutdown,
            Some(Ok(Ok(stream))) => stream,
            Some(Ok(Err(e))) => {
                debug!(id = %self.id, %endpoint, error = %e, "Connect failed");
                return ConnectionExit::EstablishmentFailed(e.to_string());
            }
            Some(Err(_)) => {
                debug!(id = %self.id, %endpoint, "Connect timed out");
                return ConnectionExit::EstablishmentFailed(format!(
                    "connect timed out after {}ms",
                    settings.connect_timeout.as_millis()
                ));
            }
        };

        let _ = stream.set_nodelay(true);
        let _ = self.events.send(PoolEvent::Connected {
            slot: self.slot,
            id: self.id,
        });

        let (read_half, mut write_half) = stream.into_split();
        let inbound = frame_stream(read_half, settings.max_frame_size);
        tokio::pin!(inbound);

        // Connecting -> Ready
        let Some(body) = settings.handshake_body.as_ref() else {
            self.enter_ready(write_half, None);
            return self.run_ready(inbound).await;
        };

        // Connecting -> AwaitingHandshakeReply
        if let Err(e) = write_frame(&mut write_half, body).await {
            return ConnectionExit::Closed(format!("handshake write failed: {e}"));
        }
        self.set_state(ConnectionState::AwaitingHandshakeReply);
        let deadline = Instant::now() + settings.handshake_timeout;
        debug!(id = %self.id, slot = self.slot, "Handshake sent");

        // AwaitingHandshakeReply -> Ready
        loop {
            tokio::select! {
                frame = inbound.next() => {
                    let body = match frame {
                        Some(Ok(body)) => body,
                        Some(Err(e)) => return ConnectionExit::Closed(e.to_string()),
                        None => return ConnectionExit::Closed("peer closed the connection".into()),
                    };

                    match self.on_frame(&body) {
                        FrameAction::Continue => {}
                        FrameAction::Rejected(reason) => {
                            return ConnectionExit::HandshakeRejected(reason);
                        }
                        FrameAction::Ready(reply) => {
                            self.enter_ready(write_half, Some(reply));
                            return self.run_ready(inbound).await;
                        }
                    }
                }

                command = self.command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(outbound)) => self.outbox.push(outbound),
                        Some(ConnectionCommand::Shutdown) | None => {
                            return ConnectionExit::Shutdown;
                        }
                    }
                }

                _ = sleep_until(deadline) => {
                    let handshake_timeout = settings.handshake_timeout.as_millis() as u64;
                    let reason = settings
                        .handshake
                        .as_ref()
                        .map(|h| h.timeout_reason(handshake_timeout))
                        .unwrap_or_default();
                    return ConnectionExit::HandshakeRejected(reason);
                }
            }
        }
    }

    /// Carries traffic until the socket fails or the pool shuts it down.
    async fn run_ready<S>(&mut self, mut inbound: Pin<&mut S>) -> ConnectionExit
    where
        S: Stream<Item = Result<Vec<u8>>>,
    {
        loop {
            tokio::select! {
                frame = inbound.next() => {
                    match frame {
                        Some(Ok(body)) => {
                            let _ = self.on_frame(&body);
                        }
                        Some(Err(e)) => return ConnectionExit::Closed(e.to_string()),
                        None => return ConnectionExit::Closed("peer closed the connection".into()),
                    }
                }

                command = self.command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(outbound)) => self.outbox.push(outbound),
                        Some(ConnectionCommand::Shutdown) | None => {
                            return ConnectionExit::Shutdown;
                        }
                    }
                }

                reason = writer_exit(&mut self.writer) => {
                    self.writer = None;
                    return ConnectionExit::Closed(reason);
                }
            }
        }
    }

    /// Drives `future` while queueing sends. `None` means shutdown.
    async fn pump<F: Future>(&mut self, future: F) -> Option<F::Output> {
        tokio::pin!(future);

        loop {
            tokio::select! {
                output = &mut future => return Some(output),
                command = self.command_rx.recv() => match command {
                    Some(ConnectionCommand::Send(outbound)) => self.outbox.push(outbound),
                    Some(ConnectionCommand::Shutdown) | None => return None,
                },
            }
        }
    }

    /// Classifies one inbound frame.
    fn on_frame(&mut self, body: &[u8]) -> FrameAction {
        let envelope = match Envelope::decode(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(id = %self.id, error = %e, len = body.len(), "Dropping undecodable frame");
                return FrameAction::Continue;
            }
        };

        let handshake = self.settings.handshake.as_ref();

        if self.state() == ConnectionState::AwaitingHandshakeReply {
            return match handshake {
                Some(handshake) if handshake.is_reply(&envelope) => {
                    match handshake.check(&envelope) {
                        HandshakeVerdict::Accepted => FrameAction::Ready(envelope),
                        HandshakeVerdict::Rejected(reason) => {
                            warn!(id = %self.id, slot = self.slot, %reason, "Handshake rejected");
                            FrameAction::Rejected(reason)
                        }
                    }
                }
                _ => {
                    debug!(id = %self.id, request_id = %envelope.id, "Dropping message received before handshake reply");
                    FrameAction::Continue
                }
            };
        }

        if !self.responsive {
            self.responsive = true;
            let _ = self.events.send(PoolEvent::Responsive {
                slot: self.slot,
                id: self.id,
            });
        }

        let request_id = envelope.id;
        if self.correlator.fulfill(envelope) {
            trace!(id = %self.id, %request_id, "Reply delivered");
        } else if handshake.is_some_and(|h| h.id() == request_id) {
            trace!(id = %self.id, "Ignoring repeated handshake reply");
        } else {
            debug!(id = %self.id, %request_id, "Dropping unsolicited message");
        }
        FrameAction::Continue
    }

    /// Enters `Ready`, reports it, and hands the write half to the writer.
    fn enter_ready(&mut self, writer: OwnedWriteHalf, handshake_reply: Option<Envelope>) {
        self.set_state(ConnectionState::Ready);
        info!(id = %self.id, slot = self.slot, queued = self.outbox.len(), "Connection ready");

        let _ = self.events.send(PoolEvent::Ready {
            slot: self.slot,
            id: self.id,
            handshake_reply,
        });

        self.writer = Some(tokio::spawn(write_loop(
            self.id,
            writer,
            Arc::clone(&self.outbox),
        )));
    }

    /// Reports the exit and hands back every unsent message.
    async fn finish(mut self, exit: ConnectionExit) {
        let state = match exit {
            ConnectionExit::Shutdown => ConnectionState::Disconnected,
            _ => ConnectionState::Failed,
        };
        self.set_state(state);

        // The writer must be gone before the queue is read back.
        if let Some(writer) = self.writer.take() {
            writer.abort();
            let _ = writer.await;
        }

        // Closing first makes later sends bounce back to the pool.
        self.command_rx.close();
        while let Ok(command) = self.command_rx.try_recv() {
            if let ConnectionCommand::Send(outbound) = command {
                self.outbox.push(outbound);
            }
        }

        let leftover = self.outbox.drain();
        debug!(id = %self.id, slot = self.slot, ?exit, unsent = leftover.len(), "Connection task ended");

        let _ = self.events.send(PoolEvent::Exited {
            slot: self.slot,
            id: self.id,
            exit,
            leftover,
        });
    }

    #[inline]
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Resolves when the writer task ends; pending while there is none.
async fn writer_exit(writer: &mut Option<JoinHandle<String>>) -> String {
    match writer {
        Some(handle) => handle
            .await
            .unwrap_or_else(|e| format!("writer task failed: {e}")),
        None => std::future::pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================
