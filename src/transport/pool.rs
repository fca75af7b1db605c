//! Fixed-size connection pool with a supervising task.
//!
//! Every slot always holds exactly one connection. Connection tasks report
//! their lifecycle to a single supervisor task, which is the only place
//! that decides to replace or recreate connections.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                ConnectionPool                │
//! │  slot 0 → Connection ─┐                      │
//! │  slot 1 → Connection ─┼─ PoolEvent ─► supervisor
//! │  slot 2 → Connection ─┘                      │
//! │            ▲                                 │
//! │            └── Correlator (shared) ──────────┤
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Failure Policy
//!
//! | Exit | Without `raise_on_error` | With `raise_on_error` |
//! |------|--------------------------|-----------------------|
//! | Handshake rejected | Recreate every slot | Fail the pool |
//! | Establishment failed | Replace the slot | Fail once no slot could connect |
//! | Closed after connect | Replace the slot | Replace the slot |
//!
//! When `max_retries` is set, exceeding it fails the pool in either mode.
//! A slot's attempts count up across establishment failures and lost
//! connections alike, and reset only once a connection proves usable: its
//! handshake was accepted, or without a handshake it received a message.

// ============================================================================
// Imports
// ============================================================================

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashSet;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, PoolFailure, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::Envelope;

use super::connection::{
    ConnectionExit, ConnectionHandle, ConnectionSettings, ConnectionState, Outbound, PoolEvent,
};
use super::correlator::Correlator;

// ============================================================================
// PoolConfig
// ============================================================================

/// Recovery policy of a pool.
#[derive(Debug, Clone)]
pub(crate) struct PoolConfig {
    pub pool_size: usize,
    pub raise_on_error: bool,
    pub reconnect_delay: Duration,
    pub max_retries: Option<u32>,
}

// ============================================================================
// PoolStatus
// ============================================================================

/// Lifecycle of a communicator's pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolStatus {
    /// `connect()` has not been called.
    Idle,
    /// Connections are being maintained.
    Running,
    /// The pool gave up; every request fails with this classification.
    Failed(PoolFailure),
    /// Closed by the caller.
    Closed,
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// Owns the connections of one `connect()` cycle.
pub(crate) struct ConnectionPool {
    config: PoolConfig,
    settings: Arc<ConnectionSettings>,
    correlator: Arc<Correlator>,

    /// Slot-indexed connections. Replaced only under the write lock, so a
    /// dispatch sees either the old or the new set.
    connections: RwLock<Vec<ConnectionHandle>>,

    generation: AtomicU64,
    next_slot: AtomicUsize,
    status: Mutex<PoolStatus>,
    events_tx: mpsc::UnboundedSender<PoolEvent>,
    handshake_reply: Arc<watch::Sender<Option<Envelope>>>,
}

// ============================================================================
// ConnectionPool - Constructor
// ============================================================================

impl ConnectionPool {
    /// Spawns `pool_size` connections and the supervisor.
    ///
    /// Returns immediately; connections negotiate in the background.
    pub fn start(
        config: PoolConfig,
        settings: Arc<ConnectionSettings>,
        correlator: Arc<Correlator>,
        handshake_reply: Arc<watch::Sender<Option<Envelope>>>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let connections = (0..config.pool_size)
            .map(|slot| {
                ConnectionHandle::spawn(
                    slot,
                    Duration::ZERO,
                    Vec::new(),
                    Arc::clone(&settings),
                    Arc::clone(&correlator),
                    events_tx.clone(),
                )
            })
            .collect();

        info!(
            endpoint = %settings.endpoint,
            pool_size = config.pool_size,
            handshake = settings.handshake.is_some(),
            raise_on_error = config.raise_on_error,
            "ConnectionPool started"
        );

        let pool = Arc::new(Self {
            config,
            settings,
            correlator,
            connections: RwLock::new(connections),
            generation: AtomicU64::new(0),
            next_slot: AtomicUsize::new(0),
            status: Mutex::new(PoolStatus::Running),
            events_tx,
            handshake_reply,
        });

        tokio::spawn(Arc::clone(&pool).supervise(events_rx));

        pool
    }
}

// ============================================================================
// ConnectionPool - Public API
// ============================================================================

impl ConnectionPool {
    /// Returns the shared correlator.
    #[inline]
    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Returns the current status.
    #[inline]
    pub fn status(&self) -> PoolStatus {
        self.status.lock().clone()
    }

    /// Returns how many full-pool recreations happened.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns the number of connections in `Ready`.
    pub fn ready_count(&self) -> usize {
        self.connections
            .read()
            .iter()
            .filter(|c| c.is_ready())
            .count()
    }

    /// Returns the state of every slot, in slot order.
    pub fn connection_states(&self) -> Vec<ConnectionState> {
        self.connections.read().iter().map(|c| c.state()).collect()
    }

    /// Hands `outbound` to a connection.
    ///
    /// Prefers a `Ready` connection, rotating the starting slot; otherwise
    /// the message is queued on a connection still negotiating.
    ///
    /// # Errors
    ///
    /// - The recorded classification if the pool failed
    /// - [`Error::NotConnected`] if the pool was closed
    pub fn dispatch(&self, outbound: Outbound) -> Result<()> {
        self.ensure_running()?;

        if let Err(outbound) = self.try_dispatch(outbound) {
            // Every slot is between tasks; the supervisor parks it.
            let _ = self.events_tx.send(PoolEvent::Orphaned(outbound));
        }
        Ok(())
    }

    /// Closes every connection and fails pending requests.
    pub fn shutdown(&self) {
        *self.status.lock() = PoolStatus::Closed;

        for connection in self.connections.read().iter() {
            connection.shutdown();
        }

        self.correlator.close_all();
        let _ = self.events_tx.send(PoolEvent::Shutdown);

        info!(endpoint = %self.settings.endpoint, "ConnectionPool shut down");
    }
}

// ============================================================================
// ConnectionPool - Dispatch
// ============================================================================

impl ConnectionPool {
    fn ensure_running(&self) -> Result<()> {
        match &*self.status.lock() {
            PoolStatus::Running => Ok(()),
            PoolStatus::Failed(failure) => Err(failure.to_error()),
            PoolStatus::Idle | PoolStatus::Closed => Err(Error::NotConnected),
        }
    }

    fn try_dispatch(&self, mut outbound: Outbound) -> std::result::Result<(), Outbound> {
        let connections = self.connections.read();
        let count = connections.len();
        if count == 0 {
            return Err(outbound);
        }

        let start = self.next_slot.fetch_add(1, Ordering::Relaxed) % count;
        let order = (0..count).map(|offset| (start + offset) % count);
        let preferred = order
            .clone()
            .find(|&slot| connections[slot].is_ready())
            .unwrap_or(start);

        for slot in std::iter::once(preferred).chain(order.filter(|&slot| slot != preferred)) {
            match connections[slot].send(outbound) {
                Ok(()) => {
                    trace!(slot = connections[slot].slot(), id = %connections[slot].id(), "Message dispatched");
                    return Ok(());
                }
                Err(returned) => outbound = returned,
            }
        }

        Err(outbound)
    }

    fn is_current(&self, slot: usize, id: ConnectionId) -> bool {
        self.connections
            .read()
            .get(slot)
            .is_some_and(|c| c.id() == id)
    }
}

// ============================================================================
// ConnectionPool - Supervisor
// ============================================================================

/// Bookkeeping owned by the supervisor task.
struct Supervision {
    /// Slots whose current connection has an open socket.
    connected: FxHashSet<usize>,
    /// Slots whose latest attempt failed to open a socket.
    unreached: FxHashSet<usize>,
    /// Consecutive failed attempts per slot.
    attempts: Vec<u32>,
    /// Consecutive full-pool recreations without an accepted handshake.
    recreations: u32,
    /// Messages no connection could take.
    orphans: Vec<Outbound>,
}

impl Supervision {
    fn new(pool_size: usize) -> Self {
        Self {
            connected: FxHashSet::default(),
            unreached: FxHashSet::default(),
            attempts: vec![0; pool_size],
            recreations: 0,
            orphans: Vec::new(),
        }
    }

    fn reset_slots(&mut self) {
        self.connected.clear();
        self.unreached.clear();
        self.attempts.fill(0);
    }
}

impl ConnectionPool {
    /// Supervisor loop. Ends on shutdown or when the pool fails.
    async fn supervise(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<PoolEvent>) {
        let mut sup = Supervision::new(self.config.pool_size);

        while let Some(event) = events.recv().await {
            match event {
                PoolEvent::Shutdown => break,

                PoolEvent::Orphaned(outbound) => self.adopt(&mut sup, vec![outbound]),

                PoolEvent::Connected { slot, id } => {
                    if self.is_current(slot, id) {
                        sup.connected.insert(slot);
                        sup.unreached.remove(&slot);
                    }
                }

                PoolEvent::Responsive { slot, id } => {
                    if self.is_current(slot, id) {
                        sup.attempts[slot] = 0;
                    }
                }

                PoolEvent::Ready {
                    slot,
                    id,
                    handshake_reply,
                } => {
                    if !self.is_current(slot, id) {
                        continue;
                    }
                    if let Some(reply) = handshake_reply {
                        sup.recreations = 0;
                        sup.attempts[slot] = 0;
                        self.handshake_reply.send_replace(Some(reply));
                    }
                    debug!(slot, %id, ready = self.ready_count(), "Slot ready");
                }

                PoolEvent::Exited {
                    slot,
                    id,
                    exit,
                    leftover,
                } => {
                    if exit == ConnectionExit::Shutdown || !self.is_current(slot, id) {
                        self.adopt(&mut sup, leftover);
                        continue;
                    }
                    if self.on_exit(&mut sup, slot, exit, leftover).is_break() {
                        break;
                    }
                }
            }
        }

        debug!(endpoint = %self.settings.endpoint, "Pool supervisor terminated");
    }

    /// Reacts to the failure of a current connection.
    fn on_exit(
        &self,
        sup: &mut Supervision,
        slot: usize,
        exit: ConnectionExit,
        leftover: Vec<Outbound>,
    ) -> ControlFlow<()> {
        sup.connected.remove(&slot);

        match exit {
            ConnectionExit::EstablishmentFailed(message) => {
                sup.unreached.insert(slot);
                sup.attempts[slot] += 1;
                let attempts = sup.attempts[slot];

                let nothing_reachable =
                    sup.unreached.len() == self.config.pool_size && sup.connected.is_empty();
                if (self.config.raise_on_error && nothing_reachable) || self.exhausted(attempts) {
                    return self.fail(PoolFailure::Establishment {
                        endpoint: self.settings.endpoint.to_string(),
                        message,
                    });
                }

                warn!(slot, attempts, %message, "Connection could not be established, retrying");
                self.replace(sup, slot, leftover);
            }

            ConnectionExit::HandshakeRejected(reason) => {
                if self.config.raise_on_error {
                    return self.fail(PoolFailure::Handshake { reason });
                }

                sup.recreations += 1;
                if self.exhausted(sup.recreations) {
                    return self.fail(PoolFailure::Handshake { reason });
                }

                warn!(slot, %reason, recreations = sup.recreations, "Handshake failed, recreating pool");
                self.recreate(sup, leftover);
            }

            ConnectionExit::Closed(reason) => {
                sup.attempts[slot] += 1;
                let attempts = sup.attempts[slot];

                if self.exhausted(attempts) {
                    return self.fail(PoolFailure::Establishment {
                        endpoint: self.settings.endpoint.to_string(),
                        message: format!("connection lost {attempts} times in a row: {reason}"),
                    });
                }

                info!(slot, attempts, %reason, "Connection lost, replacing");
                self.replace(sup, slot, leftover);
            }

            ConnectionExit::Shutdown => self.adopt(sup, leftover),
        }

        ControlFlow::Continue(())
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.config.max_retries.is_some_and(|max| attempts > max)
    }

    fn spawn_connection(&self, slot: usize, backlog: Vec<Outbound>) -> ConnectionHandle {
        ConnectionHandle::spawn(
            slot,
            self.config.reconnect_delay,
            backlog,
            Arc::clone(&self.settings),
            Arc::clone(&self.correlator),
            self.events_tx.clone(),
        )
    }

    /// Replaces one dead slot.
    fn replace(&self, sup: &mut Supervision, slot: usize, mut backlog: Vec<Outbound>) {
        backlog.append(&mut sup.orphans);

        let old = {
            let mut connections = self.connections.write();
            let fresh = self.spawn_connection(slot, backlog);
            std::mem::replace(&mut connections[slot], fresh)
        };
        old.shutdown();
    }

    /// Tears down and respawns every slot.
    fn recreate(&self, sup: &mut Supervision, mut backlog: Vec<Outbound>) {
        backlog.append(&mut sup.orphans);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let old = {
            let mut connections = self.connections.write();
            let fresh = (0..self.config.pool_size)
                .map(|slot| {
                    let queued = if slot == 0 {
                        std::mem::take(&mut backlog)
                    } else {
                        Vec::new()
                    };
                    self.spawn_connection(slot, queued)
                })
                .collect();
            std::mem::replace(&mut *connections, fresh)
        };

        // Their unsent messages come back as stale exits and are adopted.
        for connection in &old {
            connection.shutdown();
        }

        sup.reset_slots();
        info!(generation, pool_size = self.config.pool_size, "Pool recreated");
    }

    /// Re-dispatches messages handed back by retired connections.
    fn adopt(&self, sup: &mut Supervision, leftover: Vec<Outbound>) {
        if leftover.is_empty() {
            return;
        }
        if self.ensure_running().is_err() {
            debug!(count = leftover.len(), "Discarding unsent messages of a stopped pool");
            return;
        }

        for outbound in leftover {
            if let Err(outbound) = self.try_dispatch(outbound) {
                sup.orphans.push(outbound);
            }
        }
    }

    /// Records `failure`, fails every waiter, and stops all connections.
    fn fail(&self, failure: PoolFailure) -> ControlFlow<()> {
        error!(endpoint = %self.settings.endpoint, %failure, "Connection pool failed");

        *self.status.lock() = PoolStatus::Failed(failure.clone());
        self.correlator.fail_all(&failure);

        for connection in self.connections.read().iter() {
            connection.shutdown();
        }

        ControlFlow::Break(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout};

    use crate::transport::connection::Endpoint;

    fn config(pool_size: usize, raise_on_error: bool, max_retries: Option<u32>) -> PoolConfig {
        PoolConfig {
            pool_size,
            raise_on_error,
            reconnect_delay: Duration::from_millis(20),
            max_retries,
        }
    }

    fn settings(port: u16) -> Arc<ConnectionSettings> {
        Arc::new(
            ConnectionSettings::new(
                Endpoint::new("127.0.0.1", port),
                None,
                Duration::from_secs(1),
                Duration::from_secs(1),
                1024,
            )
            .expect("settings"),
        )
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("addr").port()
    }

    async fn wait_for_status(pool: &ConnectionPool, wanted: impl Fn(&PoolStatus) -> bool) {
        timeout(Duration::from_secs(5), async {
            while !wanted(&pool.status()) {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("status reached in time");
    }

    #[tokio::test]
    async fn test_pool_keeps_fixed_size() {
        let pool = ConnectionPool::start(
            config(3, false, None),
            settings(closed_port().await),
            Arc::new(Correlator::new(16)),
            Arc::new(watch::channel(None).0),
        );

        assert_eq!(pool.connection_states().len(), 3);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.connection_states().len(), 3);
        assert_eq!(pool.status(), PoolStatus::Running);

        pool.shutdown();
        assert_eq!(pool.status(), PoolStatus::Closed);
    }

    #[tokio::test]
    async fn test_raise_fails_when_nothing_reachable() {
        let pool = ConnectionPool::start(
            config(3, true, None),
            settings(closed_port().await),
            Arc::new(Correlator::new(16)),
            Arc::new(watch::channel(None).0),
        );

        wait_for_status(&pool, |s| matches!(s, PoolStatus::Failed(_))).await;
        match pool.status() {
            PoolStatus::Failed(PoolFailure::Establishment { endpoint, .. }) => {
                assert!(endpoint.starts_with("127.0.0.1:"));
            }
            other => panic!("unexpected status: {other:?}"),
        }

        let outbound = Outbound::encode(&Envelope::new(b"late".to_vec())).expect("encode");
        let err = pool.dispatch(outbound).unwrap_err();
        assert!(err.to_string().contains("failed to establish"));
    }

    #[tokio::test]
    async fn test_retry_bound_fails_without_raise() {
        let pool = ConnectionPool::start(
            config(1, false, Some(2)),
            settings(closed_port().await),
            Arc::new(Correlator::new(16)),
            Arc::new(watch::channel(None).0),
        );

        wait_for_status(&pool, |s| matches!(s, PoolStatus::Failed(_))).await;
        assert_eq!(pool.generation(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_after_shutdown() {
        let pool = ConnectionPool::start(
            config(1, false, None),
            settings(closed_port().await),
            Arc::new(Correlator::new(16)),
            Arc::new(watch::channel(None).0),
        );
        pool.shutdown();

        let outbound = Outbound::encode(&Envelope::new(b"x".to_vec())).expect("encode");
        assert!(matches!(pool.dispatch(outbound), Err(Error::NotConnected)));
    }
}
