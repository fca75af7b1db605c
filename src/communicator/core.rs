//! Communicator: the public handle over a connection pool.
//!
//! # Example
//!
//! ```no_run
//! use communication_stack::Communicator;
//!
//! # async fn example() -> communication_stack::Result<()> {
//! let communicator = Communicator::new(3, "127.0.0.1", 5555, false)?;
//! communicator.set_handshake(b"handshake".to_vec(), false)?;
//! communicator.connect()?;
//!
//! let mut pending = communicator.communicate(b"this is a request".to_vec())?;
//! let reply = communicator.communicate_receive(&mut pending).await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::{Envelope, Handshake};
use crate::transport::connection::{ConnectionSettings, Outbound};
use crate::transport::pool::{ConnectionPool, PoolConfig};
use crate::transport::{ConnectionState, Correlator, Endpoint, PendingReply, PoolStatus};

use super::builder::CommunicatorBuilder;
use super::options::CommunicatorOptions;

// ============================================================================
// Communicator
// ============================================================================

/// Self-healing pool of TCP connections to one endpoint.
///
/// `connect`, `send` and `communicate` never wait for the network; only
/// [`Self::communicate_receive`] suspends the caller.
///
/// # Thread Safety
///
/// `Communicator` is `Send + Sync`; share it behind an `Arc` to use it
/// from several tasks.
pub struct Communicator {
    pool_size: usize,
    endpoint: Endpoint,
    raise_on_error: bool,
    options: CommunicatorOptions,

    /// Frozen by the first `connect()`.
    handshake: Mutex<Option<Handshake>>,

    /// Pool of the current `connect()` cycle.
    pool: RwLock<Option<Arc<ConnectionPool>>>,

    /// Reply of the most recent accepted handshake.
    handshake_reply: Arc<watch::Sender<Option<Envelope>>>,
}

// ============================================================================
// Communicator - Display
// ============================================================================

impl fmt::Debug for Communicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("endpoint", &self.endpoint)
            .field("pool_size", &self.pool_size)
            .field("raise_on_error", &self.raise_on_error)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Communicator - Construction
// ============================================================================

impl Communicator {
    /// Creates a communicator with default options.
    ///
    /// # Arguments
    ///
    /// * `pool_size` - Connections to maintain (at least 1)
    /// * `host` - Remote host name or address
    /// * `port` - Remote port
    /// * `raise_on_error` - Surface pool failures to callers
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on invalid arguments.
    pub fn new(
        pool_size: usize,
        host: impl Into<String>,
        port: u16,
        raise_on_error: bool,
    ) -> Result<Self> {
        Self::builder()
            .pool_size(pool_size)
            .endpoint(host, port)
            .raise_on_error(raise_on_error)
            .build()
    }

    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> CommunicatorBuilder {
        CommunicatorBuilder::new()
    }

    pub(crate) fn from_parts(
        pool_size: usize,
        endpoint: Endpoint,
        raise_on_error: bool,
        handshake: Option<Handshake>,
        options: CommunicatorOptions,
    ) -> Self {
        Self {
            pool_size,
            endpoint,
            raise_on_error,
            options,
            handshake: Mutex::new(handshake),
            pool: RwLock::new(None),
            handshake_reply: Arc::new(watch::channel(None).0),
        }
    }
}

// ============================================================================
// Communicator - Handshake
// ============================================================================

impl Communicator {
    /// Sets the handshake sent on every connection.
    ///
    /// Returns the envelope that will be transmitted, byte-identical on
    /// every (re)connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] after `connect()` has been called.
    pub fn set_handshake(
        &self,
        payload: impl Into<Vec<u8>>,
        expect_failure: bool,
    ) -> Result<Envelope> {
        self.set_handshake_with(Handshake::new(payload, expect_failure))
    }

    /// Sets a prepared handshake, e.g. one with a custom predicate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] after `connect()` has been called.
    pub fn set_handshake_with(&self, handshake: Handshake) -> Result<Envelope> {
        let pool = self.pool.read();
        if pool.is_some() {
            return Err(Error::config(
                "Handshake must be set before connect() and cannot change afterwards",
            ));
        }

        let envelope = handshake.envelope().clone();
        *self.handshake.lock() = Some(handshake);
        Ok(envelope)
    }

    /// Returns the reply of the most recent accepted handshake.
    #[inline]
    #[must_use]
    pub fn handshake_response(&self) -> Option<Envelope> {
        self.handshake_reply.borrow().clone()
    }

    /// Waits until a handshake reply has been accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no handshake succeeds within `wait`.
    pub async fn wait_handshake_response(&self, wait: Duration) -> Result<Envelope> {
        let mut rx = self.handshake_reply.subscribe();

        let reply = timeout(wait, rx.wait_for(Option::is_some))
            .await
            .map_err(|_| Error::timeout("handshake reply", wait.as_millis() as u64))?
            .map_err(|_| Error::ConnectionClosed)?
            .clone();

        reply.ok_or(Error::ConnectionClosed)
    }
}

// ============================================================================
// Communicator - Lifecycle
// ============================================================================

impl Communicator {
    /// Starts every connection and returns without waiting for them.
    ///
    /// Calling it while running is a no-op. After a pool failure or
    /// [`Self::close`] it starts a fresh pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] outside a Tokio runtime.
    pub fn connect(&self) -> Result<()> {
        if Handle::try_current().is_err() {
            return Err(Error::config(
                "connect() must be called from within a Tokio runtime",
            ));
        }

        let mut slot = self.pool.write();
        if let Some(pool) = slot.as_ref() {
            if pool.status() == PoolStatus::Running {
                debug!(endpoint = %self.endpoint, "Already connected");
                return Ok(());
            }
            pool.shutdown();
        }

        let handshake = self.handshake.lock().clone();
        let settings = ConnectionSettings::new(
            self.endpoint.clone(),
            handshake,
            self.options.connect_timeout,
            self.options.handshake_timeout,
            self.options.max_frame_size,
        )?;

        let config = PoolConfig {
            pool_size: self.pool_size,
            raise_on_error: self.raise_on_error,
            reconnect_delay: self.options.reconnect_delay,
            max_retries: self.options.max_retries,
        };

        self.handshake_reply.send_replace(None);
        *slot = Some(ConnectionPool::start(
            config,
            Arc::new(settings),
            Arc::new(Correlator::new(self.options.max_pending)),
            Arc::clone(&self.handshake_reply),
        ));

        info!(endpoint = %self.endpoint, pool_size = self.pool_size, "Communicator connecting");
        Ok(())
    }

    /// Closes every connection. Pending requests fail with
    /// [`Error::ConnectionClosed`].
    pub fn close(&self) {
        if let Some(pool) = self.pool.read().as_ref()
            && pool.status() == PoolStatus::Running
        {
            pool.shutdown();
        }
    }
}

// ============================================================================
// Communicator - Messaging
// ============================================================================

impl Communicator {
    /// Sends a message without expecting a reply.
    ///
    /// Returns the envelope exactly as it goes on the wire.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] before `connect()` or after `close()`
    /// - The classified pool failure if the pool has failed
    pub fn send(&self, payload: impl Into<Vec<u8>>) -> Result<Envelope> {
        let pool = self.pool()?;
        let envelope = Envelope::new(payload);

        pool.dispatch(Outbound::encode(&envelope)?)?;
        Ok(envelope)
    }

    /// Sends a request and registers for its reply.
    ///
    /// The correlation entry exists before the request is handed to any
    /// connection, so even an immediate reply is not missed.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] before `connect()` or after `close()`
    /// - The classified pool failure if the pool has failed
    /// - [`Error::TooManyPending`] if too many requests await replies
    pub fn communicate(&self, payload: impl Into<Vec<u8>>) -> Result<PendingReply> {
        let pool = self.pool()?;
        let envelope = Envelope::new(payload);
        let outbound = Outbound::encode(&envelope)?;

        let correlator = pool.correlator();
        let receiver = correlator.register(envelope.id)?;
        let pending = PendingReply::new(envelope, receiver, Arc::clone(correlator));

        pool.dispatch(outbound)?;
        Ok(pending)
    }

    /// Waits for the reply to `pending` using the configured request timeout.
    ///
    /// # Errors
    ///
    /// See [`PendingReply::receive`].
    pub async fn communicate_receive(&self, pending: &mut PendingReply) -> Result<Envelope> {
        pending.receive(self.options.request_timeout).await
    }

    /// Waits for the reply to `pending` for at most `wait`.
    ///
    /// # Errors
    ///
    /// See [`PendingReply::receive`].
    pub async fn communicate_receive_timeout(
        &self,
        pending: &mut PendingReply,
        wait: Duration,
    ) -> Result<Envelope> {
        pending.receive(Some(wait)).await
    }

    fn pool(&self) -> Result<Arc<ConnectionPool>> {
        self.pool.read().clone().ok_or(Error::NotConnected)
    }
}

// ============================================================================
// Communicator - Diagnostics
// ============================================================================

impl Communicator {
    /// Returns the number of connections maintained.
    #[inline]
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the remote endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns whether pool failures are surfaced to callers.
    #[inline]
    #[must_use]
    pub fn raise_on_error(&self) -> bool {
        self.raise_on_error
    }

    /// Returns the configured options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &CommunicatorOptions {
        &self.options
    }

    /// Returns the pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.pool
            .read()
            .as_ref()
            .map_or(PoolStatus::Idle, |pool| pool.status())
    }

    /// Returns how many times the whole pool was recreated.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.pool.read().as_ref().map_or(0, |pool| pool.generation())
    }

    /// Returns the number of connections ready for traffic.
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.pool.read().as_ref().map_or(0, |pool| pool.ready_count())
    }

    /// Returns the state of every connection, in slot order.
    #[must_use]
    pub fn connection_states(&self) -> Vec<ConnectionState> {
        self.pool
            .read()
            .as_ref()
            .map(|pool| pool.connection_states())
            .unwrap_or_default()
    }

    /// Returns the number of requests awaiting replies.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pool
            .read()
            .as_ref()
            .map_or(0, |pool| pool.correlator().pending_count())
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Tests
// ============================================================================
