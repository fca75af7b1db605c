//! Request/reply correlation.
//!
//! The correlator is shared by every connection of one pool. Callers
//! register a slot before their request is transmitted; connection tasks
//! fulfil slots as replies arrive.
//!
//! Registration, fulfilment and pool-wide failure all happen under one
//! lock, so a request registered concurrently with a failure either lands
//! in the drained batch or observes the recorded failure. No wakeup is lost.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, PoolFailure, Result};
use crate::identifiers::RequestId;
use crate::protocol::Envelope;

// ============================================================================
// Constants
// ============================================================================

/// Default maximum pending requests before rejecting new ones.
pub const DEFAULT_MAX_PENDING: usize = 1024;

// ============================================================================
// Types
// ============================================================================

/// Single-use reply slot.
type ReplySender = oneshot::Sender<Result<Envelope>>;

/// Map of request IDs to reply slots.
type CorrelationMap = FxHashMap<RequestId, ReplySender>;

#[derive(Default)]
struct CorrelationState {
    entries: CorrelationMap,
    failure: Option<PoolFailure>,
}

// ============================================================================
// Correlator
// ============================================================================

/// Table of requests awaiting replies.
pub struct Correlator {
    state: Mutex<CorrelationState>,
    max_pending: usize,
}

impl Correlator {
    /// Creates an empty correlator.
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        Self {
            state: Mutex::new(CorrelationState::default()),
            max_pending,
        }
    }

    /// Registers a reply slot for `id`.
    ///
    /// # Errors
    ///
    /// - The recorded pool failure, if the pool has failed
    /// - [`Error::TooManyPending`] if the table is full
    /// - [`Error::Protocol`] if `id` is already registered
    pub fn register(&self, id: RequestId) -> Result<oneshot::Receiver<Result<Envelope>>> {
        let mut state = self.state.lock();

        if let Some(failure) = &state.failure {
            return Err(failure.to_error());
        }

        if state.entries.len() >= self.max_pending {
            warn!(
                pending = state.entries.len(),
                max = self.max_pending,
                "Too many pending requests"
            );
            return Err(Error::TooManyPending {
                pending: state.entries.len(),
                max: self.max_pending,
            });
        }

        if state.entries.contains_key(&id) {
            return Err(Error::protocol(format!("Request {id} is already pending")));
        }

        let (tx, rx) = oneshot::channel();
        state.entries.insert(id, tx);
        trace!(request_id = %id, "Correlation registered");
        Ok(rx)
    }

    /// Delivers `reply` to its waiter.
    ///
    /// Returns `false` if no request with the reply's id is pending.
    pub fn fulfill(&self, reply: Envelope) -> bool {
        let tx = self.state.lock().entries.remove(&reply.id);

        match tx {
            Some(tx) => {
                let id = reply.id;
                if tx.send(Ok(reply)).is_err() {
                    debug!(request_id = %id, "Reply arrived after waiter gave up");
                }
                true
            }
            None => false,
        }
    }

    /// Removes a pending entry without fulfilling it.
    pub fn cancel(&self, id: RequestId) -> bool {
        self.state.lock().entries.remove(&id).is_some()
    }

    /// Records `failure` and fails every pending request with it.
    ///
    /// Later registrations fail immediately with the same failure.
    pub fn fail_all(&self, failure: &PoolFailure) -> usize {
        let pending: Vec<_> = {
            let mut state = self.state.lock();
            state.failure = Some(failure.clone());
            state.entries.drain().collect()
        };

        let count = pending.len();
        for (_, tx) in pending {
            let _ = tx.send(Err(failure.to_error()));
        }

        if count > 0 {
            debug!(count, %failure, "Failed pending requests");
        }
        count
    }

    /// Fails every pending request with [`Error::ConnectionClosed`].
    pub fn close_all(&self) -> usize {
        let pending: Vec<_> = self.state.lock().entries.drain().collect();
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }
        count
    }

    /// Returns the recorded pool failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<PoolFailure> {
        self.state.lock().failure.clone()
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().entries.len()
    }
}

// ============================================================================
// PendingReply
// ============================================================================

/// Handle for one request awaiting its reply.
///
/// The reply is handed out at most once. Dropping an unconsumed handle
/// removes its correlation entry.
pub struct PendingReply {
    request: Envelope,
    receiver: Option<oneshot::Receiver<Result<Envelope>>>,
    correlator: Arc<Correlator>,
}

impl PendingReply {
    pub(crate) fn new(
        request: Envelope,
        receiver: oneshot::Receiver<Result<Envelope>>,
        correlator: Arc<Correlator>,
    ) -> Self {
        Self {
            request,
            receiver: Some(receiver),
            correlator,
        }
    }

    /// Returns the correlation id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.request.id
    }

    /// Returns the request exactly as transmitted.
    #[inline]
    #[must_use]
    pub fn request(&self) -> &Envelope {
        &self.request
    }

    /// Returns `true` once the outcome has been handed out.
    #[inline]
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.receiver.is_none()
    }

    /// Waits for the reply or a classified failure.
    ///
    /// # Errors
    ///
    /// - [`Error::ReplyConsumed`] if the outcome was already handed out
    /// - [`Error::RequestTimeout`] if `wait` elapses first
    /// - [`Error::HandshakeFailed`] / [`Error::EstablishmentFailed`] if the pool failed
    /// - [`Error::ConnectionClosed`] if the communicator was closed
    pub async fn receive(&mut self, wait: Option<Duration>) -> Result<Envelope> {
        let id = self.request.id;
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(Error::ReplyConsumed { request_id: id });
        };

        let outcome = match wait {
            None => receiver.await.ok(),
            Some(wait) => match timeout(wait, &mut *receiver).await {
                Ok(outcome) => outcome.ok(),
                Err(_) if self.correlator.cancel(id) => {
                    self.receiver = None;
                    return Err(Error::request_timeout(id, wait.as_millis() as u64));
                }
                // Fulfilled between the deadline and the cancel.
                Err(_) => receiver.try_recv().ok(),
            },
        };

        self.receiver = None;
        outcome.unwrap_or(Err(Error::ConnectionClosed))
    }
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply")
            .field("id", &self.request.id)
            .field("consumed", &self.is_consumed())
            .finish_non_exhaustive()
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if self.receiver.is_some() {
            self.correlator.cancel(self.request.id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
