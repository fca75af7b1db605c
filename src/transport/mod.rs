//! TCP transport layer.
//!
//! This module owns the sockets: one task per pooled connection, a
//! supervisor per pool, and the table that routes replies back to callers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                          ┌─────────────────┐
//! │  Communicator    │                          │  Peer           │
//! │                  │    N × TCP, framed       │                 │
//! │  ConnectionPool  │◄────────────────────────►│  host:port      │
//! │  → Connection ×N │                          │                 │
//! │  → Correlator    │                          │                 │
//! └──────────────────┘                          └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `ConnectionPool::start` - Spawn one task per slot
//! 2. Connection dials, sends the handshake, waits for its reply
//! 3. `Ready` - Queued messages flush, replies reach the `Correlator`
//! 4. On failure the supervisor replaces the slot or recreates the pool
//! 5. `ConnectionPool::shutdown` - Close every socket
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Per-connection task and state machine |
//! | `correlator` | Request/reply correlation table |
//! | `pool` | Fixed-size pool and its supervisor |

// ============================================================================
// Submodules
// ============================================================================

/// Per-connection task and state machine.
pub mod connection;

/// Request/reply correlation.
pub mod correlator;

/// Connection pool supervision.
pub mod pool;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{ConnectionState, Endpoint};
pub use correlator::{Correlator, DEFAULT_MAX_PENDING, PendingReply};
pub use pool::PoolStatus;
