//! Communication stack - Self-healing multi-connection TCP client.
//!
//! This library keeps a fixed-size pool of TCP connections to one peer,
//! negotiates an optional handshake on every connection, and correlates
//! replies with the requests that caused them.
//!
//! # Architecture
//!
//! The communicator follows a supervisor model:
//!
//! - **Connections**: One tokio task per socket, owning reads and writes
//! - **Supervisor**: One task per pool, deciding replacement and recreation
//!
//! Key design principles:
//!
//! - `connect`, `send` and `communicate` never wait for the network
//! - The handshake is always the first frame on a connection
//! - A rejected handshake recreates the whole pool, or fails it when
//!   `raise_on_error` is set
//! - Messages queued on a dying connection move to its replacement
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use communication_stack::{Communicator, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let communicator = Communicator::new(3, "127.0.0.1", 5555, true)?;
//!     communicator.set_handshake(b"handshake".to_vec(), false)?;
//!     communicator.connect()?;
//!
//!     let mut pending = communicator.communicate(b"this is a request".to_vec())?;
//!     let reply = communicator
//!         .communicate_receive_timeout(&mut pending, Duration::from_secs(5))
//!         .await?;
//!     println!("reply: {} bytes", reply.payload().len());
//!
//!     communicator.close();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`communicator`] | Communicator handle and configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Envelope, framing and handshake |
//! | [`transport`] | Connections, pool and correlation |

// ============================================================================
// Modules
// ============================================================================

/// Communicator handle and configuration.
///
/// Use [`Communicator::builder()`] for anything beyond the defaults.
pub mod communicator;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for requests and connections.
pub mod identifiers;

/// Wire protocol: envelope, framing and handshake.
pub mod protocol;

/// TCP transport layer.
///
/// Connection tasks, pool supervision and reply correlation.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Communicator types
pub use communicator::{Communicator, CommunicatorBuilder, CommunicatorOptions};

// Error types
pub use error::{Error, PoolFailure, Result};

// Identifier types
pub use identifiers::{ConnectionId, RequestId};

// Protocol types
pub use protocol::{Envelope, Handshake, HandshakePredicate, HandshakeVerdict};

// Transport types
pub use transport::{ConnectionState, Endpoint, PendingReply, PoolStatus};
