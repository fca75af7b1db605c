//! Error types for the communication stack.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use communication_stack::{Communicator, Result};
//!
//! async fn example(com: &Communicator) -> Result<()> {
//!     let mut pending = com.communicate(b"ping".to_vec())?;
//!     let reply = com.communicate_receive(&mut pending).await?;
//!     println!("{} bytes", reply.payload().len());
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Pool failure | [`Error::HandshakeFailed`], [`Error::EstablishmentFailed`] |
//! | Connection | [`Error::ConnectionClosed`], [`Error::NotConnected`] |
//! | Protocol | [`Error::Protocol`], [`Error::FrameTooLarge`] |
//! | Requests | [`Error::Timeout`], [`Error::RequestTimeout`], [`Error::ReplyConsumed`], [`Error::TooManyPending`] |
//! | External | [`Error::Io`], [`Error::Json`] |
//!
//! The two pool failures render with a `ConnectionError:` prefix so callers
//! can match on the category and then on the cause.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when communicator configuration is invalid or a setting is
    /// changed after it has been frozen.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Pool Failures
    // ========================================================================
    /// The peer rejected the handshake.
    ///
    /// Delivered to pending callers when the pool raises on errors or has
    /// exhausted its retry budget.
    #[error("ConnectionError: handshake failed: {reason}")]
    HandshakeFailed {
        /// Why the handshake reply was rejected.
        reason: String,
    },

    /// No connection in the pool could be opened.
    #[error("ConnectionError: failed to establish any connection to {endpoint}: {message}")]
    EstablishmentFailed {
        /// Endpoint that was dialed, as `host:port`.
        endpoint: String,
        /// Last socket-level error observed.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection closed before the operation completed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation issued before `connect()` or after `close()`.
    #[error("Communicator is not connected")]
    NotConnected,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or undecodable message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Inbound frame exceeds the configured limit.
    #[error("Frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Announced frame length.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// Operation timeout.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// No reply arrived for a request within the allotted time.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The reply for this request has already been handed out.
    #[error("Reply for request {request_id} was already received")]
    ReplyConsumed {
        /// The request whose reply was consumed.
        request_id: RequestId,
    },

    /// Too many requests are waiting for replies.
    #[error("Too many pending requests: {pending}/{max}")]
    TooManyPending {
        /// Requests currently pending.
        pending: usize,
        /// Configured maximum.
        max: usize,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a handshake failure.
    #[inline]
    pub fn handshake_failed(reason: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            reason: reason.into(),
        }
    }

    /// Creates an establishment failure.
    #[inline]
    pub fn establishment_failed(endpoint: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::EstablishmentFailed {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::RequestTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    ///
    /// Both classified pool failures count as connection errors.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::HandshakeFailed { .. }
                | Self::EstablishmentFailed { .. }
                | Self::ConnectionClosed
                | Self::NotConnected
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RequestTimeout { .. } | Self::TooManyPending { .. }
        )
    }
}

// ============================================================================
// PoolFailure
// ============================================================================

/// Classified failure recorded against a pool.
///
/// Unlike [`enum@Error`] this is `Clone`, so the same failure can be handed
/// to every pending and future caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolFailure {
    /// A connection's handshake reply was rejected.
    Handshake {
        /// Why the reply was rejected.
        reason: String,
    },
    /// No connection could be opened.
    Establishment {
        /// Endpoint that was dialed.
        endpoint: String,
        /// Last socket-level error.
        message: String,
    },
}

impl PoolFailure {
    /// Converts the failure into a caller-facing error.
    #[must_use]
    pub fn to_error(&self) -> Error {
        match self {
            Self::Handshake { reason } => Error::handshake_failed(reason.clone()),
            Self::Establishment { endpoint, message } => {
                Error::establishment_failed(endpoint, message.clone())
            }
        }
    }
}

impl fmt::Display for PoolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_error(), f)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_handshake_failure_names_category_and_cause() {
        let err = Error::handshake_failed("reply rejected by predicate");
        let text = err.to_string();
        assert!(text.contains("ConnectionError"));
        assert!(text.contains("handshake"));
    }

    #[test]
    fn test_establishment_failure_names_category_and_cause() {
        let err = Error::establishment_failed("127.0.0.1:9876", "connection refused");
        let text = err.to_string();
        assert!(text.contains("ConnectionError"));
        assert!(text.contains("failed to establish"));
        assert!(text.contains("127.0.0.1:9876"));
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("pool size must be at least 1");
        assert_eq!(
            err.to_string(),
            "Configuration error: pool size must be at least 1"
        );
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::request_timeout(RequestId::generate(), 100);
        let other_err = Error::ConnectionClosed;

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::handshake_failed("x").is_connection_error());
        assert!(Error::establishment_failed("h:1", "x").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(!Error::config("x").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::timeout("wait", 10).is_recoverable());
        assert!(!Error::handshake_failed("x").is_recoverable());
    }

    #[test]
    fn test_pool_failure_renders_like_error() {
        let failure = PoolFailure::Handshake {
            reason: "rejected".into(),
        };
        assert_eq!(failure.to_string(), failure.to_error().to_string());
        assert!(matches!(failure.to_error(), Error::HandshakeFailed { .. }));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
