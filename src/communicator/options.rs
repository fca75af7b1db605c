//! Communicator tuning options.
//!
//! Timeouts, retry policy and limits. Pool size, endpoint and
//! `raise_on_error` are set on the builder.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use communication_stack::CommunicatorOptions;
//!
//! let options = CommunicatorOptions::new()
//!     .with_connect_timeout(Duration::from_secs(2))
//!     .with_reconnect_delay(Duration::from_millis(250))
//!     .with_max_retries(10);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::transport::DEFAULT_MAX_PENDING;

// ============================================================================
// Constants
// ============================================================================

/// Default bound on opening one socket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for a handshake reply.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause before a replacement connection dials.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Default wait in `communicate_receive`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// CommunicatorOptions
// ============================================================================

/// Timeouts, retry policy and limits of a communicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunicatorOptions {
    /// Bound on opening one socket.
    pub connect_timeout: Duration,

    /// Wait for the handshake reply before the attempt counts as failed.
    pub handshake_timeout: Duration,

    /// Pause before a replacement connection dials.
    pub reconnect_delay: Duration,

    /// Default wait in `communicate_receive`. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,

    /// Consecutive reconnects (per slot) or pool recreations allowed before
    /// the pool fails. `None` retries forever.
    pub max_retries: Option<u32>,

    /// Maximum requests awaiting replies.
    pub max_pending: usize,

    /// Maximum inbound frame body in bytes.
    pub max_frame_size: usize,
}

impl Default for CommunicatorOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl CommunicatorOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            max_retries: None,
            max_pending: DEFAULT_MAX_PENDING,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl CommunicatorOptions {
    /// Sets the socket open timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the handshake reply timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the pause before reconnecting.
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the default reply wait.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Makes `communicate_receive` wait without a deadline.
    #[inline]
    #[must_use]
    pub fn without_request_timeout(mut self) -> Self {
        self.request_timeout = None;
        self
    }

    /// Bounds consecutive retries.
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Sets the pending request limit.
    #[inline]
    #[must_use]
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = max;
        self
    }

    /// Sets the inbound frame limit.
    #[inline]
    #[must_use]
    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl CommunicatorOptions {
    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be greater than zero".to_string());
        }
        if self.handshake_timeout.is_zero() {
            return Err("Handshake timeout must be greater than zero".to_string());
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err("Request timeout must be greater than zero".to_string());
        }
        if self.max_pending == 0 {
            return Err("Pending request limit must be greater than zero".to_string());
        }
        if self.max_frame_size == 0 {
            return Err("Frame size limit must be greater than zero".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_matches_default() {
        let options = CommunicatorOptions::new();
        assert_eq!(options, CommunicatorOptions::default());
        assert_eq!(options.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(options.request_timeout, Some(DEFAULT_REQUEST_TIMEOUT));
        assert!(options.max_retries.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let options = CommunicatorOptions::new()
            .with_connect_timeout(Duration::from_secs(1))
            .with_handshake_timeout(Duration::from_secs(2))
            .with_reconnect_delay(Duration::from_millis(50))
            .without_request_timeout()
            .with_max_retries(3)
            .with_max_pending(8)
            .with_max_frame_size(4096);

        assert_eq!(options.connect_timeout, Duration::from_secs(1));
        assert_eq!(options.handshake_timeout, Duration::from_secs(2));
        assert_eq!(options.reconnect_delay, Duration::from_millis(50));
        assert!(options.request_timeout.is_none());
        assert_eq!(options.max_retries, Some(3));
        assert_eq!(options.max_pending, 8);
        assert_eq!(options.max_frame_size, 4096);
    }

    #[test]
    fn test_validate_valid() {
        assert!(CommunicatorOptions::new().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_connect_timeout() {
        let options = CommunicatorOptions::new().with_connect_timeout(Duration::ZERO);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_zero_request_timeout() {
        let options = CommunicatorOptions::new().with_request_timeout(Duration::ZERO);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_zero_pending() {
        let options = CommunicatorOptions::new().with_max_pending(0);
        assert!(options.validate().is_err());
    }
}
