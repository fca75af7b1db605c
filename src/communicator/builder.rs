//! Builder pattern for communicator configuration.
//!
//! # Example
//!
//! ```no_run
//! use communication_stack::{Communicator, Handshake};
//!
//! # fn example() -> communication_stack::Result<()> {
//! let communicator = Communicator::builder()
//!     .pool_size(3)
//!     .endpoint("127.0.0.1", 5555)
//!     .raise_on_error(true)
//!     .handshake(Handshake::new(b"hello".to_vec(), false))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};
use crate::protocol::Handshake;
use crate::transport::Endpoint;

use super::core::Communicator;
use super::options::CommunicatorOptions;

// ============================================================================
// Constants
// ============================================================================

/// Pool size used when none is set.
pub const DEFAULT_POOL_SIZE: usize = 1;

// ============================================================================
// CommunicatorBuilder
// ============================================================================

/// Builder for configuring a [`Communicator`].
///
/// Use [`Communicator::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct CommunicatorBuilder {
    /// Connections to maintain.
    pool_size: Option<usize>,
    /// Remote host.
    host: Option<String>,
    /// Remote port.
    port: Option<u16>,
    /// Surface pool failures to callers.
    raise_on_error: bool,
    /// Handshake sent on every connection.
    handshake: Option<Handshake>,
    /// Timeouts and limits.
    options: CommunicatorOptions,
}

// ============================================================================
// CommunicatorBuilder Implementation
// ============================================================================

impl CommunicatorBuilder {
    /// Creates a builder with no endpoint.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of connections to maintain.
    #[inline]
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Sets the remote endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    /// Surfaces handshake and establishment failures to callers instead of
    /// retrying silently.
    #[inline]
    #[must_use]
    pub fn raise_on_error(mut self, raise: bool) -> Self {
        self.raise_on_error = raise;
        self
    }

    /// Sets the handshake.
    #[inline]
    #[must_use]
    pub fn handshake(mut self, handshake: Handshake) -> Self {
        self.handshake = Some(handshake);
        self
    }

    /// Sets timeouts, retry policy and limits.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: CommunicatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the communicator with validation.
    ///
    /// No connection is opened until [`Communicator::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the endpoint is missing or any setting
    /// is out of range.
    pub fn build(self) -> Result<Communicator> {
        let pool_size = self.validate_pool_size()?;
        let endpoint = self.validate_endpoint()?;
        self.options.validate().map_err(Error::config)?;

        Ok(Communicator::from_parts(
            pool_size,
            endpoint,
            self.raise_on_error,
            self.handshake,
            self.options,
        ))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl CommunicatorBuilder {
    fn validate_pool_size(&self) -> Result<usize> {
        let size = self.pool_size.unwrap_or(DEFAULT_POOL_SIZE);
        if size == 0 {
            return Err(Error::config("Pool size must be at least 1"));
        }
        Ok(size)
    }

    fn validate_endpoint(&self) -> Result<Endpoint> {
        let (Some(host), Some(port)) = (self.host.as_deref(), self.port) else {
            return Err(Error::config(
                "Endpoint is required. Use .endpoint() to set it.\n\
                 Example: Communicator::builder().endpoint(\"127.0.0.1\", 5555)",
            ));
        };

        if host.trim().is_empty() {
            return Err(Error::config("Endpoint host must not be empty"));
        }
        if port == 0 {
            return Err(Error::config("Endpoint port must not be 0"));
        }

        Ok(Endpoint::new(host, port))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = CommunicatorBuilder::new();
        assert!(builder.pool_size.is_none());
        assert!(builder.host.is_none());
        assert!(!builder.raise_on_error);
        assert!(builder.handshake.is_none());
    }

    #[test]
    fn test_build_fails_without_endpoint() {
        let err = CommunicatorBuilder::new().pool_size(2).build().unwrap_err();
        assert!(err.to_string().contains("Endpoint"));
    }

    #[test]
    fn test_build_fails_with_zero_pool() {
        let err = CommunicatorBuilder::new()
            .pool_size(0)
            .endpoint("127.0.0.1", 5555)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Pool size"));
    }

    #[test]
    fn test_build_fails_with_zero_port() {
        let result = CommunicatorBuilder::new().endpoint("127.0.0.1", 0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_fails_with_blank_host() {
        let result = CommunicatorBuilder::new().endpoint("  ", 5555).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_rejects_invalid_options() {
        let result = CommunicatorBuilder::new()
            .endpoint("127.0.0.1", 5555)
            .options(CommunicatorOptions::new().with_handshake_timeout(Duration::ZERO))
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_defaults_pool_size() {
        let communicator = CommunicatorBuilder::new()
            .endpoint("127.0.0.1", 5555)
            .raise_on_error(true)
            .build()
            .expect("build");
        assert_eq!(communicator.pool_size(), DEFAULT_POOL_SIZE);
        assert!(communicator.raise_on_error());
        assert_eq!(communicator.endpoint().to_string(), "127.0.0.1:5555");
    }
}
