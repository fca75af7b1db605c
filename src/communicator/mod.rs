//! Communicator entry point.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Communicator`] | Self-healing connection pool handle |
//! | [`CommunicatorBuilder`] | Fluent configuration builder |
//! | [`CommunicatorOptions`] | Timeouts, retry bound and limits |
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use communication_stack::{Communicator, CommunicatorOptions, Result};
//!
//! # async fn example() -> Result<()> {
//! let communicator = Communicator::builder()
//!     .pool_size(3)
//!     .endpoint("127.0.0.1", 5555)
//!     .raise_on_error(true)
//!     .options(CommunicatorOptions::new().with_reconnect_delay(Duration::from_millis(100)))
//!     .build()?;
//!
//! communicator.connect()?;
//! communicator.send(b"fire and forget".to_vec())?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for communicator configuration.
pub mod builder;

/// Core communicator implementation.
pub mod core;

/// Timeouts, retry bound and limits.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::CommunicatorBuilder;
pub use core::Communicator;
pub use options::CommunicatorOptions;
