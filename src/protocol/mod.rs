//! Wire protocol.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | Handshake [`Envelope`] | Local → Remote | First frame on every connection |
//! | Handshake reply | Remote → Local | Same id as the handshake, checked by the predicate |
//! | Request [`Envelope`] | Local → Remote | Application message |
//! | Reply [`Envelope`] | Remote → Local | Same id as the request it answers |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Correlated message type |
//! | `frame` | 4-byte length-delimited framing |
//! | `handshake` | Handshake descriptor and predicate |

// ============================================================================
// Submodules
// ============================================================================

/// Correlated message type.
pub mod envelope;

/// Length-delimited framing.
pub mod frame;

/// Handshake descriptor and predicate.
pub mod handshake;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::Envelope;
pub use frame::{DEFAULT_MAX_FRAME_SIZE, encode_frame, frame_stream, read_frame, write_frame};
pub use handshake::{Handshake, HandshakePredicate, HandshakeVerdict};
