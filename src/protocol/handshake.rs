//! Handshake descriptor and reply predicate.
//!
//! The handshake is a fixed envelope sent as the very first frame on every
//! connection. The reply is the inbound envelope carrying the same id; a
//! predicate decides whether the peer accepted the session.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::identifiers::RequestId;

use super::Envelope;

// ============================================================================
// Constants
// ============================================================================

/// Bytes of handshake payload quoted in rejection messages.
const PAYLOAD_PREVIEW_LEN: usize = 32;

// ============================================================================
// Types
// ============================================================================

/// Decides whether a handshake reply means success.
pub type HandshakePredicate = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

/// Outcome of checking a handshake reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeVerdict {
    /// Reply accepted; the connection may carry traffic.
    Accepted,
    /// Reply rejected, with a human-readable reason.
    Rejected(String),
}

// ============================================================================
// Handshake
// ============================================================================

/// Handshake sent before any application traffic.
///
/// Immutable once built. Cloning is cheap and the envelope bytes are the
/// same for every clone, so each (re)connection transmits an identical frame.
#[derive(Clone)]
pub struct Handshake {
    envelope: Envelope,
    expect_failure: bool,
    predicate: HandshakePredicate,
}

impl Handshake {
    /// Creates a handshake with the default predicate.
    ///
    /// The default predicate accepts every reply unless `expect_failure`
    /// is set, in which case it rejects every reply.
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>, expect_failure: bool) -> Self {
        Self {
            envelope: Envelope::new(payload),
            expect_failure,
            predicate: Arc::new(move |_| !expect_failure),
        }
    }

    /// Replaces the predicate.
    #[must_use]
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Returns the envelope transmitted on every connection.
    #[inline]
    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Returns the handshake correlation id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.envelope.id
    }

    /// Returns the handshake payload.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.envelope.payload
    }

    /// Returns whether the descriptor was built for a failing exchange.
    #[inline]
    #[must_use]
    pub fn expect_failure(&self) -> bool {
        self.expect_failure
    }

    /// Returns `true` if `envelope` answers this handshake.
    #[inline]
    #[must_use]
    pub fn is_reply(&self, envelope: &Envelope) -> bool {
        envelope.id == self.envelope.id
    }

    /// Classifies a handshake reply.
    #[must_use]
    pub fn check(&self, reply: &Envelope) -> HandshakeVerdict {
        if (self.predicate)(reply) {
            HandshakeVerdict::Accepted
        } else {
            HandshakeVerdict::Rejected(format!(
                "peer reply to handshake \"{}\" was rejected",
                self.preview()
            ))
        }
    }

    /// Reason used when the reply does not arrive in time.
    #[must_use]
    pub(crate) fn timeout_reason(&self, timeout_ms: u64) -> String {
        format!(
            "no reply to handshake \"{}\" within {timeout_ms}ms",
            self.preview()
        )
    }

    fn preview(&self) -> String {
        let payload = self.payload();
        let end = payload.len().min(PAYLOAD_PREVIEW_LEN);
        let mut text = String::from_utf8_lossy(&payload[..end]).into_owned();
        if payload.len() > end {
            text.push_str("...");
        }
        text
    }
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("id", &self.envelope.id)
            .field("payload_len", &self.envelope.payload.len())
            .field("expect_failure", &self.expect_failure)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_predicate_accepts() {
        let handshake = Handshake::new(b"handshake".to_vec(), false);
        let reply = Envelope::reply_to(handshake.envelope(), b"handshakeReply".to_vec());

        assert!(handshake.is_reply(&reply));
        assert_eq!(handshake.check(&reply), HandshakeVerdict::Accepted);
    }

    #[test]
    fn test_expect_failure_rejects_and_names_handshake() {
        let handshake = Handshake::new(b"anotherHanshake".to_vec(), true);
        let reply = Envelope::reply_to(handshake.envelope(), b"anotherHandshakeR".to_vec());

        match handshake.check(&reply) {
            HandshakeVerdict::Rejected(reason) => {
                assert!(reason.contains("handshake"));
                assert!(reason.contains("anotherHanshake"));
            }
            HandshakeVerdict::Accepted => panic!("reply should be rejected"),
        }
    }

    #[test]
    fn test_custom_predicate_inspects_payload() {
        let handshake =
            Handshake::new(b"hello".to_vec(), true).with_predicate(|reply| reply.payload() == b"ok");

        let good = Envelope::reply_to(handshake.envelope(), b"ok".to_vec());
        let bad = Envelope::reply_to(handshake.envelope(), b"no".to_vec());

        assert_eq!(handshake.check(&good), HandshakeVerdict::Accepted);
        assert!(matches!(handshake.check(&bad), HandshakeVerdict::Rejected(_)));
    }

    #[test]
    fn test_unrelated_envelope_is_not_reply() {
        let handshake = Handshake::new(b"hs".to_vec(), false);
        assert!(!handshake.is_reply(&Envelope::new(b"hs".to_vec())));
    }

    #[test]
    fn test_clones_share_envelope_bytes() {
        let handshake = Handshake::new(b"same".to_vec(), false);
        let clone = handshake.clone();
        assert_eq!(
            handshake.envelope().encode().expect("encode"),
            clone.envelope().encode().expect("encode")
        );
    }

    #[test]
    fn test_long_payload_preview_is_truncated() {
        let handshake = Handshake::new(vec![b'x'; 100], false);
        let reason = handshake.timeout_reason(250);
        assert!(reason.contains("..."));
        assert!(reason.contains("250ms"));
    }
}
