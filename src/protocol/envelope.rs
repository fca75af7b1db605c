//! Envelope message type.
//!
//! Every frame on the wire carries exactly one envelope. The envelope id
//! correlates a reply with the request it answers.
//!
//! # Format
//!
//! ```json
//! {
//!   "id": "uuid",
//!   "payload": "base64 bytes"
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identifiers::RequestId;

// ============================================================================
// Envelope
// ============================================================================

/// One application or handshake message.
///
/// The payload is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation key.
    pub id: RequestId,

    /// Opaque message bytes, base64 on the wire.
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Creates an envelope with an auto-generated id.
    #[inline]
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: RequestId::generate(),
            payload: payload.into(),
        }
    }

    /// Creates an envelope with a specific id.
    #[inline]
    #[must_use]
    pub fn with_id(id: RequestId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// Creates the reply to `request`, carrying the request's id.
    #[inline]
    #[must_use]
    pub fn reply_to(request: &Envelope, payload: impl Into<Vec<u8>>) -> Self {
        Self::with_id(request.id, payload)
    }

    /// Returns the correlation id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Returns the payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the envelope and returns the payload.
    #[inline]
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Serializes the envelope into a frame body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a frame body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the body is not a valid envelope.
    pub fn decode(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

// ============================================================================
// Payload Encoding
// ============================================================================

mod payload_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(de::Error::custom)
    }
}

// ============================================================================
// Tests
// ============================================================================
