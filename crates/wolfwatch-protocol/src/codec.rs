//! Codec trait and implementations for serializing/deserializing envelopes.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The connection layer hands us frames as bytes and doesn't care HOW
//! they are serialized; it only needs something that implements [`Codec`].
//!
//! The game server speaks JSON text frames, so [`JsonCodec`] is the only
//! implementation today.

use serde::{de::DeserializeOwned, Serialize};

use crate::{Envelope, ProtocolError};

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because codecs are stored inside long-lived
/// Tokio tasks (the connection driver and the sync pipeline).
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Decodes a raw frame into an [`Envelope`], rejecting an empty tag.
    ///
    /// # Errors
    /// `Decode` for unparseable frames, `InvalidMessage` for a blank `type`.
    fn decode_envelope(&self, data: &[u8]) -> Result<Envelope, ProtocolError> {
        let envelope: Envelope = self.decode(data)?;
        if envelope.kind.trim().is_empty() {
            return Err(ProtocolError::InvalidMessage("envelope has an empty type tag".into()));
        }
        Ok(envelope)
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ## Example
///
/// ```rust
/// use wolfwatch_protocol::{Codec, Envelope, JsonCodec};
///
/// let codec = JsonCodec;
/// let frame = br#"{"type":"vote_cast","data":{"voter":"Alice","target":"Bob"}}"#;
///
/// let envelope = codec.decode_envelope(frame).unwrap();
/// assert_eq!(envelope.kind, "vote_cast");
///
/// let pong = codec.encode(&Envelope::new("pong", serde_json::Value::Null)).unwrap();
/// assert!(String::from_utf8(pong).unwrap().contains("\"pong\""));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
