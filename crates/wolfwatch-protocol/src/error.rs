//! Error types for the protocol layer.
//!
//! Each crate in Wolfwatch defines its own error enum. When you see a
//! `ProtocolError`, you know the problem is in decoding or encoding a
//! wire record, not in networking or state merging.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The bytes are not a valid envelope at all.
    ///
    /// Common causes: malformed JSON, a missing `type` tag, or a binary
    /// frame that was never JSON to begin with.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The envelope is well-formed but its `data` doesn't match the shape
    /// its `type` tag promises (e.g. a `vote_cast` without a `voter`).
    #[error("malformed `{kind}` payload: {source}")]
    MalformedPayload {
        /// The wire `type` tag of the offending envelope.
        kind: String,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// The message is invalid at the protocol level.
    ///
    /// For logical errors that pass deserialization but violate protocol
    /// rules, such as an empty `type` tag.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
