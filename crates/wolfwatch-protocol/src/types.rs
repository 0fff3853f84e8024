//! The envelope: Wolfwatch's top-level wire record.
//!
//! Every frame the server pushes (and every control command the spectator
//! sends back) is an `Envelope`. Envelopes are deliberately untyped: the
//! payload stays an opaque JSON value until the classifier looks at the
//! `type` tag and decodes it into a [`WireMessage`](crate::WireMessage).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The field inside `data` where the game server puts its per-session
/// sequence number.
const DATA_SEQUENCE_FIELD: &str = "sequence_number";

/// A raw wire record: a type tag, an opaque payload, and a send time.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ type: "vote_cast"                    │  ← what kind of record
/// │ timestamp: "2025-10-31T12:30:45"     │  ← when the server sent it
/// │ seq: 7 (optional)                    │  ← per-session ordering
/// │ ┌──────────────────────────────────┐ │
/// │ │ data: { voter, target, ... }     │ │  ← opaque until classified
/// │ └──────────────────────────────────┘ │
/// └──────────────────────────────────────┘
/// ```
///
/// The sequence number may live at the top level (`seq` or
/// `sequence_number`) or, as the game server sends it for action records,
/// inside `data.sequence_number`. [`Envelope::sequence`] checks both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The wire type tag, e.g. `"phase_change"` or `"ping"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// The payload. Missing `data` decodes as `null`.
    #[serde(default)]
    pub data: Value,

    /// The server's send time, as the ISO-8601 string it was sent with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Top-level sequence number, when the server puts it there.
    #[serde(default, alias = "sequence_number", skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl Envelope {
    /// Creates an unsequenced envelope with no timestamp.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: None,
            seq: None,
        }
    }

    /// Sets the top-level sequence number.
    #[must_use]
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Sets the send timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// The per-session sequence number, if this envelope carries one.
    ///
    /// Envelopes without one (pings, connection notices, full-state
    /// snapshots) are out-of-band and bypass the ordered queue.
    pub fn sequence(&self) -> Option<u64> {
        self.seq
            .or_else(|| self.data.get(DATA_SEQUENCE_FIELD).and_then(Value::as_u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_decodes_server_shape() {
        let raw = r#"{
            "type": "phase_change",
            "data": { "phase": "night", "round_number": 1, "sequence_number": 3 },
            "timestamp": "2025-10-31T12:30:45"
        }"#;
        let envelope: Envelope = serde_json::from_str(raw).unwrap();

        assert_eq!(envelope.kind, "phase_change");
        assert_eq!(envelope.timestamp.as_deref(), Some("2025-10-31T12:30:45"));
        assert_eq!(envelope.seq, None);
        assert_eq!(envelope.sequence(), Some(3));
    }

    #[test]
    fn test_sequence_prefers_top_level_field() {
        let envelope =
            Envelope::new("vote_cast", json!({ "sequence_number": 9 })).with_seq(4);
        assert_eq!(envelope.sequence(), Some(4));
    }

    #[test]
    fn test_sequence_accepts_top_level_alias() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"type":"debate_turn","sequence_number":12,"data":{}}"#)
                .unwrap();
        assert_eq!(envelope.sequence(), Some(12));
    }

    #[test]
    fn test_sequence_absent_for_control_messages() {
        let envelope: Envelope = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(envelope.sequence(), None);
    }

    #[test]
    fn test_sequence_ignores_non_integer_values() {
        let envelope = Envelope::new("vote_cast", json!({ "sequence_number": "7" }));
        assert_eq!(envelope.sequence(), None);
    }

    #[test]
    fn test_outbound_envelope_omits_empty_optionals() {
        let json = serde_json::to_value(Envelope::new("pong", Value::Null)).unwrap();
        assert_eq!(json, json!({ "type": "pong", "data": null }));
    }

    #[test]
    fn test_decode_without_type_returns_error() {
        let result: Result<Envelope, _> = serde_json::from_str(r#"{"data": {}}"#);
        assert!(result.is_err());
    }
}
