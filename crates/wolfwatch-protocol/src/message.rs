//! The server message catalogue.
//!
//! An [`Envelope`] only knows its `type` tag; this module turns the tag plus
//! the opaque `data` into a closed [`WireMessage`] enum. Decoding is a
//! two-step affair on purpose: first the envelope (which always succeeds for
//! well-formed JSON), then the payload for the specific tag. That way an
//! unknown tag becomes [`WireMessage::Unknown`] instead of a decode error,
//! and a malformed payload is reported with the tag it claimed to be.
//!
//! Payload field names follow what the game server actually sends
//! (`player_name`, `round_number`, `target_name`, ...).

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Envelope, ProtocolError};

/// Every wire `type` tag the classifier recognizes.
pub const KNOWN_TYPES: &[&str] = &[
    "connection_established",
    "phase_change",
    "debate_turn",
    "vote_cast",
    "night_action",
    "player_action",
    "game_update",
    "round_complete",
    "game_complete",
    "ping",
    "pong",
    "status_update",
    "error",
];

// ---------------------------------------------------------------------------
// WireMessage
// ---------------------------------------------------------------------------

/// A decoded server message, keyed by the envelope's `type` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// `connection_established`: the server accepted the socket.
    ConnectionEstablished(ConnectionEstablished),
    /// `phase_change`: night/day/debate/voting transitions.
    PhaseChange(PhaseChange),
    /// `debate_turn`: one player's speech.
    DebateTurn(DebateTurn),
    /// `vote_cast`: one player's vote.
    VoteCast(VoteCast),
    /// `night_action`: a role acting at night.
    NightAction(ActionReport),
    /// `player_action`: the sequenced action log, any phase.
    PlayerAction(ActionReport),
    /// `game_update`: a full-state snapshot.
    GameUpdate(GameUpdate),
    /// `round_complete`: the round closed.
    RoundComplete(RoundComplete),
    /// `game_complete`: a faction won.
    GameComplete(GameComplete),
    /// `ping`: the server wants a `pong`.
    Ping,
    /// `pong`: reply to our heartbeat.
    Pong,
    /// `status_update`: opaque server status blob.
    StatusUpdate(Value),
    /// `error`: the server reported a problem.
    Error(ServerError),
    /// Any tag not in [`KNOWN_TYPES`].
    Unknown {
        /// The unrecognized tag.
        kind: String,
    },
}

impl WireMessage {
    /// Decodes the payload of `envelope` according to its `type` tag.
    ///
    /// # Errors
    /// Returns [`ProtocolError::MalformedPayload`] when the tag is known but
    /// `data` doesn't have the promised shape. Unknown tags are not errors.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let message = match envelope.kind.as_str() {
            "connection_established" => Self::ConnectionEstablished(payload(envelope)?),
            "phase_change" => Self::PhaseChange(payload(envelope)?),
            "debate_turn" => Self::DebateTurn(payload(envelope)?),
            "vote_cast" => Self::VoteCast(payload(envelope)?),
            "night_action" => Self::NightAction(payload(envelope)?),
            "player_action" => Self::PlayerAction(payload(envelope)?),
            "game_update" => Self::GameUpdate(payload(envelope)?),
            "round_complete" => Self::RoundComplete(payload(envelope)?),
            "game_complete" => Self::GameComplete(payload(envelope)?),
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "status_update" => Self::StatusUpdate(envelope.data.clone()),
            "error" => Self::Error(payload(envelope)?),
            other => Self::Unknown {
                kind: other.to_string(),
            },
        };
        Ok(message)
    }
}

/// Deserializes `envelope.data` into `T`, treating a missing payload as `{}`
/// so payloads made entirely of optional fields still decode.
fn payload<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, ProtocolError> {
    let result = if envelope.data.is_null() {
        T::deserialize(&Value::Object(serde_json::Map::new()))
    } else {
        T::deserialize(&envelope.data)
    };
    result.map_err(|source| ProtocolError::MalformedPayload {
        kind: envelope.kind.clone(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload of `connection_established`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEstablished {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Payload of `phase_change`.
///
/// `phase` is one of `night`, `day`, `debate`, `voting`, `night_kill`, but
/// the server may invent new ones, so it stays a string here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub phase: String,
    #[serde(default)]
    pub round_number: u32,
}

/// Payload of `debate_turn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateTurn {
    pub player_name: String,
    pub dialogue: String,
}

/// Payload of `vote_cast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteCast {
    pub voter: String,
    pub target: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Payload shared by `night_action` and `player_action`.
///
/// `action_type` is free-form on the wire (`werewolf_kill`, `eliminate`,
/// `night_protect`, `day_vote_cast`, `day_exile`, ...); the classifier
/// normalizes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReport {
    pub action_type: String,
    #[serde(default)]
    pub player_name: Option<String>,
    #[serde(default)]
    pub player_role: Option<String>,
    #[serde(default)]
    pub target_name: Option<String>,
    #[serde(default)]
    pub details: Option<ActionDetails>,
}

/// The free-form `details` object attached to actions.
///
/// Unknown keys are ignored; everything here is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionDetails {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub investigation_result: Option<String>,
    #[serde(default)]
    pub dialogue: Option<String>,
}

/// Payload of `game_update`: the server's full state dump.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameUpdate {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub game_state: Option<StateDump>,
}

/// Payload of `round_complete`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundComplete {
    #[serde(default)]
    pub round: Option<RoundDump>,
    #[serde(default)]
    pub round_number: Option<u32>,
    #[serde(default)]
    pub next_phase: Option<Value>,
}

/// Payload of `game_complete`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameComplete {
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub winner_name: Option<String>,
    #[serde(default)]
    pub final_round: Option<RoundDump>,
    #[serde(default)]
    pub players_info: Option<Roster>,
    #[serde(default)]
    pub game_state: Option<StateDump>,
}

/// Payload of `error`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// State dumps (shared by push snapshots and the REST bootstrap)
// ---------------------------------------------------------------------------

/// A full game-state dump as the server serializes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDump {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub players: Roster,
    #[serde(default)]
    pub rounds: Vec<RoundDump>,
    #[serde(default)]
    pub current_round: Option<u32>,
    #[serde(default)]
    pub winner: Option<String>,
}

/// The player roster, which the server sends either as a list or as a map
/// keyed by player name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Roster {
    List(Vec<PlayerDump>),
    Map(BTreeMap<String, PlayerDump>),
}

impl Default for Roster {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl Roster {
    /// Flattens the roster into a list, filling blank names from map keys.
    pub fn into_players(self) -> Vec<PlayerDump> {
        match self {
            Self::List(players) => players,
            Self::Map(players) => players
                .into_iter()
                .map(|(name, mut player)| {
                    if player.name.is_empty() {
                        player.name = name;
                    }
                    player
                })
                .collect(),
        }
    }
}

/// One player in a state dump.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerDump {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Absent in the server's internal dump; liveness then has to be
    /// inferred from the last round's `players` list.
    #[serde(default)]
    pub alive: Option<bool>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// One round in a state dump or a `round_complete` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundDump {
    #[serde(default, alias = "round_number")]
    pub number: Option<u32>,
    /// Players alive during this round.
    #[serde(default, alias = "players_alive")]
    pub players: Vec<String>,
    #[serde(default)]
    pub eliminated: Option<String>,
    #[serde(default)]
    pub unmasked: Option<String>,
    #[serde(default)]
    pub protected: Option<String>,
    #[serde(default)]
    pub exiled: Option<String>,
    /// `[speaker, dialogue]` pairs.
    #[serde(default)]
    pub debate: Vec<(String, String)>,
    /// Each entry maps voter name to target name.
    #[serde(default)]
    pub votes: Vec<BTreeMap<String, String>>,
}

/// The REST status document (`GET /api/v1/games/{session_id}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStatus {
    pub session_id: String,
    pub status: String,
    #[serde(default)]
    pub current_round: Option<u32>,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub players: Vec<PlayerDump>,
    #[serde(default)]
    pub rounds: Vec<RoundDump>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl From<GameStatus> for StateDump {
    fn from(status: GameStatus) -> Self {
        Self {
            session_id: Some(status.session_id),
            status: Some(status.status),
            players: Roster::List(status.players),
            rounds: status.rounds,
            current_round: status.current_round,
            winner: status.winner,
        }
    }
}
