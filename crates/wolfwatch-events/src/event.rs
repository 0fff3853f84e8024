//! The domain event taxonomy.

use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;
use wolfwatch_protocol::{PlayerDump, RoundDump, StateDump};

// ---------------------------------------------------------------------------
// EventId
// ---------------------------------------------------------------------------

/// Stable identity of a domain event.
///
/// Sequenced events are keyed by `session:epoch:seq`, so a replay of the same
/// envelope on the same connection maps to the same id. Out-of-band events
/// get a per-pipeline counter instead.
///
/// Dedup by id only works within one connection. A server that replays
/// already-seen events on a new link without sending a `game_update`
/// snapshot first gets them applied twice, since the new epoch gives them
/// new ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EventId {
    key: String,
    #[serde(skip)]
    epoch: u64,
    #[serde(skip)]
    sequenced: bool,
}

impl EventId {
    pub fn sequenced(session: &str, epoch: u64, seq: u64) -> Self {
        Self {
            key: format!("{session}:{epoch}:{seq}"),
            epoch,
            sequenced: true,
        }
    }

    pub fn out_of_band(session: &str, epoch: u64, counter: u64) -> Self {
        Self {
            key: format!("{session}:{epoch}:oob-{counter}"),
            epoch,
            sequenced: false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// The connection this id was minted on.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether the id carries a server sequence number.
    pub fn is_sequenced(&self) -> bool {
        self.sequenced
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// The closed set of event categories consumers subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PhaseChange,
    Speech,
    Vote,
    NightAction,
    RoundComplete,
    GameComplete,
    Error,
    Unclassified,
    ConnectionStatus,
    Heartbeat,
    StateSnapshot,
    Diagnostic,
}

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        Self::PhaseChange,
        Self::Speech,
        Self::Vote,
        Self::NightAction,
        Self::RoundComplete,
        Self::GameComplete,
        Self::Error,
        Self::Unclassified,
        Self::ConnectionStatus,
        Self::Heartbeat,
        Self::StateSnapshot,
        Self::Diagnostic,
    ];

    /// System events are plumbing: they never appear in the narrated log.
    pub fn is_system(self) -> bool {
        matches!(
            self,
            Self::ConnectionStatus | Self::Heartbeat | Self::StateSnapshot | Self::Diagnostic
        )
    }
}

// ---------------------------------------------------------------------------
// EventBody
// ---------------------------------------------------------------------------

/// What a night (or any role) action did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Eliminate,
    Protect,
    Investigate,
    HunterShoot,
    GuardProtect,
    Exile,
    /// The server reported an agent error as an action.
    Error,
    Other(String),
}

impl ActionKind {
    /// Maps the server's free-form `action_type` onto a kind.
    pub fn from_wire(action_type: &str) -> Self {
        match action_type {
            "werewolf_kill" | "eliminate" | "night_eliminate" => Self::Eliminate,
            "doctor_protect" | "protect" | "night_protect" => Self::Protect,
            "seer_investigate" | "investigate" | "night_investigate" => Self::Investigate,
            "hunter_shoot" => Self::HunterShoot,
            "guard_protect" => Self::GuardProtect,
            "exile" | "day_exile" => Self::Exile,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether the target leaves the game.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Eliminate | Self::HunterShoot | Self::Exile)
    }
}

/// A role action, as reported by `night_action` or `player_action`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionEvent {
    pub actor: Option<String>,
    pub actor_role: Option<String>,
    pub action: ActionKind,
    pub target: Option<String>,
    /// Investigation verdict, when there is one.
    pub result: Option<String>,
    /// The actor's stated reasoning.
    pub reasoning: Option<String>,
    /// What the actor said it did, or the error it hit.
    pub detail: Option<String>,
    /// Error cause, for [`ActionKind::Error`].
    pub reason: Option<String>,
}

/// Which control message a heartbeat event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Heartbeat {
    Ping,
    Pong,
    Status,
}

/// The typed payload of a domain event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventBody {
    PhaseChange {
        phase: String,
        round: u32,
    },
    Speech {
        speaker: String,
        text: String,
    },
    Vote {
        voter: String,
        target: String,
        reason: Option<String>,
    },
    NightAction(ActionEvent),
    RoundComplete {
        round: Option<u32>,
        summary: Option<RoundDump>,
    },
    GameComplete {
        winner: Option<String>,
        /// Roles revealed alongside the result (`players_info`).
        roster: Vec<PlayerDump>,
        /// Summary of the last round, numbered or not.
        final_round: Option<RoundDump>,
        /// The server's full end-of-game state, when it sends one.
        game_state: Option<Box<StateDump>>,
    },
    Error {
        message: String,
    },
    Unclassified {
        wire_type: String,
        data: Value,
    },
    ConnectionStatus {
        message: String,
    },
    Heartbeat {
        beat: Heartbeat,
    },
    StateSnapshot(Box<StateDump>),
    Diagnostic {
        message: String,
    },
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PhaseChange { .. } => EventKind::PhaseChange,
            Self::Speech { .. } => EventKind::Speech,
            Self::Vote { .. } => EventKind::Vote,
            Self::NightAction(_) => EventKind::NightAction,
            Self::RoundComplete { .. } => EventKind::RoundComplete,
            Self::GameComplete { .. } => EventKind::GameComplete,
            Self::Error { .. } => EventKind::Error,
            Self::Unclassified { .. } => EventKind::Unclassified,
            Self::ConnectionStatus { .. } => EventKind::ConnectionStatus,
            Self::Heartbeat { .. } => EventKind::Heartbeat,
            Self::StateSnapshot(_) => EventKind::StateSnapshot,
            Self::Diagnostic { .. } => EventKind::Diagnostic,
        }
    }
}

// ---------------------------------------------------------------------------
// Display metadata
// ---------------------------------------------------------------------------

/// Presentation glyphs, each with a stable class name for renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Icon {
    Night,
    Day,
    Debate,
    Voting,
    NightKill,
    Phase,
    Speech,
    Vote,
    Werewolf,
    Doctor,
    Seer,
    Hunter,
    Guard,
    Exile,
    Action,
    RoundComplete,
    GameComplete,
    Error,
    Connection,
    Heartbeat,
    Refresh,
    Warning,
    Unknown,
}

impl Icon {
    pub fn class_name(self) -> &'static str {
        match self {
            Self::Night => "night",
            Self::Day => "day",
            Self::Debate => "debate",
            Self::Voting => "voting",
            Self::NightKill => "night-kill",
            Self::Phase => "phase",
            Self::Speech => "speech",
            Self::Vote => "vote",
            Self::Werewolf => "werewolf",
            Self::Doctor => "doctor",
            Self::Seer => "seer",
            Self::Hunter => "hunter",
            Self::Guard => "guard",
            Self::Exile => "exile",
            Self::Action => "action",
            Self::RoundComplete => "round-complete",
            Self::GameComplete => "game-complete",
            Self::Error => "error",
            Self::Connection => "connection",
            Self::Heartbeat => "heartbeat",
            Self::Refresh => "refresh",
            Self::Warning => "warning",
            Self::Unknown => "unknown",
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            Self::Night => "🌙",
            Self::Day => "☀️",
            Self::Debate | Self::Speech => "💬",
            Self::Voting | Self::Vote => "🗳️",
            Self::NightKill => "🌃",
            Self::Phase => "📢",
            Self::Werewolf => "🐺",
            Self::Doctor => "👨‍⚕️",
            Self::Seer => "🔮",
            Self::Hunter => "🏹",
            Self::Guard => "🛡️",
            Self::Exile => "🚪",
            Self::Action => "⚡",
            Self::RoundComplete => "✅",
            Self::GameComplete => "🎊",
            Self::Error => "❌",
            Self::Connection => "🔗",
            Self::Heartbeat => "💓",
            Self::Refresh => "🔄",
            Self::Warning => "⚠️",
            Self::Unknown => "❓",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Notice,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn color_class(self) -> &'static str {
        match self {
            Self::Info => "text-blue-500",
            Self::Notice => "text-purple-500",
            Self::Success => "text-green-500",
            Self::Warning => "text-orange-500",
            Self::Error => "text-red-600",
        }
    }
}

/// How an event should be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Display {
    pub icon: Icon,
    pub text: String,
    pub severity: Severity,
}

// ---------------------------------------------------------------------------
// DomainEvent
// ---------------------------------------------------------------------------

/// A classified, display-ready event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainEvent {
    pub id: EventId,
    /// The server's send time, when the envelope had a parseable one.
    pub timestamp: Option<NaiveDateTime>,
    pub body: EventBody,
    pub display: Display,
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }

    pub fn is_system(&self) -> bool {
        self.kind().is_system()
    }

    /// `"🗳️ Alice voted for Bob"`.
    pub fn line(&self) -> String {
        format!("{} {}", self.display.icon.glyph(), self.display.text)
    }
}
