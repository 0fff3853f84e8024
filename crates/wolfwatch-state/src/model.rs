//! The canonical game model: session, players, rounds.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;
use wolfwatch_events::ActionKind;

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Where the watched game is in its life.
///
/// ```text
/// Waiting → Running → Finished
/// ```
///
/// A snapshot may jump straight to any state; incremental events only move
/// forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionStatus {
    #[default]
    Waiting,
    Running,
    Finished,
}

impl SessionStatus {
    /// Maps the server's status strings (`running`, `completed`, `error`,
    /// `stopped`, ...).
    pub fn from_wire(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "running" | "in_progress" | "active" => Self::Running,
            "completed" | "finished" | "error" | "stopped" => Self::Finished,
            _ => Self::Waiting,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "Waiting"),
            Self::Running => write!(f, "Running"),
            Self::Finished => write!(f, "Finished"),
        }
    }
}

// ---------------------------------------------------------------------------
// Roles and factions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum Role {
    Villager,
    Werewolf,
    Seer,
    Doctor,
    Other(String),
    /// Not revealed yet.
    #[default]
    Unknown,
}

impl Role {
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "villager" => Self::Villager,
            "werewolf" => Self::Werewolf,
            "seer" => Self::Seer,
            "doctor" => Self::Doctor,
            "" | "unknown" => Self::Unknown,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Villager => write!(f, "Villager"),
            Self::Werewolf => write!(f, "Werewolf"),
            Self::Seer => write!(f, "Seer"),
            Self::Doctor => write!(f, "Doctor"),
            Self::Other(role) => write!(f, "{role}"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// The side that won.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Faction {
    Villagers,
    Werewolves,
    Other(String),
}

impl Faction {
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "villagers" | "villager" => Self::Villagers,
            "werewolves" | "werewolf" => Self::Werewolves,
            _ => Self::Other(raw.trim().to_string()),
        }
    }
}

impl fmt::Display for Faction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Villagers => write!(f, "Villagers"),
            Self::Werewolves => write!(f, "Werewolves"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// A participant. Players are never removed, only marked not alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Player {
    /// Stable id, assigned in roster order starting at 1.
    pub id: u32,
    pub name: String,
    pub role: Role,
    pub alive: bool,
    /// The agent's model, when the server reports it.
    pub model: Option<String>,
    /// The player's most recent stated reasoning.
    pub reasoning: Option<String>,
}

impl Player {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            role: Role::Unknown,
            alive: true,
            model: None,
            reasoning: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Phases and rounds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PhaseType {
    Day,
    Night,
}

/// One phase within a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phase {
    /// The server's phase name (`night`, `debate`, `voting`, ...).
    pub name: String,
    pub phase_type: PhaseType,
    /// 0 for the first phase of the round, then 1, 2, ...
    pub ordinal: u32,
}

impl Phase {
    pub fn new(name: impl Into<String>, ordinal: u32) -> Self {
        let name = name.into();
        let phase_type = if name.starts_with("night") {
            PhaseType::Night
        } else {
            PhaseType::Day
        };
        Self {
            name,
            phase_type,
            ordinal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Speech {
    pub speaker: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vote {
    pub voter: String,
    pub target: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NightAction {
    pub actor: Option<String>,
    pub action: ActionKind,
    pub target: Option<String>,
    /// Investigation verdict, when there is one.
    pub result: Option<String>,
}

/// One numbered round of play, plus the server's summary of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Round {
    pub number: u32,
    /// The phase currently (or last) in effect. `None` if the round was
    /// opened implicitly by a speech or vote.
    pub phase: Option<Phase>,
    pub discussion: Vec<Speech>,
    pub votes: Vec<Vote>,
    pub night_actions: Vec<NightAction>,
    pub eliminated: Option<String>,
    pub protected: Option<String>,
    pub unmasked: Option<String>,
    pub exiled: Option<String>,
}

impl Round {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            phase: None,
            discussion: Vec::new(),
            votes: Vec::new(),
            night_actions: Vec::new(),
            eliminated: None,
            protected: None,
            unmasked: None,
            exiled: None,
        }
    }

    /// Votes per target, counting each voter once.
    pub fn tally(&self) -> BTreeMap<String, usize> {
        let mut tally = BTreeMap::new();
        for vote in &self.votes {
            *tally.entry(vote.target.clone()).or_insert(0) += 1;
        }
        tally
    }
}

// ---------------------------------------------------------------------------
// GameState
// ---------------------------------------------------------------------------

/// The canonical snapshot of one game session.
///
/// Derived deterministically by folding domain events in order; consumers
/// only ever see it behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GameState {
    pub session_id: Option<String>,
    pub status: SessionStatus,
    pub players: Vec<Player>,
    /// Completed rounds, ordered by number.
    pub rounds: Vec<Round>,
    /// The round in progress, if any.
    pub current_round: Option<Round>,
    pub current_phase: Option<Phase>,
    /// Who spoke last in the current phase.
    pub current_speaker: Option<String>,
    pub winner: Option<Faction>,
    /// Timestamp of the first applied event.
    pub created_at: Option<NaiveDateTime>,
    /// Timestamp of the latest applied event.
    pub updated_at: Option<NaiveDateTime>,
}

impl GameState {
    pub fn new(session_id: Option<String>) -> Self {
        Self {
            session_id,
            ..Self::default()
        }
    }

    pub fn player(&self, name: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.name == name)
    }

    pub fn alive_players(&self) -> Vec<&Player> {
        self.players.iter().filter(|p| p.alive).collect()
    }

    pub fn current_speaker(&self) -> Option<&str> {
        self.current_speaker.as_deref()
    }

    pub fn winner(&self) -> Option<&Faction> {
        self.winner.as_ref()
    }

    pub fn round(&self, number: u32) -> Option<&Round> {
        self.current_round
            .as_ref()
            .filter(|r| r.number == number)
            .or_else(|| self.rounds.iter().find(|r| r.number == number))
    }

    /// Vote counts for the round in progress, or for the last completed
    /// round when none is open.
    pub fn vote_tally(&self) -> BTreeMap<String, usize> {
        self.current_round
            .as_ref()
            .or_else(|| self.rounds.last())
            .map(Round::tally)
            .unwrap_or_default()
    }

    pub(crate) fn player_mut(&mut self, name: &str) -> &mut Player {
        let index = match self.players.iter().position(|p| p.name == name) {
            Some(index) => index,
            None => {
                let id = self.players.len() as u32 + 1;
                self.players.push(Player::new(id, name));
                self.players.len() - 1
            }
        };
        &mut self.players[index]
    }

    pub(crate) fn mark_dead(&mut self, name: &str) {
        self.player_mut(name).alive = false;
    }

    /// Files `round` into history, replacing an entry with the same number.
    pub(crate) fn archive(&mut self, round: Round) {
        match self.rounds.iter_mut().find(|r| r.number == round.number) {
            Some(existing) => *existing = round,
            None => {
                self.rounds.push(round);
                self.rounds.sort_by_key(|r| r.number);
            }
        }
    }

    /// The round in progress, opening the next one if none is.
    pub(crate) fn ensure_round(&mut self) -> &mut Round {
        let next = self.rounds.last().map_or(1, |r| r.number + 1);
        self.current_round.get_or_insert_with(|| Round::new(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_from_wire() {
        assert_eq!(SessionStatus::from_wire("running"), SessionStatus::Running);
        assert_eq!(SessionStatus::from_wire("completed"), SessionStatus::Finished);
        assert_eq!(SessionStatus::from_wire("stopped"), SessionStatus::Finished);
        assert_eq!(SessionStatus::from_wire("queued"), SessionStatus::Waiting);
    }

    #[test]
    fn test_role_from_wire_is_case_insensitive() {
        assert_eq!(Role::from_wire("Werewolf"), Role::Werewolf);
        assert_eq!(Role::from_wire("SEER"), Role::Seer);
        assert_eq!(Role::from_wire(""), Role::Unknown);
        assert_eq!(Role::from_wire("Hunter"), Role::Other("Hunter".into()));
        assert_eq!(Role::from_wire("Hunter").to_string(), "Hunter");
    }

    #[test]
    fn test_phase_type_from_name() {
        assert_eq!(Phase::new("night", 0).phase_type, PhaseType::Night);
        assert_eq!(Phase::new("night_kill", 1).phase_type, PhaseType::Night);
        assert_eq!(Phase::new("debate", 2).phase_type, PhaseType::Day);
    }

    #[test]
    fn test_player_mut_assigns_stable_ids() {
        let mut state = GameState::default();
        state.player_mut("Alice");
        state.player_mut("Bob");
        state.player_mut("Alice");
        assert_eq!(state.players.len(), 2);
        assert_eq!(state.player("Bob").map(|p| p.id), Some(2));
    }

    #[test]
    fn test_archive_replaces_same_number_and_sorts() {
        let mut state = GameState::default();
        state.archive(Round::new(2));
        state.archive(Round::new(1));
        let mut replacement = Round::new(2);
        replacement.eliminated = Some("Bob".into());
        state.archive(replacement);

        let numbers: Vec<_> = state.rounds.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(state.rounds[1].eliminated.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_ensure_round_opens_next_number() {
        let mut state = GameState::default();
        state.archive(Round::new(1));
        assert_eq!(state.ensure_round().number, 2);
    }
}
