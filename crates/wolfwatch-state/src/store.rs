//! The canonical state store: folds domain events into a [`GameState`].
//!
//! Every state-affecting event kind has one reducer. Reducers never fail:
//! an event that can't be applied sensibly is reported as
//! [`Outcome::Ignored`] and the state is left untouched. Each sequenced
//! event id is applied at most once per connection.

use std::collections::HashSet;

use wolfwatch_events::{ActionEvent, ActionKind, DomainEvent, EventBody, EventId};
use wolfwatch_protocol::{PlayerDump, RoundDump, StateDump};

use crate::{Faction, GameState, NightAction, Phase, Player, Role, Round, SessionStatus, Speech, Vote};

/// What [`StateStore::apply`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The state changed.
    Applied,
    /// The event id was already applied; nothing changed.
    Duplicate,
    /// Narration only (errors, unknown types); state untouched.
    Narration,
    /// System or inapplicable event; state untouched.
    Ignored(String),
}

/// Owns the [`GameState`] for one session and the ids applied on the
/// current connection.
#[derive(Debug, Default)]
pub struct StateStore {
    state: GameState,
    /// Sequenced, non-system ids seen since the last snapshot on `epoch`.
    applied: HashSet<EventId>,
    epoch: Option<u64>,
}

impl StateStore {
    pub fn new(session_id: Option<String>) -> Self {
        Self {
            state: GameState::new(session_id),
            applied: HashSet::new(),
            epoch: None,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Forgets everything and binds to `session_id`.
    pub fn reset(&mut self, session_id: Option<String>) {
        self.state = GameState::new(session_id);
        self.applied.clear();
        self.epoch = None;
    }

    /// Applies one event.
    ///
    /// Only sequenced domain events are checked for duplicates; ids from an
    /// older connection can never come back, so the set restarts with each
    /// epoch.
    pub fn apply(&mut self, event: &DomainEvent) -> Outcome {
        if event.id.is_sequenced() && !event.is_system() {
            if self.epoch != Some(event.id.epoch()) {
                self.applied.clear();
                self.epoch = Some(event.id.epoch());
            }
            if !self.applied.insert(event.id.clone()) {
                tracing::debug!(id = %event.id, "duplicate event");
                return Outcome::Duplicate;
            }
        }

        let outcome = match &event.body {
            EventBody::PhaseChange { phase, round } => self.on_phase_change(phase, *round),
            EventBody::Speech { speaker, text } => self.on_speech(speaker, text),
            EventBody::Vote {
                voter,
                target,
                reason,
            } => self.on_vote(voter, target, reason.clone()),
            EventBody::NightAction(action) => self.on_action(action),
            EventBody::RoundComplete { round, summary } => {
                self.on_round_complete(*round, summary.as_ref())
            }
            EventBody::GameComplete {
                winner,
                roster,
                final_round,
                game_state,
            } => self.on_game_complete(
                winner.as_deref(),
                roster,
                final_round.as_ref(),
                game_state.as_deref(),
            ),
            EventBody::StateSnapshot(dump) => {
                self.replace(dump);
                Outcome::Applied
            }
            EventBody::Error { .. } | EventBody::Unclassified { .. } => Outcome::Narration,
            EventBody::ConnectionStatus { .. }
            | EventBody::Heartbeat { .. }
            | EventBody::Diagnostic { .. } => Outcome::Ignored("system event".to_string()),
        };

        if outcome == Outcome::Applied {
            if let Some(ts) = event.timestamp {
                self.state.created_at.get_or_insert(ts);
                self.state.updated_at = Some(ts);
            }
        }
        outcome
    }

    // -----------------------------------------------------------------------
    // Reducers
    // -----------------------------------------------------------------------

    fn on_phase_change(&mut self, phase: &str, round: u32) -> Outcome {
        let state = &mut self.state;
        if state.status == SessionStatus::Waiting {
            state.status = SessionStatus::Running;
        }

        // Round 0 means "the server didn't say": re-phase the open round.
        let switching = round != 0
            && state
                .current_round
                .as_ref()
                .is_some_and(|open| open.number != round);
        if switching {
            if let Some(open) = state.current_round.take() {
                state.archive(open);
            }
        }
        if state.current_round.is_none() && round != 0 {
            // Reopen a completed round instead of duplicating it.
            let reopened = state
                .rounds
                .iter()
                .position(|r| r.number == round)
                .map(|i| state.rounds.remove(i));
            state.current_round = Some(reopened.unwrap_or_else(|| Round::new(round)));
        }

        let current = state.ensure_round();
        let ordinal = current.phase.as_ref().map_or(0, |p| p.ordinal + 1);
        let phase = Phase::new(phase, ordinal);
        current.phase = Some(phase.clone());
        state.current_phase = Some(phase);
        state.current_speaker = None;
        Outcome::Applied
    }

    fn on_speech(&mut self, speaker: &str, text: &str) -> Outcome {
        let state = &mut self.state;
        state.player_mut(speaker);
        state.ensure_round().discussion.push(Speech {
            speaker: speaker.to_string(),
            text: text.to_string(),
        });
        state.current_speaker = Some(speaker.to_string());
        Outcome::Applied
    }

    /// Last vote wins: a repeat vote by the same voter replaces the earlier
    /// one in the same round.
    fn on_vote(&mut self, voter: &str, target: &str, reason: Option<String>) -> Outcome {
        let state = &mut self.state;
        state.player_mut(voter);
        state.player_mut(target);

        let round = state.ensure_round();
        round.votes.retain(|v| v.voter != voter);
        round.votes.push(Vote {
            voter: voter.to_string(),
            target: target.to_string(),
            reason,
        });
        Outcome::Applied
    }

    fn on_action(&mut self, action: &ActionEvent) -> Outcome {
        let state = &mut self.state;

        if let Some(actor) = &action.actor {
            let player = state.player_mut(actor);
            if let Some(reasoning) = &action.reasoning {
                player.reasoning = Some(reasoning.clone());
            }
            if let Some(role) = &action.actor_role {
                if !player.role.is_known() {
                    player.role = Role::from_wire(role);
                }
            }
        }
        if let Some(target) = &action.target {
            state.player_mut(target);
            if action.action.is_fatal() {
                state.mark_dead(target);
            }
        }

        let round = state.ensure_round();
        match action.action {
            ActionKind::Eliminate | ActionKind::HunterShoot => {
                round.eliminated = action.target.clone();
            }
            ActionKind::Exile => round.exiled = action.target.clone(),
            ActionKind::Protect | ActionKind::GuardProtect => {
                round.protected = action.target.clone();
            }
            ActionKind::Investigate => round.unmasked = action.target.clone(),
            ActionKind::Error | ActionKind::Other(_) => {}
        }
        round.night_actions.push(NightAction {
            actor: action.actor.clone(),
            action: action.action.clone(),
            target: action.target.clone(),
            result: action.result.clone(),
        });
        Outcome::Applied
    }

    fn on_round_complete(&mut self, number: Option<u32>, summary: Option<&RoundDump>) -> Outcome {
        let state = &mut self.state;

        let open = state.current_round.take();
        let mut round = match (open, number) {
            (Some(open), Some(n)) if open.number != n => {
                // The server closed a different round; file ours and
                // start from whatever history has for that number.
                state.archive(open);
                state
                    .round(n)
                    .cloned()
                    .unwrap_or_else(|| Round::new(n))
            }
            (Some(open), _) => open,
            (None, Some(n)) => state.round(n).cloned().unwrap_or_else(|| Round::new(n)),
            (None, None) => match summary {
                Some(_) => state.ensure_round().clone(),
                None => return Outcome::Ignored("no round to complete".to_string()),
            },
        };

        if let Some(summary) = summary {
            merge_summary(&mut round, summary);
            for name in &summary.players {
                state.player_mut(name);
            }
        }
        for name in [&round.eliminated, &round.exiled].into_iter().flatten() {
            state.mark_dead(name);
        }

        state.archive(round);
        state.current_round = None;
        state.current_speaker = None;
        Outcome::Applied
    }

    /// The server's end-of-game state, when sent, replaces ours; otherwise
    /// the final round summary is folded in like a `round_complete`.
    fn on_game_complete(
        &mut self,
        winner: Option<&str>,
        roster: &[PlayerDump],
        final_round: Option<&RoundDump>,
        game_state: Option<&StateDump>,
    ) -> Outcome {
        match game_state {
            Some(dump) => {
                self.replace(dump);
                // The dump already holds every round it knows about.
                let missing = final_round
                    .filter(|r| r.number.is_some_and(|n| self.state.round(n).is_none()));
                if let Some(summary) = missing {
                    self.on_round_complete(summary.number, Some(summary));
                }
            }
            None => match final_round {
                Some(summary) => {
                    self.on_round_complete(summary.number, Some(summary));
                }
                None => {
                    if let Some(open) = self.state.current_round.take() {
                        self.state.archive(open);
                    }
                }
            },
        }

        let state = &mut self.state;
        for dump in roster {
            let player = state.player_mut(&dump.name);
            reveal(player, dump);
        }

        state.status = SessionStatus::Finished;
        if let Some(winner) = winner {
            state.winner = Some(Faction::from_wire(winner));
        }
        state.current_round = None;
        state.current_speaker = None;
        Outcome::Applied
    }

    /// Replaces roster, rounds, status and winner wholesale.
    fn replace(&mut self, dump: &StateDump) {
        let session_id = dump
            .session_id
            .clone()
            .or_else(|| self.state.session_id.clone());
        let (created_at, updated_at) = (self.state.created_at, self.state.updated_at);
        // Everything before the snapshot is superseded by it.
        self.applied.clear();

        let mut state = GameState::new(session_id);
        state.created_at = created_at;
        state.updated_at = updated_at;
        state.status = dump
            .status
            .as_deref()
            .map(SessionStatus::from_wire)
            .unwrap_or(SessionStatus::Running);
        state.winner = dump.winner.as_deref().map(Faction::from_wire);
        if state.winner.is_some() {
            state.status = SessionStatus::Finished;
        }

        let roster = dump.players.clone().into_players();
        // Players missing an explicit `alive` are judged by the last round's
        // list of living players, when there is one.
        let last_alive: Option<&Vec<String>> = dump
            .rounds
            .iter()
            .rev()
            .map(|r| &r.players)
            .find(|players| !players.is_empty());

        for (index, dump_player) in roster.iter().enumerate() {
            let mut player = Player::new(index as u32 + 1, dump_player.name.clone());
            reveal(&mut player, dump_player);
            if dump_player.alive.is_none() {
                player.alive = last_alive.is_none_or(|alive| alive.contains(&player.name));
            }
            state.players.push(player);
        }

        for (index, dump_round) in dump.rounds.iter().enumerate() {
            let number = dump_round.number.unwrap_or(index as u32 + 1);
            let mut round = Round::new(number);
            merge_summary(&mut round, dump_round);
            for name in [&round.eliminated, &round.exiled].into_iter().flatten() {
                if roster.iter().all(|p| p.name != *name || p.alive.is_none()) {
                    state.mark_dead(name);
                }
            }
            state.archive(round);
        }

        tracing::debug!(
            players = state.players.len(),
            rounds = state.rounds.len(),
            status = %state.status,
            "state replaced from snapshot"
        );
        self.state = state;
    }
}

/// Copies role, model and liveness from a dump onto a player.
fn reveal(player: &mut Player, dump: &PlayerDump) {
    if let Some(role) = &dump.role {
        player.role = Role::from_wire(role);
    }
    if let Some(model) = &dump.model {
        player.model = Some(model.clone());
    }
    if let Some(alive) = dump.alive {
        player.alive = alive;
    }
    if let Some(reasoning) = &dump.reasoning {
        player.reasoning = Some(reasoning.clone());
    }
}

/// Fills in what the server's round summary knows and we don't.
fn merge_summary(round: &mut Round, summary: &RoundDump) {
    if summary.eliminated.is_some() {
        round.eliminated = summary.eliminated.clone();
    }
    if summary.exiled.is_some() {
        round.exiled = summary.exiled.clone();
    }
    if summary.protected.is_some() {
        round.protected = summary.protected.clone();
    }
    if summary.unmasked.is_some() {
        round.unmasked = summary.unmasked.clone();
    }
    if round.discussion.is_empty() {
        round.discussion = summary
            .debate
            .iter()
            .map(|(speaker, text)| Speech {
                speaker: speaker.clone(),
                text: text.clone(),
            })
            .collect();
    }
    if round.votes.is_empty() {
        // Each entry is a voter → target map; later entries win.
        for ballot in &summary.votes {
            for (voter, target) in ballot {
                round.votes.retain(|v| v.voter != *voter);
                round.votes.push(Vote {
                    voter: voter.clone(),
                    target: target.clone(),
                    reason: None,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wolfwatch_events::build;

    fn event(seq: u64, body: EventBody) -> DomainEvent {
        build(EventId::sequenced("s1", 1, seq), body)
    }

    fn vote(voter: &str, target: &str) -> EventBody {
        EventBody::Vote {
            voter: voter.into(),
            target: target.into(),
            reason: None,
        }
    }

    fn phase(name: &str, round: u32) -> EventBody {
        EventBody::PhaseChange {
            phase: name.into(),
            round,
        }
    }

    #[test]
    fn test_apply_duplicate_id_returns_duplicate() {
        let mut store = StateStore::new(Some("s1".into()));
        let first = event(1, vote("Alice", "Bob"));

        assert_eq!(store.apply(&first), Outcome::Applied);
        let before = store.state().clone();
        assert_eq!(store.apply(&first), Outcome::Duplicate);
        assert_eq!(store.state(), &before);
    }

    #[test]
    fn test_vote_last_vote_wins() {
        let mut store = StateStore::default();
        store.apply(&event(1, vote("Alice", "Bob")));
        store.apply(&event(2, vote("Carol", "Bob")));
        store.apply(&event(3, vote("Alice", "Carol")));

        let round = store.state().current_round.as_ref().map(|r| r.votes.clone());
        let votes = round.unwrap_or_default();
        assert_eq!(votes.len(), 2);
        assert_eq!(store.state().vote_tally().get("Bob"), Some(&1));
        assert_eq!(store.state().vote_tally().get("Carol"), Some(&1));
    }

    #[test]
    fn test_phase_change_starts_game_and_tracks_ordinal() {
        let mut store = StateStore::default();
        store.apply(&event(1, phase("night", 1)));
        store.apply(&event(2, phase("debate", 1)));

        let state = store.state();
        assert_eq!(state.status, SessionStatus::Running);
        assert_eq!(state.current_phase.as_ref().map(|p| p.ordinal), Some(1));
        assert_eq!(state.current_round.as_ref().map(|r| r.number), Some(1));
    }

    #[test]
    fn test_phase_change_new_round_archives_open_round() {
        let mut store = StateStore::default();
        store.apply(&event(1, phase("night", 1)));
        store.apply(&event(2, vote("Alice", "Bob")));
        store.apply(&event(3, phase("night", 2)));

        let state = store.state();
        assert_eq!(state.rounds.len(), 1);
        assert_eq!(state.rounds[0].votes.len(), 1);
        assert_eq!(state.current_round.as_ref().map(|r| r.number), Some(2));
    }

    #[test]
    fn test_speech_sets_current_speaker_and_adds_player() {
        let mut store = StateStore::default();
        store.apply(&event(
            1,
            EventBody::Speech {
                speaker: "Alice".into(),
                text: "I trust Bob".into(),
            },
        ));

        let state = store.state();
        assert_eq!(state.current_speaker(), Some("Alice"));
        assert!(state.player("Alice").is_some_and(|p| p.alive));
        let discussion = &state.current_round.as_ref().map(|r| r.discussion.len());
        assert_eq!(*discussion, Some(1));
    }

    #[test]
    fn test_night_eliminate_then_round_complete_archives_round() {
        let mut store = StateStore::default();
        store.apply(&event(1, phase("night", 1)));
        store.apply(&event(
            2,
            EventBody::NightAction(ActionEvent {
                actor: Some("Wolf".into()),
                actor_role: Some("werewolf".into()),
                action: ActionKind::Eliminate,
                target: Some("Bob".into()),
                result: None,
                reasoning: Some("Bob is the seer".into()),
                detail: None,
                reason: None,
            }),
        ));
        store.apply(&event(
            3,
            EventBody::RoundComplete {
                round: Some(1),
                summary: None,
            },
        ));

        let state = store.state();
        assert!(state.current_round.is_none());
        assert_eq!(state.rounds.len(), 1);
        assert_eq!(state.rounds[0].eliminated.as_deref(), Some("Bob"));
        assert!(state.player("Bob").is_some_and(|p| !p.alive));
        assert_eq!(state.player("Wolf").map(|p| p.role.clone()), Some(Role::Werewolf));
    }

    #[test]
    fn test_round_complete_without_open_round_is_ignored() {
        let mut store = StateStore::default();
        let outcome = store.apply(&event(
            1,
            EventBody::RoundComplete {
                round: None,
                summary: None,
            },
        ));
        assert!(matches!(outcome, Outcome::Ignored(_)));
    }

    #[test]
    fn test_system_and_narration_events_leave_state_alone() {
        let mut store = StateStore::default();
        let before = store.state().clone();

        let error = store.apply(&event(
            1,
            EventBody::Error {
                message: "agent crashed".into(),
            },
        ));
        let diag = store.apply(&event(
            2,
            EventBody::Diagnostic {
                message: "gap".into(),
            },
        ));

        assert_eq!(error, Outcome::Narration);
        assert!(matches!(diag, Outcome::Ignored(_)));
        assert_eq!(store.state(), &before);
    }

    #[test]
    fn test_reset_forgets_applied_ids() {
        let mut store = StateStore::new(Some("s1".into()));
        let first = event(1, vote("Alice", "Bob"));
        store.apply(&first);

        store.reset(Some("s2".into()));

        assert_eq!(store.state().session_id.as_deref(), Some("s2"));
        assert!(store.state().players.is_empty());
        assert_eq!(store.apply(&first), Outcome::Applied);
    }

    #[test]
    fn test_apply_only_remembers_sequenced_domain_ids() {
        let mut store = StateStore::new(Some("s1".into()));
        for counter in 1..=50 {
            let beat = build(
                EventId::out_of_band("s1", 1, counter),
                EventBody::Heartbeat {
                    beat: wolfwatch_events::Heartbeat::Ping,
                },
            );
            store.apply(&beat);
        }
        store.apply(&event(1, vote("Alice", "Bob")));

        assert_eq!(store.applied.len(), 1);
    }

    #[test]
    fn test_applied_ids_cleared_by_snapshot_and_new_epoch() {
        let mut store = StateStore::new(Some("s1".into()));
        for seq in 1..=3 {
            store.apply(&event(seq, vote("Alice", "Bob")));
        }
        assert_eq!(store.applied.len(), 3);

        let snapshot = build(
            EventId::sequenced("s1", 1, 4),
            EventBody::StateSnapshot(Box::new(StateDump::default())),
        );
        assert_eq!(store.apply(&snapshot), Outcome::Applied);
        assert!(store.applied.is_empty());

        store.apply(&event(5, vote("Alice", "Bob")));
        store.apply(&build(EventId::sequenced("s1", 2, 1), vote("Carol", "Bob")));
        assert_eq!(store.applied.len(), 1);
    }
}
