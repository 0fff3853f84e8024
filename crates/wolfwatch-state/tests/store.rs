//! End-to-end reducer tests: wire envelopes through the classifier into the
//! store, the way the client pipeline feeds it.

use serde_json::{Value, json};
use wolfwatch_events::{EventId, classify};
use wolfwatch_protocol::Envelope;
use wolfwatch_state::{Faction, Outcome, Role, SessionStatus, StateStore};

fn feed(store: &mut StateStore, seq: u64, kind: &str, data: Value) -> Outcome {
    let envelope = Envelope::new(kind, data);
    store.apply(&classify(&envelope, EventId::sequenced("s1", 1, seq)))
}

// =========================================================================
// A full round
// =========================================================================

#[test]
fn test_night_round_from_wire() {
    let mut store = StateStore::new(Some("s1".into()));

    feed(&mut store, 1, "phase_change", json!({ "phase": "night", "round_number": 1 }));
    feed(
        &mut store,
        2,
        "night_action",
        json!({
            "action_type": "werewolf_kill",
            "player_name": "Wolf",
            "player_role": "werewolf",
            "target_name": "Bob"
        }),
    );
    feed(
        &mut store,
        3,
        "round_complete",
        json!({ "round": { "round_number": 1, "eliminated": "Bob", "players_alive": ["Alice", "Wolf"] } }),
    );

    let state = store.state();
    assert_eq!(state.status, SessionStatus::Running);
    assert!(state.current_round.is_none());
    assert_eq!(state.rounds.len(), 1);
    assert_eq!(state.rounds[0].number, 1);
    assert!(state.player("Bob").is_some_and(|p| !p.alive));
    assert!(state.player("Alice").is_some_and(|p| p.alive));
}

#[test]
fn test_seer_investigation_records_unmasked() {
    let mut store = StateStore::default();
    feed(
        &mut store,
        1,
        "night_action",
        json!({
            "action_type": "seer_investigate",
            "player_name": "Sage",
            "target_name": "Wolf",
            "details": { "investigation_result": "werewolf" }
        }),
    );

    let round = store.state().current_round.clone().expect("round opened by action");
    assert_eq!(round.unmasked.as_deref(), Some("Wolf"));
    assert_eq!(round.night_actions[0].result.as_deref(), Some("werewolf"));
    assert!(store.state().player("Wolf").is_some_and(|p| p.alive));
}

#[test]
fn test_duplicate_vote_envelope_counts_once() {
    let mut store = StateStore::default();
    let envelope = Envelope::new("vote_cast", json!({ "voter": "Alice", "target": "Bob" }));
    let event = classify(&envelope, EventId::sequenced("s1", 1, 4));

    assert_eq!(store.apply(&event), Outcome::Applied);
    assert_eq!(store.apply(&event), Outcome::Duplicate);
    assert_eq!(store.state().vote_tally().get("Bob"), Some(&1));
}

// =========================================================================
// Game end and snapshots
// =========================================================================

#[test]
fn test_game_complete_reveals_roles_and_winner() {
    let mut store = StateStore::default();
    feed(&mut store, 1, "phase_change", json!({ "phase": "debate", "round_number": 3 }));
    feed(
        &mut store,
        2,
        "game_complete",
        json!({
            "winner": "villagers",
            "players_info": {
                "Alice": { "role": "seer", "alive": true },
                "Wolf": { "role": "werewolf", "alive": false }
            }
        }),
    );

    let state = store.state();
    assert_eq!(state.status, SessionStatus::Finished);
    assert_eq!(state.winner(), Some(&Faction::Villagers));
    assert_eq!(state.player("Alice").map(|p| p.role.clone()), Some(Role::Seer));
    assert!(state.player("Wolf").is_some_and(|p| !p.alive));
    assert!(state.current_round.is_none());
    assert_eq!(state.rounds.last().map(|r| r.number), Some(3));
}

#[test]
fn test_game_complete_with_server_state_replaces_and_finishes() {
    let mut store = StateStore::new(Some("s1".into()));
    feed(&mut store, 1, "phase_change", json!({ "phase": "debate", "round_number": 1 }));

    let outcome = feed(
        &mut store,
        2,
        "game_complete",
        json!({
            "winner": "Villagers",
            "final_round": { "players": ["Alice"], "exiled": "Wes" },
            "game_state": {
                "session_id": "s1",
                "players": {
                    "Alice": { "name": "Alice", "role": "Seer" },
                    "Wes": { "name": "Wes", "role": "Werewolf" }
                },
                "rounds": [
                    { "players": ["Alice", "Wes"], "exiled": "Wes", "votes": [{ "Alice": "Wes" }] }
                ]
            }
        }),
    );

    assert_eq!(outcome, Outcome::Applied);
    let state = store.state();
    assert_eq!(state.status, SessionStatus::Finished);
    assert_eq!(state.winner(), Some(&Faction::Villagers));
    assert_eq!(state.player("Alice").map(|p| p.role.clone()), Some(Role::Seer));
    assert_eq!(state.player("Wes").map(|p| p.role.clone()), Some(Role::Werewolf));
    assert!(state.player("Wes").is_some_and(|p| !p.alive));
    assert!(state.player("Alice").is_some_and(|p| p.alive));
    assert_eq!(state.rounds.len(), 1);
    assert_eq!(state.rounds[0].exiled.as_deref(), Some("Wes"));
    assert!(state.current_round.is_none());
}

#[test]
fn test_game_complete_unnumbered_final_round_closes_open_round() {
    let mut store = StateStore::new(Some("s1".into()));
    feed(&mut store, 1, "phase_change", json!({ "phase": "voting", "round_number": 2 }));

    feed(
        &mut store,
        2,
        "game_complete",
        json!({ "winner": "werewolves", "final_round": { "players": ["Wolf"], "exiled": "Alice" } }),
    );

    let state = store.state();
    assert_eq!(state.status, SessionStatus::Finished);
    assert_eq!(state.winner(), Some(&Faction::Werewolves));
    assert_eq!(state.rounds.len(), 1);
    assert_eq!(state.rounds[0].number, 2);
    assert_eq!(state.rounds[0].exiled.as_deref(), Some("Alice"));
    assert!(state.player("Alice").is_some_and(|p| !p.alive));
}

#[test]
fn test_snapshot_replaces_state_wholesale() {
    let mut store = StateStore::default();
    feed(&mut store, 1, "vote_cast", json!({ "voter": "Ghost", "target": "Nobody" }));

    feed(
        &mut store,
        2,
        "game_update",
        json!({
            "game_state": {
                "session_id": "s1",
                "status": "running",
                "players": [
                    { "name": "Alice", "role": "villager" },
                    { "name": "Bob", "role": "werewolf" },
                    { "name": "Carol" }
                ],
                "rounds": [
                    { "round_number": 1, "eliminated": "Carol", "players_alive": ["Alice", "Bob"] }
                ]
            }
        }),
    );

    let state = store.state();
    assert!(state.player("Ghost").is_none());
    let names: Vec<_> = state.players.iter().map(|p| (p.id, p.name.as_str())).collect();
    assert_eq!(names, vec![(1, "Alice"), (2, "Bob"), (3, "Carol")]);
    assert!(state.player("Carol").is_some_and(|p| !p.alive));
    assert!(state.player("Bob").is_some_and(|p| p.alive));
    assert_eq!(state.rounds.len(), 1);
    assert!(state.current_round.is_none());
}

#[test]
fn test_snapshot_with_winner_is_finished() {
    let mut store = StateStore::default();
    feed(
        &mut store,
        1,
        "game_update",
        json!({ "game_state": { "status": "running", "winner": "werewolves", "players": [] } }),
    );

    assert_eq!(store.state().status, SessionStatus::Finished);
    assert_eq!(store.state().winner(), Some(&Faction::Werewolves));
}
