//! Turns wire envelopes into domain events.
//!
//! [`classify`] is total and pure: every envelope yields exactly one
//! event, nothing here reads a clock or does I/O, and the only timestamp
//! used is the one the server put on the envelope.

use chrono::{DateTime, NaiveDateTime};
use wolfwatch_protocol::{
    ActionReport, DebateTurn, Envelope, GameComplete, PhaseChange, RoundComplete, VoteCast,
    WireMessage,
};

use crate::{
    ActionEvent, ActionKind, Display, DomainEvent, EventBody, EventId, Heartbeat, Icon, Severity,
};

/// Classifies one envelope.
///
/// A payload that doesn't match its declared type becomes a
/// [`EventKind::Diagnostic`](crate::EventKind::Diagnostic) event instead of
/// an error.
pub fn classify(envelope: &Envelope, id: EventId) -> DomainEvent {
    let timestamp = envelope.timestamp.as_deref().and_then(parse_timestamp);

    let body = match WireMessage::from_envelope(envelope) {
        Ok(message) => body_for(message, &envelope.data),
        Err(e) => {
            tracing::warn!(wire_type = %envelope.kind, error = %e, "malformed payload");
            EventBody::Diagnostic {
                message: format!("Malformed {} message: {e}", envelope.kind),
            }
        }
    };

    let display = display_for(&body);
    DomainEvent {
        id,
        timestamp,
        body,
        display,
    }
}

/// Builds a client-side diagnostic event (sequence gaps, decode failures).
pub fn diagnostic(id: EventId, message: impl Into<String>) -> DomainEvent {
    build(id, EventBody::Diagnostic {
        message: message.into(),
    })
}

/// Builds a client-side connection notice ("connected", "connection lost").
pub fn connection_notice(id: EventId, message: impl Into<String>) -> DomainEvent {
    build(id, EventBody::ConnectionStatus {
        message: message.into(),
    })
}

/// Wraps a body the client produced itself; it carries no server timestamp.
pub fn build(id: EventId, body: EventBody) -> DomainEvent {
    let display = display_for(&body);
    DomainEvent {
        id,
        timestamp: None,
        body,
        display,
    }
}

/// Accepts RFC 3339 (`…Z`, `…+02:00`) and the server's naive ISO form.
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| raw.parse::<NaiveDateTime>().ok())
}

// ---------------------------------------------------------------------------
// Wire message → body
// ---------------------------------------------------------------------------

fn body_for(message: WireMessage, data: &serde_json::Value) -> EventBody {
    match message {
        WireMessage::ConnectionEstablished(c) => EventBody::ConnectionStatus {
            message: match c.session_id {
                Some(session) => format!("Game session connected: {session}"),
                None => c
                    .message
                    .unwrap_or_else(|| "Game session connected".to_string()),
            },
        },
        WireMessage::PhaseChange(PhaseChange {
            phase,
            round_number,
        }) => EventBody::PhaseChange {
            phase,
            round: round_number,
        },
        WireMessage::DebateTurn(DebateTurn {
            player_name,
            dialogue,
        }) => EventBody::Speech {
            speaker: player_name,
            text: dialogue,
        },
        WireMessage::VoteCast(VoteCast {
            voter,
            target,
            reason,
        }) => EventBody::Vote {
            voter,
            target,
            reason,
        },
        WireMessage::NightAction(report) => EventBody::NightAction(action_event(report)),
        WireMessage::PlayerAction(report) => player_action(report),
        // An update without a state dump carries nothing to apply.
        WireMessage::GameUpdate(update) => match update.game_state {
            Some(state) => EventBody::StateSnapshot(Box::new(state)),
            None => EventBody::Heartbeat {
                beat: Heartbeat::Status,
            },
        },
        WireMessage::RoundComplete(RoundComplete {
            round,
            round_number,
            ..
        }) => EventBody::RoundComplete {
            round: round.as_ref().and_then(|r| r.number).or(round_number),
            summary: round,
        },
        WireMessage::GameComplete(GameComplete {
            winner,
            winner_name,
            final_round,
            players_info,
            game_state,
        }) => EventBody::GameComplete {
            winner: winner
                .or(winner_name)
                .or_else(|| game_state.as_ref().and_then(|s| s.winner.clone())),
            roster: players_info.map(|r| r.into_players()).unwrap_or_default(),
            final_round,
            game_state: game_state.map(Box::new),
        },
        WireMessage::Ping => EventBody::Heartbeat {
            beat: Heartbeat::Ping,
        },
        WireMessage::Pong => EventBody::Heartbeat {
            beat: Heartbeat::Pong,
        },
        WireMessage::StatusUpdate(_) => EventBody::Heartbeat {
            beat: Heartbeat::Status,
        },
        WireMessage::Error(e) => EventBody::Error {
            message: e.message.unwrap_or_else(|| "unknown error".to_string()),
        },
        WireMessage::Unknown { kind } => EventBody::Unclassified {
            wire_type: kind,
            data: data.clone(),
        },
    }
}

/// `player_action` carries the whole sequenced action log, so it is routed
/// by `action_type`: votes and debate turns get their own kinds.
fn player_action(report: ActionReport) -> EventBody {
    let action_type = report.action_type.as_str();
    if action_type.contains("vote_cast") || action_type == "vote" {
        if let (Some(voter), Some(target)) = (&report.player_name, &report.target_name) {
            let reason = report.details.as_ref().and_then(|d| d.reasoning.clone());
            return EventBody::Vote {
                voter: voter.clone(),
                target: target.clone(),
                reason,
            };
        }
    }
    if action_type.contains("debate") {
        if let Some(speaker) = &report.player_name {
            let text = report
                .details
                .as_ref()
                .and_then(|d| d.dialogue.clone().or_else(|| d.action.clone()))
                .unwrap_or_default();
            return EventBody::Speech {
                speaker: speaker.clone(),
                text,
            };
        }
    }
    EventBody::NightAction(action_event(report))
}

fn action_event(report: ActionReport) -> ActionEvent {
    let details = report.details.unwrap_or_default();
    ActionEvent {
        actor: report.player_name,
        actor_role: report.player_role,
        action: ActionKind::from_wire(&report.action_type),
        target: report.target_name,
        result: details.investigation_result,
        reasoning: details.reasoning,
        detail: details.action,
        reason: details.reason,
    }
}

// ---------------------------------------------------------------------------
// Body → display
// ---------------------------------------------------------------------------

fn display(icon: Icon, text: String, severity: Severity) -> Display {
    Display {
        icon,
        text,
        severity,
    }
}

fn display_for(body: &EventBody) -> Display {
    match body {
        EventBody::PhaseChange { phase, round } => {
            let (icon, text) = match phase.as_str() {
                "night" => (Icon::Night, format!("Night falls (round {round})")),
                "day" => (Icon::Day, format!("Day breaks (round {round})")),
                "debate" => (Icon::Debate, format!("Debate begins (round {round})")),
                "voting" => (Icon::Voting, format!("Voting begins (round {round})")),
                "night_kill" => (Icon::NightKill, format!("Night actions begin (round {round})")),
                other => (Icon::Phase, format!("Phase changed to {other} (round {round})")),
            };
            display(icon, text, Severity::Success)
        }
        EventBody::Speech { speaker, text } => {
            display(Icon::Speech, format!("{speaker}: {text}"), Severity::Notice)
        }
        EventBody::Vote { voter, target, .. } => display(
            Icon::Vote,
            format!("{voter} voted for {target}"),
            Severity::Warning,
        ),
        EventBody::NightAction(action) => action_display(action),
        EventBody::RoundComplete { round, .. } => display(
            Icon::RoundComplete,
            format!("Round {} complete", round.unwrap_or(0)),
            Severity::Success,
        ),
        EventBody::GameComplete {
            winner,
            roster,
            final_round,
            game_state,
        } => {
            let mut text = format!("Game over! {}", winner_text(winner.as_deref()));
            let rounds = final_round.as_ref().and_then(|r| r.number).or_else(|| {
                game_state
                    .as_ref()
                    .map(|s| s.rounds.len() as u32)
                    .filter(|n| *n > 0)
            });
            if let Some(rounds) = rounds {
                text.push_str(&format!(" (rounds: {rounds})"));
            }
            let roster = match game_state {
                Some(state) if roster.is_empty() => state.players.clone().into_players(),
                _ => roster.clone(),
            };
            // Only count survivors when every player's fate is stated.
            if !roster.is_empty() && roster.iter().all(|p| p.alive.is_some()) {
                let alive = roster.iter().filter(|p| p.alive == Some(true)).count();
                text.push_str(&format!("\n  Survivors: {alive}/{}", roster.len()));
            }
            display(Icon::GameComplete, text, Severity::Success)
        }
        EventBody::Error { message } => {
            display(Icon::Error, format!("Server error: {message}"), Severity::Error)
        }
        EventBody::Unclassified { wire_type, .. } => display(
            Icon::Unknown,
            format!("Unknown message type: {wire_type}"),
            Severity::Info,
        ),
        EventBody::ConnectionStatus { message } => {
            display(Icon::Connection, message.clone(), Severity::Info)
        }
        EventBody::Heartbeat { beat } => {
            let text = match beat {
                Heartbeat::Ping => "ping",
                Heartbeat::Pong => "pong",
                Heartbeat::Status => "status update",
            };
            display(Icon::Heartbeat, text.to_string(), Severity::Info)
        }
        EventBody::StateSnapshot(_) => {
            display(Icon::Refresh, "Game state updated".to_string(), Severity::Info)
        }
        EventBody::Diagnostic { message } => {
            display(Icon::Warning, message.clone(), Severity::Error)
        }
    }
}

fn winner_text(winner: Option<&str>) -> String {
    match winner {
        Some(w) if w.eq_ignore_ascii_case("werewolves") => "The werewolves win!".to_string(),
        Some(w) if w.eq_ignore_ascii_case("villagers") => "The villagers win!".to_string(),
        Some(w) => format!("{w} wins!"),
        None => "No winner was reported.".to_string(),
    }
}

fn action_display(action: &ActionEvent) -> Display {
    let target = action.target.as_deref().unwrap_or("someone");
    let actor = action.actor.as_deref().unwrap_or("Someone");

    if action.action == ActionKind::Error {
        let mut text = format!("{actor}: {}", action.detail.as_deref().unwrap_or("error"));
        if let Some(reason) = &action.reason {
            text.push_str(&format!("\n  Reason: {reason}"));
        }
        return display(Icon::Error, text, Severity::Error);
    }

    let (icon, mut text) = match &action.action {
        ActionKind::Eliminate => (Icon::Werewolf, format!("The werewolves eliminated {target}")),
        ActionKind::Protect => (Icon::Doctor, format!("The doctor protected {target}")),
        ActionKind::Investigate => {
            let mut text = format!("The seer investigated {target}");
            if let Some(result) = &action.result {
                text.push_str(&format!(" and found a {result}"));
            }
            (Icon::Seer, text)
        }
        ActionKind::HunterShoot => (Icon::Hunter, format!("The hunter shot {target}")),
        ActionKind::GuardProtect => (Icon::Guard, format!("The guard protected {target}")),
        ActionKind::Exile => (Icon::Exile, format!("{target} was exiled")),
        ActionKind::Other(kind) => (Icon::Action, format!("{actor} performed {kind}")),
        ActionKind::Error => (Icon::Error, String::new()),
    };

    if let Some(detail) = &action.detail {
        text.push_str(&format!("\n  Action: {detail}"));
    }
    if let Some(reasoning) = &action.reasoning {
        text.push_str(&format!("\n  Reasoning: {reasoning}"));
    }
    display(icon, text, Severity::Warning)
}
