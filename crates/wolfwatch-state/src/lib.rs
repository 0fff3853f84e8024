//! Canonical game state for Wolfwatch.
//!
//! Domain events go in, one [`GameState`] comes out. The store is a plain
//! synchronous reducer with no I/O; the client decides when to apply,
//! reset or replace.
//!
//! ```text
//!  DomainEvent ──► StateStore::apply ──► Outcome
//!                        │
//!                        ▼
//!                    GameState
//!          players · rounds · current round/phase
//! ```
//!
//! # Key types
//!
//! - [`StateStore`]: owns the state and the set of applied event ids
//! - [`GameState`]: session status, roster, round history, winner
//! - [`Outcome`]: whether an event changed anything

mod model;
mod store;

pub use model::{
    Faction, GameState, NightAction, Phase, PhaseType, Player, Role, Round, SessionStatus, Speech,
    Vote,
};
pub use store::{Outcome, StateStore};
