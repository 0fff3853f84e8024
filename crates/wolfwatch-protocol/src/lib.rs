//! Wire protocol for Wolfwatch.
//!
//! This crate defines the "language" the game server speaks to spectators:
//!
//! - **Envelopes** ([`Envelope`]): the untyped `{type, data, timestamp}`
//!   records that travel on the wire, in both directions.
//! - **Messages** ([`WireMessage`]): the closed catalogue of server
//!   message types, decoded from an envelope's `type` tag.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how envelopes are
//!   converted to/from bytes.
//! - **Ordering** ([`OrderedQueue`]): restores total order over
//!   sequenced envelopes that arrive out of order or twice.
//! - **Errors** ([`ProtocolError`]): what can go wrong while decoding.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Codec (Envelope) → OrderedQueue → Classifier (DomainEvent)
//! ```
//!
//! The protocol layer doesn't know about sockets or game state; it only
//! knows how wire records look and in which order they must be released.

mod codec;
mod error;
mod message;
mod sequencer;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use message::{
    ActionDetails, ActionReport, ConnectionEstablished, DebateTurn, GameComplete,
    GameStatus, GameUpdate, PhaseChange, PlayerDump, RoundComplete, RoundDump,
    Roster, ServerError, StateDump, VoteCast, WireMessage, KNOWN_TYPES,
};
pub use sequencer::{OrderedQueue, QueueConfig, QueueOutput, QueueStats};
pub use types::Envelope;
