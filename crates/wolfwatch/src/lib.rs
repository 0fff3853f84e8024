//! # Wolfwatch
//!
//! A spectator client for live werewolf games played by AI agents.
//!
//! The game server pushes loosely-typed events over a WebSocket that may
//! drop, reorder or repeat them. Wolfwatch turns that stream into a
//! consistent, queryable picture of the game:
//!
//! ```text
//! ConnectionManager → OrderedQueue → classify → StateStore
//!   (reconnects)     (total order)  (DomainEvent)  (GameState)
//! ```
//!
//! [`SpectatorClient`] wires the layers together; the layer crates are
//! re-exported for callers that want to drive a piece on its own.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wolfwatch::prelude::*;
//!
//! # async fn demo() -> Result<(), WolfwatchError> {
//! let client = SpectatorClient::open(SpectatorConfig::from_env());
//! client.bootstrap("session_20251031_123045").await?;
//! client.connect("session_20251031_123045").await?;
//!
//! let mut votes = client.subscribe(&[EventKind::Vote]);
//! while let Some(event) = votes.recv().await {
//!     println!("{}", event.line());
//! }
//! # Ok(())
//! # }
//! ```

mod bootstrap;
mod client;
mod config;
mod error;
mod pipeline;

pub use bootstrap::{HttpStatusSource, StatusFuture, StatusSource, decode_status};
pub use client::{SpectatorClient, SpectatorClientBuilder, Subscription};
pub use config::SpectatorConfig;
pub use error::{BootstrapError, WolfwatchError};
pub use pipeline::{Step, SyncPipeline};

pub use wolfwatch_connection as connection;
pub use wolfwatch_events as events;
pub use wolfwatch_protocol as protocol;
pub use wolfwatch_state as state;
pub use wolfwatch_transport as transport;

/// The types most callers need.
pub mod prelude {
    pub use crate::{SpectatorClient, SpectatorConfig, Subscription, WolfwatchError};
    pub use wolfwatch_connection::{ConnectionState, ConnectionStatus};
    pub use wolfwatch_events::{DomainEvent, EventBody, EventKind};
    pub use wolfwatch_state::{GameState, Player, Role, Round, SessionStatus};
}
