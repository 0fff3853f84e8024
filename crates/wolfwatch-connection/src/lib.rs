//! Connection management for Wolfwatch.
//!
//! This crate keeps one spectator bound to one game session:
//!
//! 1. **Session identity**: validating which game to watch ([`SessionId`])
//! 2. **Link lifecycle**: dialing, tracking, and closing the transport
//!    ([`ConnectionManager`])
//! 3. **Reconnection**: exponential backoff after drops, with a bounded
//!    budget and a terminal [`ConnectionState::Failed`]
//!
//! # How it fits in the stack
//!
//! ```text
//! Sync pipeline (above)  ← consumes ConnectionEvents, sends control frames
//!     ↕
//! Connection layer (this crate)  ← owns the socket, reconnects, reports status
//!     ↕
//! Transport layer (below)  ← Connector / Connection traits
//! ```

mod error;
mod manager;
mod session;

pub use error::ConnectionError;
pub use manager::ConnectionManager;
pub use session::{
    ConnectionConfig, ConnectionEvent, ConnectionState, ConnectionStatus, SessionId,
};
