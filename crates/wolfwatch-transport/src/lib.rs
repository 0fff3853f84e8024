//! Client-side transport abstraction for Wolfwatch.
//!
//! Provides the [`Connector`] and [`Connection`] traits that abstract over
//! how the spectator reaches the game server. The connection manager is
//! generic over these, so the same reconnect logic runs against a real
//! WebSocket or an in-memory mock.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket client via `tokio-tungstenite`
//! - `mock`: channel-backed [`MockConnector`] for deterministic tests

mod error;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "mock")]
pub use mock::{MockConnection, MockConnector, MockServer};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketConnector};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Close code for an intentional, clean shutdown (RFC 6455 §7.4.1).
///
/// A server closing with this code means "the game is over, don't come
/// back"; any other close, or no close frame at all, is a drop.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Counter for generating unique connection IDs across connectors.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// How the peer ended the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn is_normal(&self) -> bool {
        self.code == NORMAL_CLOSURE
    }
}

/// One thing read off a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A data frame (text frames are delivered as their UTF-8 bytes).
    Data(Vec<u8>),
    /// The peer closed. `None` means the stream ended without a close frame.
    Closed(Option<CloseInfo>),
}

/// Dials outgoing connections.
///
/// The returned futures are `Send` so the connection manager can run them
/// on a spawned task.
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: Connection;

    /// Opens a connection to `url`.
    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// A single connection that can send and receive bytes.
pub trait Connection: Send + Sync + 'static {
    /// Sends data to the server.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next frame from the server.
    ///
    /// Must be cancel-safe: the manager drops this future whenever another
    /// branch of its `select!` wins.
    fn recv(&self) -> impl Future<Output = Result<Inbound, TransportError>> + Send;

    /// Closes the connection with the given close code.
    fn close(
        &self,
        code: u16,
        reason: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
