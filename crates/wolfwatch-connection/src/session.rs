//! Session types: which game the spectator is bound to, and how that
//! binding is doing.
//!
//! A spectator watches exactly one game session at a time. This module
//! holds:
//! - WHO we're watching ([`SessionId`])
//! - WHAT state the link is in ([`ConnectionState`], [`ConnectionStatus`])
//! - WHAT the manager tells the layer above ([`ConnectionEvent`])
//! - HOW it reconnects ([`ConnectionConfig`])

use std::fmt;

use wolfwatch_retry::BackoffPolicy;

use crate::ConnectionError;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// A validated game session identifier.
///
/// Session ids end up in URL paths, so only `[A-Za-z0-9_.-]` is accepted.
/// The literal strings `"undefined"` and `"null"` are rejected too: they
/// are what a caller passes when it forgot to fill the id in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Longest accepted id.
    pub const MAX_LEN: usize = 128;

    /// Validates `raw` as a session id.
    ///
    /// # Errors
    /// Returns [`ConnectionError::InvalidSession`] describing what's wrong.
    pub fn parse(raw: &str) -> Result<Self, ConnectionError> {
        let invalid = |why: &str| ConnectionError::InvalidSession(format!("{raw:?}: {why}"));

        if raw.is_empty() {
            return Err(invalid("empty"));
        }
        if raw == "undefined" || raw == "null" {
            return Err(invalid("placeholder value"));
        }
        if raw.len() > Self::MAX_LEN {
            return Err(invalid("too long"));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(invalid("unsupported characters"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// ConnectionConfig
// ---------------------------------------------------------------------------

/// Where to connect and how hard to try.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket base URL. The session endpoint is `{base_url}/ws/{session}`.
    ///
    /// Default: `ws://localhost:8000`.
    pub base_url: String,

    /// Reconnect backoff. Default: 1 s doubling, 30 s cap, 5 attempts.
    pub backoff: BackoffPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_url: "ws://localhost:8000".to_string(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// The endpoint for `session`.
    pub fn url_for(&self, session: &SessionId) -> String {
        format!("{}/ws/{}", self.base_url.trim_end_matches('/'), session)
    }
}

// ---------------------------------------------------------------------------
// ConnectionState / ConnectionStatus
// ---------------------------------------------------------------------------

/// Lifecycle of the link to the server.
///
/// ```text
///   Idle ──connect──→ Connecting ──open──→ Connected
///    ↑                    │                    │
///    │                  fail                 drop
///    │                    ▼                    ▼
///    └──disconnect── Reconnecting ──open──→ Connected
///                         │
///                    budget spent
///                         ▼
///                       Failed ──reconnect/connect──→ Connecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Observable connection status, published on a watch channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// The session the manager is bound to, if any.
    pub session: Option<SessionId>,
    /// Current retry attempt (0 while connected or on the first dial).
    pub attempt: u32,
    /// Why the last dial or link failed.
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    pub fn connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// `true` while dialing, first time or retry.
    pub fn connecting(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }

    pub fn error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

// ---------------------------------------------------------------------------
// ConnectionEvent
// ---------------------------------------------------------------------------

/// What the connection manager reports upward.
///
/// `epoch` counts successful connections over the manager's lifetime, so a
/// consumer can tell frames of the current link from stragglers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A link was established.
    Connected { session: SessionId, epoch: u64 },
    /// An established link went away.
    Disconnected { session: SessionId, reason: String },
    /// One inbound frame.
    Frame {
        session: SessionId,
        epoch: u64,
        data: Vec<u8>,
    },
    /// The retry budget ran out.
    Failed { session: SessionId, reason: String },
}

impl ConnectionEvent {
    /// The session the event belongs to.
    pub fn session(&self) -> &SessionId {
        match self {
            Self::Connected { session, .. }
            | Self::Disconnected { session, .. }
            | Self::Frame { session, .. }
            | Self::Failed { session, .. } => session,
        }
    }
}
