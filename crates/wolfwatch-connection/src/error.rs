//! Error types for the connection layer.

/// Errors returned by [`ConnectionManager`](crate::ConnectionManager)
/// operations.
///
/// Transport failures never show up here directly: the manager retries
/// them and only reports [`RetriesExhausted`](Self::RetriesExhausted) once
/// the budget is spent. `Clone` because every caller waiting on the same
/// dial gets the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The session id is empty, a placeholder, or not URL-safe.
    /// Raised before any network activity.
    #[error("invalid session id {0}")]
    InvalidSession(String),

    /// A dial for a different session is still in flight.
    #[error("already connecting to session {pending}")]
    AlreadyConnecting { pending: String },

    /// `reconnect` was called before any session was bound.
    #[error("no session to reconnect to")]
    NoSession,

    /// Every retry failed.
    #[error("gave up after {attempts} retries: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// `disconnect` or a session switch cancelled the pending connect.
    #[error("connect cancelled")]
    Cancelled,

    /// The manager's driver task has stopped.
    #[error("connection manager is shut down")]
    Shutdown,
}
