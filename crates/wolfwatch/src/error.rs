//! Unified error type for the Wolfwatch client.

use wolfwatch_connection::ConnectionError;
use wolfwatch_protocol::ProtocolError;
use wolfwatch_transport::TransportError;

/// Why the REST status call failed.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// The request never got a response.
    #[error("status request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status code.
    #[error("status request returned {status}")]
    Status { status: u16 },

    /// The body was a `{success: false}` wrapper or had no data.
    #[error("server rejected status request: {0}")]
    Rejected(String),

    /// The body didn't look like a game status document.
    #[error("malformed status document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Top-level error that wraps every crate-specific error.
///
/// The `#[from]` attribute on each variant lets `?` convert layer errors
/// automatically, so callers of [`SpectatorClient`](crate::SpectatorClient)
/// deal with a single type.
#[derive(Debug, thiserror::Error)]
pub enum WolfwatchError {
    /// A transport-level error (dial, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, malformed payload).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A connection-level error (bad session id, retries exhausted).
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The REST bootstrap call failed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    /// The client was closed.
    #[error("client is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let wrapped: WolfwatchError = err.into();
        assert!(matches!(wrapped, WolfwatchError::Transport(_)));
        assert!(wrapped.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let wrapped: WolfwatchError = err.into();
        assert!(matches!(wrapped, WolfwatchError::Protocol(_)));
    }

    #[test]
    fn test_from_connection_error() {
        let err = ConnectionError::InvalidSession("undefined".into());
        let wrapped: WolfwatchError = err.into();
        assert!(matches!(wrapped, WolfwatchError::Connection(_)));
        assert!(wrapped.to_string().contains("undefined"));
    }

    #[test]
    fn test_from_bootstrap_error() {
        let err = BootstrapError::Rejected("Game not found".into());
        let wrapped: WolfwatchError = err.into();
        assert!(matches!(wrapped, WolfwatchError::Bootstrap(_)));
        assert!(wrapped.to_string().contains("Game not found"));
    }
}
