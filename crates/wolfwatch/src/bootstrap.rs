//! Pull-side state: the REST status document.
//!
//! The push channel only carries what happens after a spectator joins.
//! To show a game already in progress, the client fetches the full status
//! once on join and, while the push channel is down, keeps polling it.

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use wolfwatch_connection::SessionId;
use wolfwatch_protocol::GameStatus;
use wolfwatch_state::SessionStatus;

use crate::BootstrapError;

/// Boxed future returned by [`StatusSource::fetch`].
pub type StatusFuture<'a> = Pin<Box<dyn Future<Output = Result<GameStatus, BootstrapError>> + Send + 'a>>;

/// Somewhere the full game status can be fetched from.
///
/// [`HttpStatusSource`] is the real one; tests plug in fixed documents.
pub trait StatusSource: Send + Sync + 'static {
    fn fetch<'a>(&'a self, session: &'a SessionId) -> StatusFuture<'a>;
}

/// `GET {base_url}/api/v1/games/{session_id}` over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpStatusSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn status_url(&self, session: &SessionId) -> String {
        format!(
            "{}/api/v1/games/{}",
            self.base_url.trim_end_matches('/'),
            session
        )
    }

    async fn get(&self, session: &SessionId) -> Result<GameStatus, BootstrapError> {
        let url = self.status_url(session);
        tracing::debug!(%url, "fetching game status");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BootstrapError::Status {
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await?;
        decode_status(&body)
    }
}

impl StatusSource for HttpStatusSource {
    fn fetch<'a>(&'a self, session: &'a SessionId) -> StatusFuture<'a> {
        Box::pin(self.get(session))
    }
}

/// The server answers either with the bare document or wrapped in
/// `{success, data, error}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum StatusBody {
    Wrapped {
        success: bool,
        #[serde(default)]
        data: Option<GameStatus>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Bare(GameStatus),
}

/// Decodes a status response body, wrapped or bare.
///
/// # Errors
/// [`BootstrapError::Rejected`] for `{success: false}` or a wrapper without
/// data, [`BootstrapError::Malformed`] for anything else that isn't a
/// status document.
pub fn decode_status(body: &[u8]) -> Result<GameStatus, BootstrapError> {
    match serde_json::from_slice::<StatusBody>(body) {
        Ok(StatusBody::Bare(status)) => Ok(status),
        Ok(StatusBody::Wrapped {
            success: true,
            data: Some(status),
            ..
        }) => Ok(status),
        Ok(StatusBody::Wrapped { error, message, .. }) => Err(BootstrapError::Rejected(
            error
                .or(message)
                .unwrap_or_else(|| "no game status in response".to_string()),
        )),
        // Untagged errors say nothing useful; decode as the bare form to
        // report what is actually wrong with the document.
        Err(_) => Err(serde_json::from_slice::<GameStatus>(body)
            .err()
            .map(BootstrapError::Malformed)
            .unwrap_or_else(|| BootstrapError::Rejected("unrecognised status body".to_string()))),
    }
}

/// Whether polling can stop: the game is over.
pub(crate) fn is_finished(status: &GameStatus) -> bool {
    SessionStatus::from_wire(&status.status).is_finished() || status.winner.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_status_bare() {
        let body = br#"{
            "session_id": "s1",
            "status": "running",
            "current_round": 2,
            "players": [{ "name": "Alice", "role": "seer", "alive": true }],
            "rounds": [{ "round_number": 1, "eliminated": "Bob", "players_alive": ["Alice"] }]
        }"#;
        let status = decode_status(body).unwrap();
        assert_eq!(status.session_id, "s1");
        assert_eq!(status.current_round, Some(2));
        assert_eq!(status.rounds[0].eliminated.as_deref(), Some("Bob"));
        assert!(!is_finished(&status));
    }

    #[test]
    fn test_decode_status_wrapped() {
        let body = br#"{ "success": true, "data": { "session_id": "s1", "status": "completed", "winner": "villagers" } }"#;
        let status = decode_status(body).unwrap();
        assert_eq!(status.winner.as_deref(), Some("villagers"));
        assert!(is_finished(&status));
    }

    #[test]
    fn test_decode_status_wrapped_failure_is_rejected() {
        let body = br#"{ "success": false, "error": "Game not found" }"#;
        let err = decode_status(body).unwrap_err();
        assert!(matches!(err, BootstrapError::Rejected(ref m) if m == "Game not found"));
    }

    #[test]
    fn test_decode_status_garbage_is_malformed() {
        let err = decode_status(br#"{ "status": "running" }"#).unwrap_err();
        assert!(matches!(err, BootstrapError::Malformed(_)));
    }

    #[test]
    fn test_status_url_joins_base_and_session() {
        let source = HttpStatusSource::new("http://game.test:8000/");
        let session = SessionId::parse("s1").unwrap();
        assert_eq!(source.status_url(&session), "http://game.test:8000/api/v1/games/s1");
    }
}
