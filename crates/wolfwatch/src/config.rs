//! Client configuration.

use std::time::Duration;

use wolfwatch_connection::ConnectionConfig;
use wolfwatch_protocol::QueueConfig;
use wolfwatch_retry::BackoffPolicy;

/// Settings for a [`SpectatorClient`](crate::SpectatorClient).
///
/// Start from [`Default`] (or [`from_env`](Self::from_env)) and adjust with
/// the `with_*` setters:
///
/// ```
/// use std::time::Duration;
/// use wolfwatch::SpectatorConfig;
///
/// let config = SpectatorConfig::default()
///     .with_ws_url("ws://game.example:8000")
///     .with_heartbeat(Some(Duration::from_secs(15)));
/// assert_eq!(config.ws_url, "ws://game.example:8000");
/// ```
#[derive(Debug, Clone)]
pub struct SpectatorConfig {
    /// Push channel base; sessions live at `{ws_url}/ws/{session_id}`.
    pub ws_url: String,
    /// REST base; status lives at `{http_url}/api/v1/games/{session_id}`.
    pub http_url: String,
    pub backoff: BackoffPolicy,
    pub queue: QueueConfig,
    /// Client `ping` interval; `None` disables the heartbeat.
    pub heartbeat: Option<Duration>,
    /// Entries kept in the display log.
    pub log_capacity: usize,
    /// Per-subscriber event buffer. Slow subscribers lose the oldest events.
    pub event_buffer: usize,
}

impl Default for SpectatorConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8000".to_string(),
            http_url: "http://localhost:8000".to_string(),
            backoff: BackoffPolicy::default(),
            queue: QueueConfig::default(),
            heartbeat: Some(Duration::from_secs(30)),
            log_capacity: 1000,
            event_buffer: 256,
        }
    }
}

impl SpectatorConfig {
    /// Defaults overridden by `WOLFWATCH_*` environment variables.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `WOLFWATCH_WS_URL` | `ws_url` |
    /// | `WOLFWATCH_HTTP_URL` | `http_url` |
    /// | `WOLFWATCH_MAX_RETRIES` | `backoff.max_attempts` |
    /// | `WOLFWATCH_RETRY_BASE_MS` | `backoff.base_delay` |
    /// | `WOLFWATCH_GAP_TIMEOUT_MS` | `queue.gap_timeout` |
    /// | `WOLFWATCH_HEARTBEAT_SECS` | `heartbeat` (0 disables) |
    ///
    /// Values that don't parse are logged and skipped.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value.
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("WOLFWATCH_WS_URL") {
            self.ws_url = url;
        }
        if let Some(url) = lookup("WOLFWATCH_HTTP_URL") {
            self.http_url = url;
        }
        if let Some(n) = parse_var::<u32>(&lookup, "WOLFWATCH_MAX_RETRIES") {
            self.backoff = self.backoff.with_max_attempts(n);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "WOLFWATCH_RETRY_BASE_MS") {
            self.backoff = self.backoff.with_base_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "WOLFWATCH_GAP_TIMEOUT_MS") {
            self.queue = self.queue.with_gap_timeout(Duration::from_millis(ms));
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "WOLFWATCH_HEARTBEAT_SECS") {
            self.heartbeat = (secs > 0).then(|| Duration::from_secs(secs));
        }
        self
    }

    #[must_use]
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    #[must_use]
    pub fn with_http_url(mut self, url: impl Into<String>) -> Self {
        self.http_url = url.into();
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Option<Duration>) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    #[must_use]
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_event_buffer(mut self, buffer: usize) -> Self {
        self.event_buffer = buffer.max(1);
        self
    }

    /// The connection-layer slice of this config.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig::default()
            .with_base_url(self.ws_url.clone())
            .with_backoff(self.backoff.clone())
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable config value");
            None
        }
    }
}
