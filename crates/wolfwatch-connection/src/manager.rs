//! The connection manager: one driver task that owns the transport.
//!
//! The driver is an actor. It exclusively owns the live connection, the
//! in-flight dial, the backoff counter and the retry timer, and reacts to
//! four things in a single `select!` loop:
//!
//! ```text
//!            ┌────────────── commands (connect, disconnect, send, ...)
//!            │  ┌─────────── dial finished (spawned connector.connect)
//!            │  │  ┌──────── inbound frame / close / error on the link
//!            │  │  │  ┌───── retry timer fired
//!            ▼  ▼  ▼  ▼
//!         ┌──────────────┐   status (watch)    ┌───────────────────┐
//!         │    Driver    │ ──────────────────→ │ ConnectionManager │ (handles)
//!         │              │ ──events (mpsc)──→  │   sync pipeline   │
//!         └──────────────┘                     └───────────────────┘
//! ```
//!
//! Because only the driver touches the socket, "exactly one Connected per
//! establishment" and "exactly one Disconnected per drop" fall out of the
//! control flow instead of needing locks.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use wolfwatch_protocol::{Codec, Envelope, JsonCodec};
use wolfwatch_retry::{Backoff, RetryTimer};
use wolfwatch_transport::{Connection, Connector, Inbound, NORMAL_CLOSURE, TransportError};

use crate::{
    ConnectionConfig, ConnectionError, ConnectionEvent, ConnectionState, ConnectionStatus,
    SessionId,
};

type Reply = oneshot::Sender<Result<(), ConnectionError>>;

/// Commands sent from handles to the driver.
enum Command {
    Connect { session: SessionId, reply: Reply },
    Disconnect { reply: oneshot::Sender<()> },
    Reconnect { reply: Reply },
    Send(Vec<u8>),
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running connection driver.
///
/// Cheap to clone. Every clone talks to the same driver; the driver stops
/// when [`shutdown`](Self::shutdown) is called or every handle is dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    /// Spawns a driver over `connector` and returns a handle plus the
    /// receiver for [`ConnectionEvent`]s.
    pub fn spawn<C: Connector>(
        connector: C,
        config: ConnectionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let shutdown = CancellationToken::new();

        let driver = Driver {
            connector: Arc::new(connector),
            backoff: Backoff::new(config.backoff.clone()),
            timer: RetryTimer::new(shutdown.clone()),
            config,
            session: None,
            link: None,
            dial: None,
            waiters: Vec::new(),
            epoch: 0,
            status: status_tx,
            events: event_tx,
            commands: cmd_rx,
            shutdown: shutdown.clone(),
        };
        tokio::spawn(driver.run());

        let handle = Self {
            commands: cmd_tx,
            status: status_rx,
            shutdown,
        };
        (handle, event_rx)
    }

    /// Binds to `session_id` and waits until the link is open.
    ///
    /// If bound to another session, that link is closed first. If already
    /// connected to `session_id`, returns immediately.
    ///
    /// # Errors
    /// - [`ConnectionError::InvalidSession`]: before any network activity
    /// - [`ConnectionError::AlreadyConnecting`]: a dial to another session
    ///   is in flight
    /// - [`ConnectionError::RetriesExhausted`]: every retry failed
    /// - [`ConnectionError::Cancelled`]: `disconnect` intervened
    pub async fn connect(&self, session_id: &str) -> Result<(), ConnectionError> {
        let session = SessionId::parse(session_id)?;
        let (reply, rx) = oneshot::channel();
        self.command(Command::Connect { session, reply })?;
        rx.await.map_err(|_| ConnectionError::Shutdown)?
    }

    /// Closes the link (code 1000) and stops reconnecting. Idempotent.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.command(Command::Disconnect { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Retries the bound session with a fresh budget, typically after
    /// [`ConnectionState::Failed`].
    ///
    /// # Errors
    /// [`ConnectionError::NoSession`] if nothing was ever bound, otherwise
    /// as for [`connect`](Self::connect).
    pub async fn reconnect(&self) -> Result<(), ConnectionError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Reconnect { reply })?;
        rx.await.map_err(|_| ConnectionError::Shutdown)?
    }

    /// Sends a `{type, data}` control envelope. Best-effort: returns `false`
    /// when not connected.
    pub fn send(&self, kind: &str, data: Value) -> bool {
        match JsonCodec.encode(&Envelope::new(kind, data)) {
            Ok(bytes) => self.send_raw(bytes),
            Err(e) => {
                tracing::warn!(kind, error = %e, "failed to encode outbound envelope");
                false
            }
        }
    }

    /// Sends pre-encoded bytes. Returns `false` when not connected.
    pub fn send_raw(&self, bytes: Vec<u8>) -> bool {
        if !self.status.borrow().connected() {
            return false;
        }
        self.command(Command::Send(bytes)).is_ok()
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Disconnects and stops the driver task.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn command(&self, cmd: Command) -> Result<(), ConnectionError> {
        if self.shutdown.is_cancelled() {
            return Err(ConnectionError::Shutdown);
        }
        self.commands.send(cmd).map_err(|_| ConnectionError::Shutdown)
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// The internal driver state. Runs inside a Tokio task.
struct Driver<C: Connector> {
    connector: Arc<C>,
    config: ConnectionConfig,
    session: Option<SessionId>,
    link: Option<C::Connection>,
    dial: Option<JoinHandle<Result<C::Connection, TransportError>>>,
    backoff: Backoff,
    timer: RetryTimer,
    /// Callers waiting for the current dial to open.
    waiters: Vec<Reply>,
    epoch: u64,
    status: watch::Sender<ConnectionStatus>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
}

impl<C: Connector> Driver<C> {
    /// Runs the actor loop until shutdown or until every handle is gone.
    async fn run(mut self) {
        tracing::debug!("connection driver started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                finished = join_dial(&mut self.dial) => {
                    self.dial = None;
                    self.on_dial_finished(finished).await;
                }
                inbound = recv_link(&self.link) => self.on_inbound(inbound),
                attempt = self.timer.fired() => self.start_dial(attempt),
            }
        }

        self.close_all("client shut down").await;
        tracing::debug!("connection driver stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { session, reply } => self.handle_connect(session, reply).await,
            Command::Disconnect { reply } => {
                self.close_all("client disconnected").await;
                let _ = reply.send(());
            }
            Command::Reconnect { reply } => self.handle_reconnect(reply),
            Command::Send(bytes) => {
                if let Some(link) = &self.link {
                    if let Err(e) = link.send(&bytes).await {
                        // The receive side will notice the broken link.
                        tracing::warn!(error = %e, "send failed");
                    }
                }
            }
        }
    }

    async fn handle_connect(&mut self, session: SessionId, reply: Reply) {
        if self.session.as_ref() == Some(&session) {
            if self.link.is_some() {
                let _ = reply.send(Ok(()));
            } else if self.dial.is_some() || self.timer.is_pending() {
                self.waiters.push(reply);
            } else {
                self.waiters.push(reply);
                self.backoff.reset();
                self.start_dial(0);
            }
            return;
        }

        if self.dial.is_some() {
            let pending = self
                .session
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            let _ = reply.send(Err(ConnectionError::AlreadyConnecting { pending }));
            return;
        }

        if let Some(previous) = &self.session {
            tracing::info!(from = %previous, to = %session, "switching session");
        }
        self.close_all("session switched").await;

        self.session = Some(session);
        self.backoff.reset();
        self.waiters.push(reply);
        self.start_dial(0);
    }

    fn handle_reconnect(&mut self, reply: Reply) {
        if self.session.is_none() {
            let _ = reply.send(Err(ConnectionError::NoSession));
            return;
        }
        if self.link.is_some() {
            let _ = reply.send(Ok(()));
            return;
        }

        self.waiters.push(reply);
        self.backoff.reset();
        self.timer.cancel();
        if self.dial.is_none() {
            self.start_dial(0);
        }
    }

    // -----------------------------------------------------------------------
    // Dialing
    // -----------------------------------------------------------------------

    /// Spawns a dial for the bound session. `attempt` 0 is the first dial.
    fn start_dial(&mut self, attempt: u32) {
        let Some(session) = self.session.clone() else {
            return;
        };
        let url = self.config.url_for(&session);
        tracing::info!(%session, attempt, %url, "dialing");

        let state = if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        };
        self.status.send_modify(|s| {
            s.state = state;
            s.session = Some(session);
            s.attempt = attempt;
        });

        let connector = Arc::clone(&self.connector);
        self.dial = Some(tokio::spawn(async move { connector.connect(&url).await }));
    }

    async fn on_dial_finished(
        &mut self,
        finished: Result<Result<C::Connection, TransportError>, JoinError>,
    ) {
        let Some(session) = self.session.clone() else {
            return;
        };

        let error = match finished {
            Ok(Ok(link)) => {
                self.epoch += 1;
                tracing::info!(%session, epoch = self.epoch, conn = %link.id(), "connected");
                self.link = Some(link);
                self.backoff.reset();
                self.status.send_modify(|s| {
                    s.state = ConnectionState::Connected;
                    s.attempt = 0;
                    s.last_error = None;
                });
                self.emit(ConnectionEvent::Connected {
                    session,
                    epoch: self.epoch,
                });
                self.resolve_waiters(Ok(()));
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("dial task failed: {e}"),
        };

        tracing::warn!(%session, error = %error, "dial failed");
        self.schedule_retry(session, error);
    }

    /// Schedules the next retry, or gives up if the budget is spent.
    fn schedule_retry(&mut self, session: SessionId, error: String) {
        match self.backoff.next_delay() {
            Some(delay) => {
                let attempt = self.backoff.attempts();
                self.status.send_modify(|s| {
                    s.state = ConnectionState::Reconnecting;
                    s.attempt = attempt;
                    s.last_error = Some(error);
                });
                self.timer.schedule(delay, attempt);
            }
            None => {
                let attempts = self.backoff.attempts();
                tracing::warn!(%session, attempts, "retry budget exhausted");
                self.status.send_modify(|s| {
                    s.state = ConnectionState::Failed;
                    s.last_error = Some(error.clone());
                });
                self.emit(ConnectionEvent::Failed {
                    session,
                    reason: error.clone(),
                });
                self.resolve_waiters(Err(ConnectionError::RetriesExhausted {
                    attempts,
                    last_error: error,
                }));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Link traffic
    // -----------------------------------------------------------------------

    fn on_inbound(&mut self, inbound: Result<Inbound, TransportError>) {
        let Some(session) = self.session.clone() else {
            return;
        };

        let reason = match inbound {
            Ok(Inbound::Data(data)) => {
                tracing::debug!(%session, bytes = data.len(), "frame received");
                self.emit(ConnectionEvent::Frame {
                    session,
                    epoch: self.epoch,
                    data,
                });
                return;
            }
            Ok(Inbound::Closed(Some(info))) if info.is_normal() => {
                self.link = None;
                tracing::info!(%session, reason = %info.reason, "server closed the session");
                self.status.send_modify(|s| {
                    s.state = ConnectionState::Idle;
                    s.attempt = 0;
                });
                self.emit(ConnectionEvent::Disconnected {
                    session,
                    reason: format!("closed by server ({NORMAL_CLOSURE})"),
                });
                return;
            }
            Ok(Inbound::Closed(Some(info))) => format!("closed with code {}", info.code),
            Ok(Inbound::Closed(None)) => "connection lost".to_string(),
            Err(e) => e.to_string(),
        };

        self.link = None;
        tracing::warn!(%session, reason = %reason, "link dropped");
        self.emit(ConnectionEvent::Disconnected {
            session: session.clone(),
            reason: reason.clone(),
        });
        self.schedule_retry(session, reason);
    }

    /// Cancels the retry and the dial, closes the link with 1000, and fails
    /// anyone still waiting. Leaves the session bound.
    async fn close_all(&mut self, reason: &str) {
        self.timer.cancel();
        if let Some(dial) = self.dial.take() {
            dial.abort();
        }
        if let Some(link) = self.link.take() {
            if let Err(e) = link.close(NORMAL_CLOSURE, reason).await {
                tracing::debug!(error = %e, "close handshake failed");
            }
            if let Some(session) = self.session.clone() {
                tracing::info!(%session, reason, "disconnected");
                self.emit(ConnectionEvent::Disconnected {
                    session,
                    reason: reason.to_string(),
                });
            }
        }
        self.resolve_waiters(Err(ConnectionError::Cancelled));
        self.backoff.reset();
        self.status.send_modify(|s| {
            s.state = ConnectionState::Idle;
            s.attempt = 0;
        });
    }

    fn resolve_waiters(&mut self, result: Result<(), ConnectionError>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // Nobody listening is fine; the status channel still tells the story.
        let _ = self.events.send(event);
    }
}

async fn join_dial<T>(dial: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match dial {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn recv_link<L: Connection>(link: &Option<L>) -> Result<Inbound, TransportError> {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}
