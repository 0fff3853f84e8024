//! `SpectatorClient`: the consumer-facing handle.
//!
//! One client watches one session at a time. Opening it spawns two tasks:
//!
//! ```text
//!   ConnectionManager driver ──ConnectionEvent──► pipeline task
//!        (owns the socket)                          │  SyncPipeline (queue, store, log)
//!                                                   ├──► broadcast<DomainEvent> ──► Subscription(s)
//!                                                   └──► watch<Arc<GameState>>  ──► snapshot()
//! ```
//!
//! The pipeline task also wakes for gap deadlines and the client heartbeat.
//! REST bootstrap and polling feed the same pipeline, so every state change
//! goes through one merge path.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use wolfwatch_connection::{
    ConnectionError, ConnectionEvent, ConnectionManager, ConnectionStatus, SessionId,
};
use wolfwatch_events::{DomainEvent, EventKind};
use wolfwatch_state::GameState;
use wolfwatch_transport::{Connector, WebSocketConnector};

use crate::bootstrap::{HttpStatusSource, StatusSource, is_finished};
use crate::pipeline::{Step, SyncPipeline};
use crate::{SpectatorConfig, WolfwatchError};

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A live feed of domain events, optionally limited to some kinds.
///
/// Dropping the subscription unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<DomainEvent>,
    kinds: Option<HashSet<EventKind>>,
}

impl Subscription {
    /// The next matching event, or `None` once the client is closed.
    ///
    /// A subscriber that falls more than the configured buffer behind loses
    /// the oldest events; that is logged and the feed continues.
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The next matching event if one is already waiting.
    pub fn try_recv(&mut self) -> Option<DomainEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }

    pub fn accepts(&self, event: &DomainEvent) -> bool {
        self.kinds
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&event.kind()))
    }
}

// ---------------------------------------------------------------------------
// Shared pipeline
// ---------------------------------------------------------------------------

/// The pipeline plus its two outputs. Every step runs under the lock, so
/// events are published in merge order no matter which task produced them.
struct Shared {
    pipeline: Mutex<SyncPipeline>,
    events: broadcast::Sender<DomainEvent>,
    state: watch::Sender<Arc<GameState>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SyncPipeline> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` against the pipeline and publishes what it produced.
    /// Returns the control replies to send.
    fn step(&self, f: impl FnOnce(&mut SyncPipeline) -> Step) -> Vec<wolfwatch_protocol::Envelope> {
        let mut pipeline = self.lock();
        let step = f(&mut pipeline);
        if step.state_changed {
            self.state.send_replace(Arc::new(pipeline.state().clone()));
        }
        for event in step.events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        step.replies
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`SpectatorClient`].
///
/// ```rust,no_run
/// # async fn demo() -> Result<(), wolfwatch::WolfwatchError> {
/// use wolfwatch::{SpectatorClient, SpectatorConfig};
///
/// let client = SpectatorClient::builder()
///     .config(SpectatorConfig::from_env())
///     .open();
/// client.connect("session_20251031_123045").await?;
/// # Ok(())
/// # }
/// ```
pub struct SpectatorClientBuilder {
    config: SpectatorConfig,
    source: Option<Arc<dyn StatusSource>>,
}

impl SpectatorClientBuilder {
    pub fn new() -> Self {
        Self {
            config: SpectatorConfig::default(),
            source: None,
        }
    }

    pub fn config(mut self, config: SpectatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the REST status source (default: [`HttpStatusSource`] on
    /// `config.http_url`).
    pub fn status_source(mut self, source: impl StatusSource) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Opens a client over WebSocket. Must be called inside a Tokio runtime.
    pub fn open(self) -> SpectatorClient {
        self.open_with(WebSocketConnector)
    }

    /// Opens a client over any [`Connector`].
    pub fn open_with<C: Connector>(self, connector: C) -> SpectatorClient {
        let source: Arc<dyn StatusSource> = match self.source {
            Some(source) => source,
            None => Arc::new(HttpStatusSource::new(self.config.http_url.clone())),
        };
        SpectatorClient::spawn(connector, source, self.config)
    }
}

impl Default for SpectatorClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A spectator bound to at most one game session.
///
/// Dropping the client (or calling [`close`](Self::close)) stops every
/// task and releases the transport.
pub struct SpectatorClient {
    manager: ConnectionManager,
    shared: Arc<Shared>,
    source: Arc<dyn StatusSource>,
    cancel: CancellationToken,
    poller: Mutex<Option<CancellationToken>>,
}

impl SpectatorClient {
    pub fn builder() -> SpectatorClientBuilder {
        SpectatorClientBuilder::new()
    }

    /// Opens a WebSocket client with `config` and the HTTP status source.
    pub fn open(config: SpectatorConfig) -> Self {
        Self::builder().config(config).open()
    }

    fn spawn<C: Connector>(
        connector: C,
        source: Arc<dyn StatusSource>,
        config: SpectatorConfig,
    ) -> Self {
        let (manager, connection_events) = ConnectionManager::spawn(connector, config.connection());
        let pipeline = SyncPipeline::new(config.queue, config.log_capacity);
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (state, _) = watch::channel(Arc::new(pipeline.state().clone()));

        let shared = Arc::new(Shared {
            pipeline: Mutex::new(pipeline),
            events,
            state,
        });
        let cancel = CancellationToken::new();

        tokio::spawn(run_pipeline(
            shared.clone(),
            manager.clone(),
            connection_events,
            config.heartbeat,
            cancel.clone(),
        ));

        Self {
            manager,
            shared,
            source,
            cancel,
            poller: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Session control
    // -----------------------------------------------------------------------

    /// Watches `session_id`, waiting until the push channel is open.
    ///
    /// Switching from another session resets state and log before the new
    /// session is dialed.
    ///
    /// # Errors
    /// [`WolfwatchError::Closed`] after [`close`](Self::close),
    /// [`ConnectionError::InvalidSession`] before any network activity;
    /// otherwise whatever [`ConnectionManager::connect`] reports.
    pub async fn connect(&self, session_id: &str) -> Result<(), WolfwatchError> {
        self.ensure_open()?;
        let session = SessionId::parse(session_id)?;
        self.bind(&session);
        self.manager.connect(session.as_str()).await?;
        Ok(())
    }

    /// Closes the push channel and stops reconnecting and polling.
    pub async fn disconnect(&self) {
        self.stop_polling();
        self.manager.disconnect().await;
    }

    /// Retries the bound session with a fresh budget.
    pub async fn reconnect(&self) -> Result<(), WolfwatchError> {
        self.ensure_open()?;
        self.manager.reconnect().await?;
        Ok(())
    }

    /// Fetches the full status of `session_id` over REST and replaces the
    /// state with it. Binds the session if it isn't already.
    pub async fn bootstrap(&self, session_id: &str) -> Result<Arc<GameState>, WolfwatchError> {
        self.ensure_open()?;
        let session = SessionId::parse(session_id)?;
        self.bind(&session);

        let status = self.source.fetch(&session).await?;
        tracing::info!(%session, status = %status.status, "bootstrapped from REST");
        self.shared.step(|p| {
            if p.session() == Some(session.as_str()) {
                p.apply_snapshot(status.into())
            } else {
                Step::default()
            }
        });
        Ok(self.snapshot())
    }

    /// Polls the bound session's REST status every `interval` while the push
    /// channel is down. Stops on its own once the game is finished.
    ///
    /// # Errors
    /// [`WolfwatchError::Closed`] after [`close`](Self::close),
    /// [`ConnectionError::NoSession`] if no session is bound.
    pub fn start_polling(&self, interval: Duration) -> Result<(), WolfwatchError> {
        self.ensure_open()?;
        let session = self
            .shared
            .lock()
            .session()
            .map(SessionId::parse)
            .transpose()?
            .ok_or(ConnectionError::NoSession)?;

        let token = self.cancel.child_token();
        if let Some(previous) = self.lock_poller().replace(token.clone()) {
            previous.cancel();
        }
        tokio::spawn(poll(
            self.shared.clone(),
            self.source.clone(),
            self.manager.clone(),
            session,
            interval,
            token,
        ));
        Ok(())
    }

    pub fn stop_polling(&self) {
        if let Some(token) = self.lock_poller().take() {
            token.cancel();
        }
    }

    /// Sends a `{type, data}` envelope. Best-effort: `false` when not
    /// connected.
    pub fn send(&self, kind: &str, data: Value) -> bool {
        self.manager.send(kind, data)
    }

    /// Stops every task and releases the transport. Idempotent.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("closing spectator client");
        }
        self.cancel.cancel();
        self.manager.shutdown();
    }

    /// `true` after [`close`](Self::close), or once the connection driver
    /// has stopped on its own.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.manager.is_shutdown()
    }

    fn ensure_open(&self) -> Result<(), WolfwatchError> {
        if self.is_closed() {
            return Err(WolfwatchError::Closed);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// Every event, filtered to `kinds`.
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        Subscription {
            rx: self.shared.events.subscribe(),
            kinds: Some(kinds.iter().copied().collect()),
        }
    }

    pub fn subscribe_all(&self) -> Subscription {
        Subscription {
            rx: self.shared.events.subscribe(),
            kinds: None,
        }
    }

    /// The current game state.
    pub fn snapshot(&self) -> Arc<GameState> {
        self.shared.state.borrow().clone()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<Arc<GameState>> {
        self.shared.state.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.manager.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.manager.watch_status()
    }

    /// The display log without system events, oldest first.
    pub fn narratable_log(&self) -> Vec<DomainEvent> {
        self.shared.lock().log().narratable()
    }

    /// The whole display log, system events included.
    pub fn log(&self) -> Vec<DomainEvent> {
        self.shared.lock().log().iter().cloned().collect()
    }

    fn is_switching(&self, session: &SessionId) -> bool {
        self.shared
            .lock()
            .session()
            .is_some_and(|bound| bound != session.as_str())
    }

    fn bind(&self, session: &SessionId) {
        if self.is_switching(session) {
            self.stop_polling();
        }
        self.shared.step(|p| Step {
            state_changed: p.bind(session.as_str()),
            ..Step::default()
        });
    }

    fn lock_poller(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SpectatorClient {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// The pipeline task: merges connection events, expires gaps, sends the
/// heartbeat.
async fn run_pipeline(
    shared: Arc<Shared>,
    manager: ConnectionManager,
    mut connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    heartbeat: Option<Duration>,
    cancel: CancellationToken,
) {
    let mut heartbeat = heartbeat.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        let deadline = shared.lock().next_deadline();

        tokio::select! {
            _ = cancel.cancelled() => break,
            event = connection_events.recv() => {
                let Some(event) = event else { break };
                let current = manager.status().session;
                let replies = shared.step(|p| on_connection_event(p, event, current.as_ref()));
                for reply in replies {
                    manager.send(&reply.kind, reply.data);
                }
            }
            _ = sleep_until(deadline) => {
                shared.step(|p| p.expire(Instant::now().into_std()));
            }
            _ = tick(&mut heartbeat) => {
                if manager.status().connected() {
                    manager.send("ping", json!({}));
                }
            }
        }
    }

    manager.shutdown();
    tracing::debug!("pipeline task stopped");
}

/// `current` is the session the manager is bound to now. A `Connected` for
/// any other session was queued before a switch; everything else must match
/// the session the pipeline is bound to, which `connect` and `bootstrap` set.
fn on_connection_event(
    pipeline: &mut SyncPipeline,
    event: ConnectionEvent,
    current: Option<&SessionId>,
) -> Step {
    if let ConnectionEvent::Connected { session, epoch } = event {
        if current.is_some_and(|current| *current != session) {
            tracing::debug!(%session, "dropping connect from before a session switch");
            return Step::default();
        }
        tracing::info!(%session, epoch, "spectating");
        return pipeline.on_connected(session.as_str(), epoch);
    }

    if pipeline.session() != Some(event.session().as_str()) {
        tracing::debug!(session = %event.session(), "dropping event for unbound session");
        return Step::default();
    }
    match event {
        ConnectionEvent::Frame { epoch, data, .. } => {
            pipeline.on_frame(epoch, &data, Instant::now().into_std())
        }
        ConnectionEvent::Disconnected { reason, .. } => pipeline.on_disconnected(&reason),
        ConnectionEvent::Failed { reason, .. } => pipeline.on_failed(&reason),
        ConnectionEvent::Connected { .. } => Step::default(),
    }
}

/// REST fallback while the push channel is down.
async fn poll(
    shared: Arc<Shared>,
    source: Arc<dyn StatusSource>,
    manager: ConnectionManager,
    session: SessionId,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(%session, ?interval, "polling started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if manager.status().connected() {
            continue;
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => break,
            status = source.fetch(&session) => status,
        };
        match status {
            Ok(status) => {
                let finished = is_finished(&status);
                shared.step(|p| {
                    if p.session() == Some(session.as_str()) {
                        p.apply_snapshot(status.into())
                    } else {
                        Step::default()
                    }
                });
                if finished {
                    tracing::info!(%session, "game finished, polling stopped");
                    break;
                }
            }
            Err(e) => tracing::warn!(%session, error = %e, "status poll failed"),
        }
    }
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
