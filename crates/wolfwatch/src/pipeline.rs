//! The synchronous merge path: bytes in, ordered domain events out.
//!
//! ```text
//!  frame bytes ─► JsonCodec ─► OrderedQueue ─► classify ─► StateStore
//!                    │              │                         │
//!                 bad frame      gap skipped              EventLog
//!                    └──────► Diagnostic ◄┘
//! ```
//!
//! [`SyncPipeline`] has no I/O, no clock and no awaits. The client's task
//! feeds it connection events and passes in `now`; tests drive it directly.

use std::time::Instant;

use serde_json::json;
use wolfwatch_events::{
    DomainEvent, EventBody, EventId, EventLog, build, classify, connection_notice, diagnostic,
};
use wolfwatch_protocol::{
    Codec, Envelope, JsonCodec, OrderedQueue, QueueConfig, QueueOutput, QueueStats, StateDump,
};
use wolfwatch_state::{GameState, Outcome, StateStore};

/// What one pipeline step produced.
#[derive(Debug, Default)]
pub struct Step {
    /// Events to publish, in order. Duplicates are already filtered out.
    pub events: Vec<DomainEvent>,
    /// Control envelopes to send back (`pong` for a server `ping`).
    pub replies: Vec<Envelope>,
    /// Whether the game state changed (including a reset).
    pub state_changed: bool,
}

/// Queue, store and display log for one spectator.
#[derive(Debug)]
pub struct SyncPipeline {
    session: Option<String>,
    epoch: u64,
    queue: OrderedQueue,
    store: StateStore,
    log: EventLog,
    /// Counter for ids of events that carry no sequence number.
    out_of_band: u64,
}

impl SyncPipeline {
    pub fn new(queue: QueueConfig, log_capacity: usize) -> Self {
        Self {
            session: None,
            epoch: 0,
            queue: OrderedQueue::new(queue),
            store: StateStore::new(None),
            log: EventLog::with_capacity(log_capacity),
            out_of_band: 0,
        }
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> &GameState {
        self.store.state()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// When [`expire`](Self::expire) should next be called.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.next_deadline()
    }

    /// Binds to `session`. Switching to a different session drops the
    /// queue, the state and the log; rebinding the same one keeps them.
    ///
    /// Returns `true` if anything was reset.
    pub fn bind(&mut self, session: &str) -> bool {
        if self.session.as_deref() == Some(session) {
            return false;
        }
        if let Some(previous) = &self.session {
            tracing::info!(from = %previous, to = %session, "switching session");
        }
        self.session = Some(session.to_string());
        self.queue.reset();
        self.store.reset(Some(session.to_string()));
        self.log.clear();
        true
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// A link to `session` opened. Sequence numbers restart at 1 on every
    /// connection, so the queue is always reset.
    pub fn on_connected(&mut self, session: &str, epoch: u64) -> Step {
        let mut step = Step {
            state_changed: self.bind(session),
            ..Step::default()
        };
        self.epoch = epoch;
        self.queue.reset();

        let event = connection_notice(self.next_out_of_band(), format!("Connected to game {session}"));
        self.record(event, &mut step);
        step
    }

    pub fn on_disconnected(&mut self, reason: &str) -> Step {
        let mut step = Step::default();
        let event = connection_notice(self.next_out_of_band(), format!("Connection lost: {reason}"));
        self.record(event, &mut step);
        step
    }

    /// The retry budget ran out.
    pub fn on_failed(&mut self, reason: &str) -> Step {
        let mut step = Step::default();
        let event = connection_notice(
            self.next_out_of_band(),
            format!("Could not reconnect: {reason}"),
        );
        self.record(event, &mut step);
        step
    }

    // -----------------------------------------------------------------------
    // Inbound data
    // -----------------------------------------------------------------------

    /// One inbound frame from connection `epoch`.
    ///
    /// Frames from an older connection are dropped: their sequence numbers
    /// belong to a numbering the queue has already forgotten.
    pub fn on_frame(&mut self, epoch: u64, data: &[u8], now: Instant) -> Step {
        let mut step = Step::default();
        if epoch != self.epoch {
            tracing::debug!(epoch, current = self.epoch, "dropping frame from stale connection");
            return step;
        }

        let envelope = match JsonCodec.decode_envelope(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable frame");
                let event = diagnostic(self.next_out_of_band(), format!("Undecodable message: {e}"));
                self.record(event, &mut step);
                return step;
            }
        };

        if envelope.kind == "ping" {
            step.replies.push(Envelope::new("pong", json!({})));
        }

        for output in self.queue.push(envelope, now) {
            self.handle(output, &mut step);
        }
        step
    }

    /// Gives up on gaps whose wait has run out.
    pub fn expire(&mut self, now: Instant) -> Step {
        let mut step = Step::default();
        for output in self.queue.expire(now) {
            self.handle(output, &mut step);
        }
        step
    }

    /// Applies a full state dump fetched out of band (REST bootstrap or
    /// polling).
    pub fn apply_snapshot(&mut self, dump: StateDump) -> Step {
        let mut step = Step::default();
        let event = build(self.next_out_of_band(), EventBody::StateSnapshot(Box::new(dump)));
        self.record(event, &mut step);
        step
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn handle(&mut self, output: QueueOutput, step: &mut Step) {
        let event = match output {
            QueueOutput::Released(envelope) => {
                let id = match envelope.sequence() {
                    Some(seq) => EventId::sequenced(self.session_key(), self.epoch, seq),
                    None => self.next_out_of_band(),
                };
                classify(&envelope, id)
            }
            QueueOutput::Skipped { from, to } => {
                tracing::warn!(from, to, "gave up waiting for missing events");
                let range = if from == to {
                    format!("event {from}")
                } else {
                    format!("events {from} to {to}")
                };
                diagnostic(self.next_out_of_band(), format!("Missed {range}; continuing"))
            }
        };
        self.record(event, step);
    }

    /// Applies, logs and queues one event for publishing.
    fn record(&mut self, event: DomainEvent, step: &mut Step) {
        match self.store.apply(&event) {
            Outcome::Duplicate => return,
            Outcome::Applied => step.state_changed = true,
            Outcome::Ignored(reason) if !event.is_system() => {
                tracing::debug!(id = %event.id, %reason, "event not applied");
            }
            Outcome::Narration | Outcome::Ignored(_) => {}
        }
        tracing::debug!(id = %event.id, kind = ?event.kind(), "event");
        self.log.push(event.clone());
        step.events.push(event);
    }

    fn session_key(&self) -> &str {
        self.session.as_deref().unwrap_or("-")
    }

    fn next_out_of_band(&mut self) -> EventId {
        self.out_of_band += 1;
        EventId::out_of_band(self.session_key(), self.epoch, self.out_of_band)
    }
}

impl Default for SyncPipeline {
    fn default() -> Self {
        Self::new(QueueConfig::default(), 1000)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use wolfwatch_events::EventKind;

    use super::*;

    fn frame(kind: &str, seq: u64, data: Value) -> Vec<u8> {
        let mut data = data;
        if let Value::Object(map) = &mut data {
            map.insert("sequence_number".into(), json!(seq));
        }
        serde_json::to_vec(&json!({ "type": kind, "data": data })).expect("encode frame")
    }

    fn connected(session: &str) -> SyncPipeline {
        let mut pipeline = SyncPipeline::default();
        pipeline.on_connected(session, 1);
        pipeline
    }

    fn kinds(step: &Step) -> Vec<EventKind> {
        step.events.iter().map(|e| e.kind()).collect()
    }

    #[test]
    fn test_on_frame_out_of_order_releases_in_sequence() {
        let mut pipeline = connected("s1");
        let now = Instant::now();

        let third = pipeline.on_frame(1, &frame("vote_cast", 3, json!({ "voter": "C", "target": "A" })), now);
        let first = pipeline.on_frame(1, &frame("phase_change", 1, json!({ "phase": "voting", "round_number": 1 })), now);
        let second = pipeline.on_frame(1, &frame("vote_cast", 2, json!({ "voter": "A", "target": "B" })), now);

        assert!(third.events.is_empty());
        assert_eq!(kinds(&first), vec![EventKind::PhaseChange]);
        assert_eq!(kinds(&second), vec![EventKind::Vote, EventKind::Vote]);
        assert_eq!(pipeline.state().vote_tally().len(), 2);
    }

    #[test]
    fn test_on_frame_ping_replies_pong() {
        let mut pipeline = connected("s1");
        let step = pipeline.on_frame(1, br#"{"type":"ping","data":{}}"#, Instant::now());

        assert_eq!(step.replies.len(), 1);
        assert_eq!(step.replies[0].kind, "pong");
        assert_eq!(kinds(&step), vec![EventKind::Heartbeat]);
        assert!(!step.state_changed);
    }

    #[test]
    fn test_on_frame_garbage_becomes_diagnostic() {
        let mut pipeline = connected("s1");
        let step = pipeline.on_frame(1, b"not json", Instant::now());

        assert_eq!(kinds(&step), vec![EventKind::Diagnostic]);
        assert!(pipeline.log().narratable().is_empty());
    }

    #[test]
    fn test_on_frame_stale_epoch_is_dropped() {
        let mut pipeline = connected("s1");
        pipeline.on_connected("s1", 2);

        let step = pipeline.on_frame(1, &frame("vote_cast", 1, json!({ "voter": "A", "target": "B" })), Instant::now());
        assert!(step.events.is_empty());
    }

    #[test]
    fn test_expire_skips_gap_with_diagnostic() {
        let mut pipeline = connected("s1");
        let start = Instant::now();
        pipeline.on_frame(1, &frame("vote_cast", 2, json!({ "voter": "A", "target": "B" })), start);

        let deadline = pipeline.next_deadline().expect("gap should arm a deadline");
        assert!(pipeline.expire(deadline - Duration::from_millis(1)).events.is_empty());

        let step = pipeline.expire(deadline);
        assert_eq!(kinds(&step), vec![EventKind::Diagnostic, EventKind::Vote]);
        assert!(step.events[0].display.text.contains("Missed event 1"));
        assert!(step.state_changed);
    }

    #[test]
    fn test_bind_other_session_resets_everything() {
        let mut pipeline = connected("s1");
        pipeline.on_frame(1, &frame("vote_cast", 1, json!({ "voter": "A", "target": "B" })), Instant::now());
        assert!(!pipeline.state().players.is_empty());

        let step = pipeline.on_connected("s2", 2);

        assert!(step.state_changed);
        assert_eq!(pipeline.state().session_id.as_deref(), Some("s2"));
        assert!(pipeline.state().players.is_empty());
        assert_eq!(pipeline.log().len(), 1);
    }

    #[test]
    fn test_on_connected_same_session_keeps_state() {
        let mut pipeline = connected("s1");
        pipeline.on_frame(1, &frame("vote_cast", 1, json!({ "voter": "A", "target": "B" })), Instant::now());

        let step = pipeline.on_connected("s1", 2);

        assert!(!step.state_changed);
        assert_eq!(pipeline.state().players.len(), 2);

        // Numbering restarts with the new connection.
        let replay = pipeline.on_frame(2, &frame("vote_cast", 1, json!({ "voter": "C", "target": "A" })), Instant::now());
        assert_eq!(kinds(&replay), vec![EventKind::Vote]);
        assert_eq!(pipeline.state().players.len(), 3);
    }
}
