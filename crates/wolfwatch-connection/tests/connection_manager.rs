//! Integration tests for the connection manager.
//!
//! The manager runs against the in-memory `MockConnector`, with paused
//! Tokio time so backoff delays elapse instantly and deterministically.

use std::time::Duration;

use tokio::sync::mpsc;
use wolfwatch_connection::{
    ConnectionConfig, ConnectionError, ConnectionEvent, ConnectionManager, ConnectionState,
};
use wolfwatch_transport::{MockConnector, MockServer};

// =========================================================================
// Helpers
// =========================================================================

struct Harness {
    manager: ConnectionManager,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    connector: MockConnector,
    accepted: mpsc::UnboundedReceiver<MockServer>,
}

fn harness() -> Harness {
    let (connector, accepted) = MockConnector::new();
    let config = ConnectionConfig::default().with_base_url("ws://mock");
    let (manager, events) = ConnectionManager::spawn(connector.clone(), config);
    Harness {
        manager,
        events,
        connector,
        accepted,
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(120), events.recv())
        .await
        .expect("event should arrive")
        .expect("driver should be alive")
}

async fn next_server(accepted: &mut mpsc::UnboundedReceiver<MockServer>) -> MockServer {
    tokio::time::timeout(Duration::from_secs(120), accepted.recv())
        .await
        .expect("dial should arrive")
        .expect("connector alive")
}

/// Lets the driver drain whatever it can do without time passing.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// =========================================================================
// Connect
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_emits_single_connected_event() {
    let mut h = harness();

    h.manager.connect("s1").await.expect("should connect");
    let server = next_server(&mut h.accepted).await;
    assert_eq!(server.url(), "ws://mock/ws/s1");

    match next_event(&mut h.events).await {
        ConnectionEvent::Connected { session, epoch } => {
            assert_eq!(session.as_str(), "s1");
            assert_eq!(epoch, 1);
        }
        other => panic!("expected Connected, got {other:?}"),
    }

    // Connecting again to the same session is a no-op.
    h.manager.connect("s1").await.unwrap();
    settle().await;
    assert!(h.events.try_recv().is_err(), "no duplicate Connected");
    assert_eq!(h.connector.dials().len(), 1);

    let status = h.manager.status();
    assert!(status.connected());
    assert_eq!(status.session.as_ref().map(|s| s.as_str()), Some("s1"));
}

#[tokio::test(start_paused = true)]
async fn test_connect_invalid_session_fails_before_dialing() {
    let h = harness();

    for raw in ["", "undefined", "null", "../etc"] {
        let err = h.manager.connect(raw).await.unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidSession(_)), "{raw:?}: {err}");
    }
    settle().await;
    assert!(h.connector.dials().is_empty());
    assert_eq!(h.manager.status().state, ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_connect_same_session_joins_inflight_dial() {
    let h = harness();
    h.connector.set_dial_delay(Duration::from_secs(2));

    let a = h.manager.clone();
    let b = h.manager.clone();
    let (ra, rb) = tokio::join!(a.connect("s1"), b.connect("s1"));

    assert!(ra.is_ok());
    assert!(rb.is_ok());
    assert_eq!(h.connector.dials().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_other_session_while_dialing_is_rejected() {
    let h = harness();
    h.connector.set_dial_delay(Duration::from_secs(2));

    let first = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.connect("s1").await })
    };
    while !h.manager.status().connecting() {
        tokio::task::yield_now().await;
    }

    let err = h.manager.connect("s2").await.unwrap_err();
    assert_eq!(
        err,
        ConnectionError::AlreadyConnecting {
            pending: "s1".into()
        }
    );
    assert!(first.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_connect_other_session_switches_cleanly() {
    let mut h = harness();

    h.manager.connect("s1").await.unwrap();
    let first = next_server(&mut h.accepted).await;
    assert!(matches!(next_event(&mut h.events).await, ConnectionEvent::Connected { .. }));

    h.manager.connect("s2").await.unwrap();
    let second = next_server(&mut h.accepted).await;
    assert_eq!(second.url(), "ws://mock/ws/s2");
    assert_eq!(first.closed_with(), Some(1000));

    match next_event(&mut h.events).await {
        ConnectionEvent::Disconnected { session, .. } => assert_eq!(session.as_str(), "s1"),
        other => panic!("expected Disconnected(s1), got {other:?}"),
    }
    match next_event(&mut h.events).await {
        ConnectionEvent::Connected { session, epoch } => {
            assert_eq!(session.as_str(), "s2");
            assert_eq!(epoch, 2);
        }
        other => panic!("expected Connected(s2), got {other:?}"),
    }
}

// =========================================================================
// Frames and sending
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_frames_are_forwarded_with_epoch() {
    let mut h = harness();
    h.manager.connect("s1").await.unwrap();
    let server = next_server(&mut h.accepted).await;
    next_event(&mut h.events).await;

    server.push(br#"{"type":"ping"}"#.to_vec());
    match next_event(&mut h.events).await {
        ConnectionEvent::Frame {
            session,
            epoch,
            data,
        } => {
            assert_eq!(session.as_str(), "s1");
            assert_eq!(epoch, 1);
            assert_eq!(data, br#"{"type":"ping"}"#.to_vec());
        }
        other => panic!("expected Frame, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_send_only_succeeds_when_connected() {
    let mut h = harness();
    assert!(!h.manager.send("ping", serde_json::Value::Null));

    h.manager.connect("s1").await.unwrap();
    let server = next_server(&mut h.accepted).await;
    assert!(h.manager.send("pong", serde_json::json!({})));
    settle().await;

    let sent = server.sent();
    assert_eq!(sent.len(), 1);
    let value: serde_json::Value = serde_json::from_slice(&sent[0]).unwrap();
    assert_eq!(value["type"], "pong");
}

// =========================================================================
// Reconnection
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_drop_reconnects_after_backoff() {
    let mut h = harness();
    h.manager.connect("s1").await.unwrap();
    let first = next_server(&mut h.accepted).await;
    next_event(&mut h.events).await;

    let dropped_at = tokio::time::Instant::now();
    first.fail();

    assert!(matches!(
        next_event(&mut h.events).await,
        ConnectionEvent::Disconnected { .. }
    ));
    assert_eq!(h.manager.status().state, ConnectionState::Reconnecting);
    assert_eq!(h.manager.status().attempt, 1);

    let _second = next_server(&mut h.accepted).await;
    assert!(dropped_at.elapsed() >= Duration::from_secs(1));
    match next_event(&mut h.events).await {
        ConnectionEvent::Connected { epoch, .. } => assert_eq!(epoch, 2),
        other => panic!("expected Connected, got {other:?}"),
    }
    let status = h.manager.status();
    assert!(status.connected());
    assert_eq!(status.attempt, 0);
    assert_eq!(status.error(), None);
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_exhaustion_fails_once() {
    let mut h = harness();
    h.connector.refuse_all(true);

    let err = h.manager.connect("s1").await.unwrap_err();
    assert!(
        matches!(err, ConnectionError::RetriesExhausted { attempts: 5, .. }),
        "{err}"
    );
    // First dial plus five retries.
    assert_eq!(h.connector.dials().len(), 6);

    let status = h.manager.status();
    assert_eq!(status.state, ConnectionState::Failed);
    assert!(status.error().is_some());

    assert!(matches!(
        next_event(&mut h.events).await,
        ConnectionEvent::Failed { .. }
    ));
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(h.events.try_recv().is_err(), "Failed is reported once");
    assert_eq!(h.connector.dials().len(), 6, "no retries after Failed");

    // A manual reconnect gets a fresh budget.
    h.connector.refuse_all(false);
    h.manager.reconnect().await.unwrap();
    assert!(h.manager.status().connected());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_retry() {
    let mut h = harness();
    h.manager.connect("s1").await.unwrap();
    let server = next_server(&mut h.accepted).await;
    next_event(&mut h.events).await;

    server.fail();
    next_event(&mut h.events).await; // Disconnected
    assert_eq!(h.manager.status().state, ConnectionState::Reconnecting);

    h.manager.disconnect().await;
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(h.connector.dials().len(), 1, "retry must not fire");
    assert_eq!(h.manager.status().state, ConnectionState::Idle);
    assert!(h.events.try_recv().is_err(), "no second Disconnected");
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_dialing_cancels_connect() {
    let h = harness();
    h.connector.set_dial_delay(Duration::from_secs(5));

    let pending = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.connect("s1").await })
    };
    while !h.manager.status().connecting() {
        tokio::task::yield_now().await;
    }

    h.manager.disconnect().await;
    assert_eq!(pending.await.unwrap(), Err(ConnectionError::Cancelled));
    assert_eq!(h.manager.status().state, ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_normal_closure_does_not_reconnect() {
    let mut h = harness();
    h.manager.connect("s1").await.unwrap();
    let server = next_server(&mut h.accepted).await;
    next_event(&mut h.events).await;

    server.close(1000);
    assert!(matches!(
        next_event(&mut h.events).await,
        ConnectionEvent::Disconnected { .. }
    ));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.connector.dials().len(), 1);
    let status = h.manager.status();
    assert_eq!(status.state, ConnectionState::Idle);
    assert_eq!(status.session.as_ref().map(|s| s.as_str()), Some("s1"));

    h.manager.reconnect().await.unwrap();
    assert_eq!(h.connector.dials().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_idempotent() {
    let mut h = harness();
    h.manager.connect("s1").await.unwrap();
    next_event(&mut h.events).await;

    h.manager.disconnect().await;
    h.manager.disconnect().await;

    assert!(matches!(
        next_event(&mut h.events).await,
        ConnectionEvent::Disconnected { .. }
    ));
    settle().await;
    assert!(h.events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_without_session_errors() {
    let h = harness();
    assert_eq!(h.manager.reconnect().await, Err(ConnectionError::NoSession));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_further_commands() {
    let h = harness();
    h.manager.shutdown();
    assert!(h.manager.is_shutdown());
    assert_eq!(h.manager.connect("s1").await, Err(ConnectionError::Shutdown));
}
