//! In-memory transport for tests.
//!
//! A [`MockConnector`] hands every successful dial's server side to the
//! test as a [`MockServer`], which can push frames, close with a code, or
//! drop the link, and records what the client sent.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use crate::{CloseInfo, Connection, ConnectionId, Connector, Inbound, TransportError};

#[derive(Debug, Default)]
struct DialPolicy {
    refuse_remaining: u32,
    refuse_always: bool,
    delay: Option<Duration>,
    dials: Vec<String>,
}

/// Records the client side's outbound traffic for one link.
#[derive(Debug, Default)]
struct LinkLog {
    sent: Vec<Vec<u8>>,
    closed_with: Option<u16>,
}

/// A [`Connector`] backed by channels.
#[derive(Clone)]
pub struct MockConnector {
    policy: Arc<StdMutex<DialPolicy>>,
    accepted: mpsc::UnboundedSender<MockServer>,
}

impl MockConnector {
    /// Creates a connector and the receiver on which each accepted link's
    /// server side is delivered.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockServer>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Self {
            policy: Arc::new(StdMutex::new(DialPolicy::default())),
            accepted,
        };
        (connector, rx)
    }

    /// Refuses the next `n` dials.
    pub fn refuse_next(&self, n: u32) {
        self.with_policy(|p| p.refuse_remaining = n);
    }

    /// Refuses every dial until set back to `false`.
    pub fn refuse_all(&self, refuse: bool) {
        self.with_policy(|p| p.refuse_always = refuse);
    }

    /// Makes every dial take `delay` before resolving.
    pub fn set_dial_delay(&self, delay: Duration) {
        self.with_policy(|p| p.delay = Some(delay));
    }

    /// URLs dialed so far, refused ones included.
    pub fn dials(&self) -> Vec<String> {
        self.with_policy(|p| p.dials.clone())
    }

    fn with_policy<R>(&self, f: impl FnOnce(&mut DialPolicy) -> R) -> R {
        let mut guard = match self.policy.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, url: &str) -> Result<Self::Connection, TransportError> {
        let delay = self.with_policy(|p| {
            p.dials.push(url.to_string());
            p.delay
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let refuse = self.with_policy(|p| {
            if p.refuse_always {
                true
            } else if p.refuse_remaining > 0 {
                p.refuse_remaining -= 1;
                true
            } else {
                false
            }
        });
        if refuse {
            return Err(TransportError::ConnectFailed {
                url: url.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "mock refused"),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let log = Arc::new(StdMutex::new(LinkLog::default()));
        let id = ConnectionId::next();
        let server = MockServer {
            id,
            url: url.to_string(),
            tx,
            log: Arc::clone(&log),
        };
        // A test that stopped listening just doesn't get the handle.
        let _ = self.accepted.send(server);

        Ok(MockConnection {
            id,
            rx: Mutex::new(rx),
            log,
        })
    }
}

type Feed = Result<Inbound, TransportError>;

/// Client side of a mock link.
pub struct MockConnection {
    id: ConnectionId,
    rx: Mutex<mpsc::UnboundedReceiver<Feed>>,
    log: Arc<StdMutex<LinkLog>>,
}

impl MockConnection {
    fn record(&self, f: impl FnOnce(&mut LinkLog)) {
        let mut guard = match self.log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
    }
}

impl Connection for MockConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut closed = None;
        self.record(|log| match log.closed_with {
            Some(code) => closed = Some(code),
            None => log.sent.push(data.to_vec()),
        });
        match closed {
            Some(code) => Err(TransportError::ConnectionClosed(format!(
                "closed with code {code}"
            ))),
            None => Ok(()),
        }
    }

    async fn recv(&self) -> Result<Inbound, TransportError> {
        match self.rx.lock().await.recv().await {
            Some(feed) => feed,
            // Server handle dropped without a close frame.
            None => Ok(Inbound::Closed(None)),
        }
    }

    async fn close(&self, code: u16, _reason: &str) -> Result<(), TransportError> {
        self.record(|log| log.closed_with = Some(code));
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Server side of a mock link, held by the test.
pub struct MockServer {
    id: ConnectionId,
    url: String,
    tx: mpsc::UnboundedSender<Feed>,
    log: Arc<StdMutex<LinkLog>>,
}

impl MockServer {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The URL the client dialed.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Pushes one data frame to the client. Returns `false` if the client
    /// side is gone.
    pub fn push(&self, data: impl Into<Vec<u8>>) -> bool {
        self.tx.send(Ok(Inbound::Data(data.into()))).is_ok()
    }

    /// Closes the link from the server side with `code`.
    pub fn close(&self, code: u16) {
        let _ = self.tx.send(Ok(Inbound::Closed(Some(CloseInfo {
            code,
            reason: String::new(),
        }))));
    }

    /// Fails the link with a receive error, as a reset socket would.
    pub fn fail(&self) {
        let _ = self.tx.send(Err(TransportError::ReceiveFailed(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "mock reset",
        ))));
    }

    /// Frames the client sent on this link.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.inspect(|log| log.sent.clone())
    }

    /// The close code the client used, if it closed.
    pub fn closed_with(&self) -> Option<u16> {
        self.inspect(|log| log.closed_with)
    }

    fn inspect<R>(&self, f: impl FnOnce(&LinkLog) -> R) -> R {
        let guard = match self.log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&guard)
    }
}
