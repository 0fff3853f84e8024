//! WebSocket client transport using `tokio-tungstenite`.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::{CloseInfo, Connection, ConnectionId, Connector, Inbound, TransportError};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Connector`] that dials `ws://` / `wss://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    type Connection = WebSocketConnection;

    async fn connect(&self, url: &str) -> Result<Self::Connection, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            TransportError::ConnectFailed {
                url: url.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e),
            }
        })?;

        let id = ConnectionId::next();
        tracing::debug!(%id, url, "WebSocket connected");

        // Split so a pending `recv` never holds the lock `send` needs.
        let (sink, stream) = ws.split();
        Ok(WebSocketConnection {
            id,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

/// A single client WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

fn send_error(e: WsError) -> TransportError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            TransportError::ConnectionClosed(e.to_string())
        }
        e => TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e)),
    }
}

impl Connection for WebSocketConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        // The game server speaks JSON text frames; anything else goes binary.
        let msg = match std::str::from_utf8(data) {
            Ok(text) => Message::text(text),
            Err(_) => Message::binary(data.to_vec()),
        };
        self.sink.lock().await.send(msg).await.map_err(send_error)
    }

    async fn recv(&self) -> Result<Inbound, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Inbound::Data(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Binary(data))) => return Ok(Inbound::Data(data.into())),
                Some(Ok(Message::Close(frame))) => {
                    return Ok(Inbound::Closed(frame.map(|f| CloseInfo {
                        code: u16::from(f.code),
                        reason: f.reason.to_string(),
                    })));
                }
                None => return Ok(Inbound::Closed(None)),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(Some(frame)))
            .await
            .map_err(send_error)?;
        sink.close().await.map_err(send_error)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
