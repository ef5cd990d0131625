//! Gateway transport abstraction and the tungstenite-backed default.
//!
//! The connection drives a boxed [`Transport`] so tests can substitute a
//! scripted in-process link. [`TungsteniteConnector`] is the production
//! implementation speaking websocket text frames.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::gateway::messages::GatewayFrame;
use crate::shared::error::TransportError;

/// Transport-level input to the connection's read loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame(GatewayFrame),
    /// The peer closed the link. `code` is absent when the stream simply
    /// ended without a close frame.
    Closed { code: Option<u16>, reason: String },
}

/// A live gateway link.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: GatewayFrame) -> Result<(), TransportError>;
    async fn recv(&mut self) -> Result<TransportEvent, TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens gateway links. One connector serves every reconnect attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}

/// Production connector using `tokio-tungstenite`.
#[derive(Debug, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Box::new(TungsteniteTransport { stream }))
    }
}

struct TungsteniteTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn send(&mut self, frame: GatewayFrame) -> Result<(), TransportError> {
        let text = frame
            .encode()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn recv(&mut self) -> Result<TransportEvent, TransportError> {
        loop {
            let message = match self.stream.next().await {
                None => {
                    return Ok(TransportEvent::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    })
                }
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                    return Ok(TransportEvent::Closed {
                        code: None,
                        reason: "connection closed".to_string(),
                    })
                }
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
                Some(Ok(message)) => message,
            };

            match message {
                Message::Text(text) => match GatewayFrame::decode(&text) {
                    Ok(frame) => return Ok(TransportEvent::Frame(frame)),
                    Err(error) => {
                        tracing::warn!(%error, "Dropping undecodable gateway frame");
                    }
                },
                Message::Close(close_frame) => {
                    let (code, reason) = match close_frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                        None => (None, String::new()),
                    };
                    return Ok(TransportEvent::Closed { code, reason });
                }
                // Pings are answered by tungstenite itself; binary frames
                // are not part of the uncompressed protocol.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                Message::Binary(_) => {
                    tracing::warn!("Dropping unexpected binary gateway frame");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Io(e.to_string())),
        }
    }
}
