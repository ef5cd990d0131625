//! Common Test Utilities
//!
//! Scripted transports for both sides of the client: a gateway
//! connector whose links are driven frame-by-frame from the test, and
//! an HTTP transport replaying canned responses while logging request
//! arrival times. No network anywhere.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use chat_client::gateway::connection::GatewayConfig;
use chat_client::gateway::messages::{GatewayFrame, OpCode};
use chat_client::gateway::transport::{Connector, Transport, TransportEvent};
use chat_client::http::transport::{Headers, HttpRequest, HttpResponse, HttpTransport};
use chat_client::shared::error::TransportError;

/// Await guard for scripted exchanges; generous enough that only a real
/// deadlock trips it.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection tuning for tests: tiny reconnect delays so retry paths
/// run quickly.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::new("ws://gateway.test/gateway", "test-token");
    config.reconnect_base = Duration::from_millis(10);
    config.reconnect_max = Duration::from_millis(40);
    config
}

/// The server half of one scripted gateway link.
pub struct ServerLink {
    to_client: mpsc::UnboundedSender<Result<TransportEvent, TransportError>>,
    from_client: mpsc::UnboundedReceiver<GatewayFrame>,
    /// Fires when the client closes the transport politely.
    pub closed: oneshot::Receiver<()>,
}

impl ServerLink {
    pub fn frame(&self, frame: GatewayFrame) {
        self.to_client.send(Ok(TransportEvent::Frame(frame))).ok();
    }

    pub fn hello(&self, heartbeat_interval_ms: u64) {
        self.frame(GatewayFrame {
            op: OpCode::Hello as u8,
            d: Some(json!({ "heartbeat_interval": heartbeat_interval_ms })),
            s: None,
            t: None,
        });
    }

    pub fn dispatch(&self, sequence: u64, event: &str, payload: Value) {
        self.frame(GatewayFrame {
            op: OpCode::Dispatch as u8,
            d: Some(payload),
            s: Some(sequence),
            t: Some(event.to_string()),
        });
    }

    pub fn ack(&self) {
        self.frame(GatewayFrame {
            op: OpCode::HeartbeatAck as u8,
            d: None,
            s: None,
            t: None,
        });
    }

    pub fn request_reconnect(&self) {
        self.frame(GatewayFrame {
            op: OpCode::Reconnect as u8,
            d: None,
            s: None,
            t: None,
        });
    }

    pub fn invalid_session(&self, resumable: bool) {
        self.frame(GatewayFrame {
            op: OpCode::InvalidSession as u8,
            d: Some(json!(resumable)),
            s: None,
            t: None,
        });
    }

    /// Server-initiated close with a code, like a websocket close frame.
    pub fn close(&self, code: u16, reason: &str) {
        self.to_client
            .send(Ok(TransportEvent::Closed {
                code: Some(code),
                reason: reason.to_string(),
            }))
            .ok();
    }

    /// Surfaces an I/O error on the client's next read.
    pub fn fail(&self, message: &str) {
        self.to_client
            .send(Err(TransportError::Io(message.to_string())))
            .ok();
    }

    /// Next frame the client sent, whatever it is.
    pub async fn expect_frame(&mut self) -> GatewayFrame {
        tokio::time::timeout(EXCHANGE_TIMEOUT, self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client dropped the link")
    }

    /// Next non-heartbeat frame; beats are interleaved freely by the
    /// client and rarely what a test is asserting on.
    pub async fn expect_control_frame(&mut self) -> GatewayFrame {
        loop {
            let frame = self.expect_frame().await;
            if frame.op != OpCode::Heartbeat as u8 {
                return frame;
            }
        }
    }

    /// Asserts the next handshake frame is an identify; returns its `d`.
    pub async fn expect_identify(&mut self) -> Value {
        let frame = self.expect_control_frame().await;
        assert_eq!(
            frame.op,
            OpCode::Identify as u8,
            "expected identify, got {frame:?}"
        );
        frame.d.expect("identify without payload")
    }

    /// Asserts the next handshake frame is a resume; returns its `d`.
    pub async fn expect_resume(&mut self) -> Value {
        let frame = self.expect_control_frame().await;
        assert_eq!(
            frame.op,
            OpCode::Resume as u8,
            "expected resume, got {frame:?}"
        );
        frame.d.expect("resume without payload")
    }

    /// Asserts the next frame is a heartbeat; returns the sequence it
    /// carried.
    pub async fn expect_heartbeat(&mut self) -> Option<u64> {
        let frame = self.expect_frame().await;
        assert_eq!(
            frame.op,
            OpCode::Heartbeat as u8,
            "expected heartbeat, got {frame:?}"
        );
        frame.d.and_then(|d| d.as_u64())
    }
}

/// Client half of a scripted link.
struct ScriptedTransport {
    incoming: mpsc::UnboundedReceiver<Result<TransportEvent, TransportError>>,
    outgoing: mpsc::UnboundedSender<GatewayFrame>,
    closed_tx: Option<oneshot::Sender<()>>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&mut self, frame: GatewayFrame) -> Result<(), TransportError> {
        self.outgoing
            .send(frame)
            .map_err(|_| TransportError::Io("link dropped".to_string()))
    }

    async fn recv(&mut self) -> Result<TransportEvent, TransportError> {
        match self.incoming.recv().await {
            Some(event) => event,
            // The test dropped its ServerLink: an abrupt end of stream.
            None => Ok(TransportEvent::Closed {
                code: None,
                reason: "stream ended".to_string(),
            }),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(tx) = self.closed_tx.take() {
            tx.send(()).ok();
        }
        Ok(())
    }
}

/// Hands one [`ServerLink`] to the test per connection attempt.
pub struct ScriptedConnector {
    link_tx: mpsc::UnboundedSender<ServerLink>,
    refuse: AtomicBool,
}

impl ScriptedConnector {
    /// While set, connection attempts fail at the dial stage.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>, TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("refused by script".to_string()));
        }
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = oneshot::channel();

        self.link_tx
            .send(ServerLink {
                to_client: to_client_tx,
                from_client: from_client_rx,
                closed: closed_rx,
            })
            .map_err(|_| TransportError::Connect("test dropped the link receiver".to_string()))?;

        Ok(Box::new(ScriptedTransport {
            incoming: to_client_rx,
            outgoing: from_client_tx,
            closed_tx: Some(closed_tx),
        }))
    }
}

pub fn scripted_connector() -> (Arc<ScriptedConnector>, mpsc::UnboundedReceiver<ServerLink>) {
    let (link_tx, link_rx) = mpsc::unbounded_channel();
    (
        Arc::new(ScriptedConnector {
            link_tx,
            refuse: AtomicBool::new(false),
        }),
        link_rx,
    )
}

/// Awaits the next connection attempt's link.
pub async fn next_link(links: &mut mpsc::UnboundedReceiver<ServerLink>) -> ServerLink {
    tokio::time::timeout(EXCHANGE_TIMEOUT, links.recv())
        .await
        .expect("timed out waiting for a connection attempt")
        .expect("connector dropped")
}

/// HTTP transport replaying canned responses in order. Every request is
/// logged with its arrival instant so tests can assert on *when* calls
/// hit the wire under a paused clock.
pub struct ScriptedHttp {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    log: Mutex<Vec<(HttpRequest, tokio::time::Instant)>>,
}

impl ScriptedHttp {
    pub fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, response: Result<HttpResponse, TransportError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|(request, _)| request.clone())
            .collect()
    }

    pub fn arrivals(&self) -> Vec<tokio::time::Instant> {
        self.log.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedHttp {
    async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.log
            .lock()
            .unwrap()
            .push((request, tokio::time::Instant::now()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("script ran out of responses")
    }
}

pub fn json_response(status: u16, body: Value) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse {
        status,
        headers: Headers::new(),
        body: Some(body),
    })
}

pub fn json_response_with(
    status: u16,
    headers: Headers,
    body: Value,
) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse {
        status,
        headers,
        body: Some(body),
    })
}

/// Rate limit header set the platform attaches to governed responses.
pub fn bucket_headers(bucket: &str, remaining: u32, limit: u32, reset_after: f64) -> Headers {
    [
        ("X-RateLimit-Bucket", bucket.to_string()),
        ("X-RateLimit-Remaining", remaining.to_string()),
        ("X-RateLimit-Limit", limit.to_string()),
        ("X-RateLimit-Reset-After", reset_after.to_string()),
    ]
    .into_iter()
    .collect()
}
