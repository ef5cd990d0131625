//! Gateway connection driver.
//!
//! One spawned task owns the transport for the lifetime of the client:
//! an outer loop paces reconnect attempts, an inner loop runs a single
//! connection from websocket handshake through Hello, Identify/Resume
//! and steady-state frame pumping. Consumers observe progress through a
//! `watch` channel of [`ConnectionStatus`] values and receive decoded
//! application events via the [`Dispatcher`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::gateway::backoff::{reidentify_delay, Backoff};
use crate::gateway::dispatch::{Dispatcher, Event};
use crate::gateway::heartbeat::Heartbeat;
use crate::gateway::messages::{
    close_disposition, CloseDisposition, GatewayFrame, GatewayMessage, IdentifyPayload,
    IdentifyProperties, ReadyPayload, CLOSE_AUTHENTICATION_FAILED, EVENT_READY, EVENT_RESUMED,
};
use crate::gateway::session::Session;
use crate::gateway::transport::{Connector, Transport, TransportEvent};
use crate::metrics;
use crate::shared::error::{GatewayError, TransportError};

/// Connection lifecycle as observed through [`GatewayConnection::status`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connecting,
    AwaitingHello,
    Identifying,
    Resuming,
    Ready { session_id: String, resumed: bool },
    Reconnecting,
    Closed,
    Failed(GatewayError),
}

/// Connection tuning. The client derives this from `Settings`; tests
/// build it directly.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub token: String,
    pub properties: IdentifyProperties,
    pub compress: bool,
    pub intents: Option<u64>,
    pub shard: Option<[u64; 2]>,
    pub connect_timeout: Duration,
    pub hello_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

impl GatewayConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            properties: IdentifyProperties {
                os: std::env::consts::OS.to_string(),
                browser: "chat-client".to_string(),
                device: "chat-client".to_string(),
            },
            compress: false,
            intents: None,
            shard: None,
            connect_timeout: Duration::from_secs(10),
            hello_timeout: Duration::from_secs(10),
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
        }
    }

    fn identify_payload(&self) -> IdentifyPayload {
        IdentifyPayload {
            token: self.token.clone(),
            properties: self.properties.clone(),
            compress: self.compress,
            intents: self.intents,
            shard: self.shard,
        }
    }
}

/// Handle to the spawned connection driver.
///
/// Dropping the handle signals the driver to shut down the same way
/// [`GatewayConnection::close`] does, just without waiting for it.
pub struct GatewayConnection {
    status_rx: watch::Receiver<ConnectionStatus>,
    shutdown_tx: watch::Sender<bool>,
}

impl GatewayConnection {
    pub fn spawn(
        config: GatewayConfig,
        connector: Arc<dyn Connector>,
        session: Arc<Session>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(drive(
            config,
            connector,
            session,
            dispatcher,
            status_tx,
            shutdown_rx,
        ));
        Self {
            status_rx,
            shutdown_tx,
        }
    }

    /// A fresh receiver for lifecycle updates.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub fn current_status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Resolves once the connection first reaches Ready, or with the
    /// fatal error that stopped it.
    pub async fn wait_until_ready(&self) -> Result<(), GatewayError> {
        let mut status_rx = self.status_rx.clone();
        loop {
            let status = status_rx.borrow_and_update().clone();
            match status {
                ConnectionStatus::Ready { .. } => return Ok(()),
                ConnectionStatus::Failed(error) => return Err(error),
                ConnectionStatus::Closed => return Err(GatewayError::Closed),
                _ => {}
            }
            if status_rx.changed().await.is_err() {
                return Err(GatewayError::Closed);
            }
        }
    }

    /// Shuts the driver down and waits until it has stopped. Never
    /// reconnects afterwards; the session state is discarded, so a
    /// later connection identifies from scratch.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut status_rx = self.status_rx.clone();
        loop {
            let status = status_rx.borrow_and_update().clone();
            if matches!(
                status,
                ConnectionStatus::Closed | ConnectionStatus::Failed(_)
            ) {
                return;
            }
            if status_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// How a single connection attempt ended.
#[derive(Debug, PartialEq)]
enum RunEnd {
    Shutdown,
    Retry {
        trigger: &'static str,
        reidentify_pause: bool,
    },
}

/// Outer reconnect loop. Runs until shutdown or a fatal error.
async fn drive(
    config: GatewayConfig,
    connector: Arc<dyn Connector>,
    session: Arc<Session>,
    dispatcher: Arc<Dispatcher>,
    status_tx: watch::Sender<ConnectionStatus>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(config.reconnect_base, config.reconnect_max);

    loop {
        let end = run_once(
            &config,
            connector.as_ref(),
            &session,
            &dispatcher,
            &status_tx,
            &mut shutdown_rx,
            &mut backoff,
        )
        .await;

        match end {
            Ok(RunEnd::Shutdown) => {
                tracing::info!("Gateway connection closed");
                // An intentional close discards the session; the next
                // connection starts over with Identify.
                session.reset();
                let _ = status_tx.send(ConnectionStatus::Closed);
                return;
            }
            Ok(RunEnd::Retry {
                trigger,
                reidentify_pause,
            }) => {
                metrics::record_reconnect(trigger);
                let _ = status_tx.send(ConnectionStatus::Reconnecting);

                if reidentify_pause {
                    let pause = reidentify_delay();
                    tracing::info!(
                        delay_ms = pause.as_millis() as u64,
                        "Session replaced, pausing before re-identify"
                    );
                    if sleep_or_shutdown(pause, &mut shutdown_rx).await {
                        session.reset();
                        let _ = status_tx.send(ConnectionStatus::Closed);
                        return;
                    }
                }

                let delay = backoff.next_delay();
                tracing::info!(
                    trigger,
                    attempt = backoff.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting to gateway"
                );
                if sleep_or_shutdown(delay, &mut shutdown_rx).await {
                    session.reset();
                    let _ = status_tx.send(ConnectionStatus::Closed);
                    return;
                }
            }
            Err(fatal) => {
                tracing::error!(error = %fatal, "Gateway connection failed");
                let _ = status_tx.send(ConnectionStatus::Failed(fatal));
                return;
            }
        }
    }
}

/// Sleeps unless shutdown arrives first. Returns true on shutdown.
async fn sleep_or_shutdown(delay: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_rx.changed() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// One connection attempt: connect, await Hello, handshake, pump frames.
async fn run_once(
    config: &GatewayConfig,
    connector: &dyn Connector,
    session: &Arc<Session>,
    dispatcher: &Dispatcher,
    status_tx: &watch::Sender<ConnectionStatus>,
    shutdown_rx: &mut watch::Receiver<bool>,
    backoff: &mut Backoff,
) -> Result<RunEnd, GatewayError> {
    let _ = status_tx.send(ConnectionStatus::Connecting);
    tracing::debug!(url = %config.url, "Connecting to gateway");

    let mut transport = tokio::select! {
        biased;
        _ = shutdown_rx.changed() => return Ok(RunEnd::Shutdown),
        connected = timeout(config.connect_timeout, connector.connect(&config.url)) => {
            match connected {
                Ok(Ok(transport)) => transport,
                Ok(Err(error)) => {
                    tracing::warn!(%error, "Gateway connect failed");
                    return Ok(RunEnd::Retry { trigger: "transport_error", reidentify_pause: false });
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = config.connect_timeout.as_millis() as u64,
                        "Gateway connect timed out"
                    );
                    return Ok(RunEnd::Retry { trigger: "transport_error", reidentify_pause: false });
                }
            }
        }
    };

    let _ = status_tx.send(ConnectionStatus::AwaitingHello);

    // The server speaks first: the one frame we accept here is Hello.
    let heartbeat_interval = tokio::select! {
        biased;
        _ = shutdown_rx.changed() => {
            let _ = transport.close().await;
            return Ok(RunEnd::Shutdown);
        }
        received = timeout(config.hello_timeout, transport.recv()) => {
            match received {
                Ok(Ok(TransportEvent::Frame(frame))) => match GatewayMessage::classify(frame) {
                    GatewayMessage::Hello { heartbeat_interval } => heartbeat_interval,
                    other => {
                        tracing::warn!(?other, "Expected hello as first frame");
                        let _ = transport.close().await;
                        return Ok(RunEnd::Retry { trigger: "transport_error", reidentify_pause: false });
                    }
                },
                Ok(Ok(TransportEvent::Closed { code, reason })) => {
                    return close_outcome(session, code, &reason);
                }
                Ok(Err(error)) => {
                    tracing::warn!(%error, "Transport failed before hello");
                    return Ok(RunEnd::Retry { trigger: "transport_error", reidentify_pause: false });
                }
                Err(_) => {
                    tracing::warn!("Timed out waiting for hello");
                    let _ = transport.close().await;
                    return Ok(RunEnd::Retry { trigger: "transport_error", reidentify_pause: false });
                }
            }
        }
    };

    tracing::info!(
        heartbeat_interval_ms = heartbeat_interval.as_millis() as u64,
        "Gateway hello received"
    );
    session.set_heartbeat_interval(heartbeat_interval);

    let (beat_tx, beat_rx) = mpsc::unbounded_channel();
    let (missed_tx, missed_rx) = mpsc::unbounded_channel();
    let mut heartbeat = Heartbeat::new();
    heartbeat.start(heartbeat_interval, Arc::clone(session), beat_tx, missed_tx);

    let mut active = ActiveConnection {
        config,
        transport,
        session: Arc::clone(session),
        dispatcher,
        status_tx,
        heartbeat,
        beat_rx,
        missed_rx,
        backoff,
        ready: false,
        resuming: false,
    };

    let end = match active.handshake().await {
        Ok(()) => active.run(shutdown_rx).await,
        Err(error) => {
            tracing::warn!(%error, "Handshake send failed");
            Ok(RunEnd::Retry {
                trigger: "transport_error",
                reidentify_pause: false,
            })
        }
    };

    active.heartbeat.stop();
    let _ = active.transport.close().await;
    end
}

/// A connection that got past Hello.
struct ActiveConnection<'a> {
    config: &'a GatewayConfig,
    transport: Box<dyn Transport>,
    session: Arc<Session>,
    dispatcher: &'a Dispatcher,
    status_tx: &'a watch::Sender<ConnectionStatus>,
    heartbeat: Heartbeat,
    beat_rx: mpsc::UnboundedReceiver<GatewayFrame>,
    missed_rx: mpsc::UnboundedReceiver<()>,
    backoff: &'a mut Backoff,
    ready: bool,
    resuming: bool,
}

impl ActiveConnection<'_> {
    /// Sends Resume when the previous session is still usable, a fresh
    /// Identify otherwise.
    async fn handshake(&mut self) -> Result<(), TransportError> {
        match self.session.resume_payload(&self.config.token) {
            Some(payload) => {
                self.resuming = true;
                let _ = self.status_tx.send(ConnectionStatus::Resuming);
                tracing::info!(
                    session_id = %payload.session_id,
                    seq = payload.seq,
                    "Resuming gateway session"
                );
                self.transport.send(GatewayFrame::resume(&payload)).await
            }
            None => {
                self.resuming = false;
                self.session.reset();
                let _ = self.status_tx.send(ConnectionStatus::Identifying);
                tracing::info!("Identifying with fresh session");
                self.transport
                    .send(GatewayFrame::identify(&self.config.identify_payload()))
                    .await
            }
        }
    }

    async fn run(
        &mut self,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<RunEnd, GatewayError> {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => return Ok(RunEnd::Shutdown),
                Some(()) = self.missed_rx.recv() => {
                    metrics::record_heartbeat("missed");
                    tracing::warn!("Heartbeat unacknowledged, dropping connection");
                    return Ok(RunEnd::Retry { trigger: "missed_ack", reidentify_pause: false });
                }
                Some(frame) = self.beat_rx.recv() => {
                    metrics::record_heartbeat("sent");
                    if let Err(error) = self.transport.send(frame).await {
                        tracing::warn!(%error, "Failed to send heartbeat");
                        return Ok(RunEnd::Retry { trigger: "transport_error", reidentify_pause: false });
                    }
                }
                received = self.transport.recv() => match received {
                    Ok(TransportEvent::Frame(frame)) => {
                        if let Some(end) = self.handle_frame(frame).await {
                            return end;
                        }
                    }
                    Ok(TransportEvent::Closed { code, reason }) => {
                        return close_outcome(&self.session, code, &reason);
                    }
                    Err(error) => {
                        tracing::warn!(%error, "Gateway transport error");
                        return Ok(RunEnd::Retry { trigger: "transport_error", reidentify_pause: false });
                    }
                },
            }
        }
    }

    /// Reacts to one inbound frame. `Some` ends the connection attempt.
    async fn handle_frame(&mut self, frame: GatewayFrame) -> Option<Result<RunEnd, GatewayError>> {
        match GatewayMessage::classify(frame) {
            GatewayMessage::Dispatch {
                sequence,
                event,
                payload,
            } => {
                self.handle_dispatch(sequence, event, payload);
                None
            }
            GatewayMessage::HeartbeatRequest => {
                // The server may demand an immediate beat.
                metrics::record_heartbeat("sent");
                let beat = GatewayFrame::heartbeat(self.session.sequence());
                if let Err(error) = self.transport.send(beat).await {
                    tracing::warn!(%error, "Failed to answer heartbeat request");
                    return Some(Ok(RunEnd::Retry {
                        trigger: "transport_error",
                        reidentify_pause: false,
                    }));
                }
                None
            }
            GatewayMessage::HeartbeatAck => {
                metrics::record_heartbeat("acked");
                self.heartbeat.ack();
                None
            }
            GatewayMessage::Reconnect => {
                tracing::info!("Server requested reconnect");
                Some(Ok(RunEnd::Retry {
                    trigger: "server_request",
                    reidentify_pause: false,
                }))
            }
            GatewayMessage::InvalidSession { resumable } => {
                tracing::warn!(resumable, "Server invalidated the session");
                if !resumable {
                    self.session.reset();
                }
                Some(Ok(RunEnd::Retry {
                    trigger: "invalid_session",
                    reidentify_pause: !resumable,
                }))
            }
            GatewayMessage::Hello { .. } => {
                tracing::debug!("Ignoring hello after handshake");
                None
            }
            GatewayMessage::Unknown { op } => {
                tracing::debug!(op, "Ignoring unknown gateway opcode");
                None
            }
        }
    }

    fn handle_dispatch(&mut self, sequence: Option<u64>, event: String, payload: Value) {
        if let Some(seq) = sequence {
            if !self.session.observe_sequence(seq) {
                tracing::warn!(
                    seq,
                    current = ?self.session.sequence(),
                    "Ignoring out-of-order sequence"
                );
            }
        }
        metrics::record_gateway_event(&event);

        match event.as_str() {
            EVENT_READY => match serde_json::from_value::<ReadyPayload>(payload.clone()) {
                Ok(ready) => {
                    self.session.establish(ready.session_id.clone());
                    self.mark_ready(ready.session_id, false);
                }
                Err(error) => tracing::warn!(%error, "Malformed ready payload"),
            },
            EVENT_RESUMED => {
                let session_id = self.session.session_id().unwrap_or_default();
                self.mark_ready(session_id, true);
            }
            _ => {
                if !self.ready {
                    // A replayed event confirms the resume went through
                    // even before the explicit resumed notice.
                    let session_id = self.session.session_id().unwrap_or_default();
                    let resumed = self.resuming;
                    self.mark_ready(session_id, resumed);
                }
            }
        }

        self.dispatcher.dispatch(Event {
            name: event,
            payload,
            sequence,
        });
    }

    fn mark_ready(&mut self, session_id: String, resumed: bool) {
        if self.ready {
            return;
        }
        self.ready = true;
        self.backoff.reset();
        tracing::info!(session_id = %session_id, resumed, "Gateway session ready");
        let _ = self.status_tx.send(ConnectionStatus::Ready {
            session_id,
            resumed,
        });
    }
}

/// Maps a close event onto the next action. Codes the server will repeat
/// on every retry are fatal; codes that void the session force a fresh
/// identify; everything else, including a missing code, leaves the
/// session resumable.
fn close_outcome(
    session: &Session,
    code: Option<u16>,
    reason: &str,
) -> Result<RunEnd, GatewayError> {
    if let Some(code) = code {
        return match close_disposition(Some(code)) {
            CloseDisposition::Fatal if code == CLOSE_AUTHENTICATION_FAILED => {
                Err(GatewayError::AuthenticationFailed)
            }
            CloseDisposition::Fatal => Err(GatewayError::FatalClose {
                code,
                reason: reason.to_string(),
            }),
            CloseDisposition::Reidentify => {
                tracing::warn!(code, reason, "Session voided by close code");
                session.invalidate();
                Ok(RunEnd::Retry {
                    trigger: "server_close",
                    reidentify_pause: false,
                })
            }
            CloseDisposition::Resume => {
                tracing::info!(code, reason, "Gateway closed, resume possible");
                Ok(RunEnd::Retry {
                    trigger: "server_close",
                    reidentify_pause: false,
                })
            }
        };
    }

    tracing::info!(reason, "Gateway stream ended");
    Ok(RunEnd::Retry {
        trigger: "transport_error",
        reidentify_pause: false,
    })
}
