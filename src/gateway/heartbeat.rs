//! Keep-alive loop for the gateway connection.
//!
//! The loop runs as its own task. It pushes heartbeat frames into the
//! connection's outbound channel on a jittered schedule and watches for
//! the acknowledgement the connection records via [`Heartbeat::ack`]. A
//! beat that was never acknowledged by the time the next one is due marks
//! the link as dead: the loop emits one missed-ack notice and exits so
//! the connection can reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};

use crate::gateway::messages::GatewayFrame;
use crate::gateway::session::Session;

/// Scheduled beats fire this much ahead of the server's interval so a
/// beat is never late by one scheduling quantum.
const MAX_SAFETY_MARGIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug)]
pub struct Heartbeat {
    state: HeartbeatState,
    awaiting_ack: Arc<AtomicBool>,
    stop_tx: Option<watch::Sender<bool>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            state: HeartbeatState::Idle,
            awaiting_ack: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
        }
    }

    /// Spawns the loop with the interval announced by Hello. The first
    /// beat goes out after a uniform random fraction of the interval so a
    /// fleet of clients identifying together does not beat in lockstep.
    pub fn start(
        &mut self,
        interval: Duration,
        session: Arc<Session>,
        outbound: mpsc::UnboundedSender<GatewayFrame>,
        missed: mpsc::UnboundedSender<()>,
    ) {
        if self.state != HeartbeatState::Idle {
            tracing::warn!(state = ?self.state, "Heartbeat loop already started, ignoring");
            return;
        }

        let initial_delay = apply_jitter(interval, rand::rng().random_range(0.0..1.0));
        self.spawn_loop(initial_delay, cadence(interval), session, outbound, missed);
    }

    fn spawn_loop(
        &mut self,
        initial_delay: Duration,
        beat_every: Duration,
        session: Arc<Session>,
        outbound: mpsc::UnboundedSender<GatewayFrame>,
        missed: mpsc::UnboundedSender<()>,
    ) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let awaiting_ack = Arc::clone(&self.awaiting_ack);
        awaiting_ack.store(false, Ordering::SeqCst);

        tokio::spawn(run(
            initial_delay,
            beat_every,
            session,
            awaiting_ack,
            outbound,
            missed,
            stop_rx,
        ));

        self.stop_tx = Some(stop_tx);
        self.state = HeartbeatState::Running;
    }

    /// Records the server's acknowledgement of the latest beat.
    pub fn ack(&self) {
        self.awaiting_ack.store(false, Ordering::SeqCst);
    }

    /// Stops the loop. Takes effect at the task's next poll; no final
    /// frame is sent. Dropping the handle has the same effect.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if self.state == HeartbeatState::Running {
            self.state = HeartbeatState::Stopped;
        }
    }

    pub fn state(&self) -> HeartbeatState {
        self.state
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

async fn run(
    initial_delay: Duration,
    beat_every: Duration,
    session: Arc<Session>,
    awaiting_ack: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<GatewayFrame>,
    missed: mpsc::UnboundedSender<()>,
    mut stop: watch::Receiver<bool>,
) {
    // Biased so a stop signal beats an already-elapsed timer and no
    // frame goes out after stop() returns.
    tokio::select! {
        biased;
        _ = stop.changed() => return,
        _ = tokio::time::sleep(initial_delay) => {}
    }

    loop {
        if awaiting_ack.swap(true, Ordering::SeqCst) {
            tracing::warn!("Heartbeat went unacknowledged for a full interval");
            let _ = missed.send(());
            return;
        }

        let frame = GatewayFrame::heartbeat(session.sequence());
        if outbound.send(frame).is_err() {
            return;
        }
        tracing::trace!(sequence = ?session.sequence(), "Heartbeat sent");

        tokio::select! {
            biased;
            _ = stop.changed() => return,
            _ = tokio::time::sleep(beat_every) => {}
        }
    }
}

/// Initial-delay jitter: a fraction in `[0, 1)` of the interval, so the
/// first beat lands strictly before one full interval has passed.
fn apply_jitter(interval: Duration, fraction: f64) -> Duration {
    interval.mul_f64(fraction.clamp(0.0, 0.999_999))
}

/// Steady-state cadence: the server interval minus a small safety margin.
fn cadence(interval: Duration) -> Duration {
    let margin = MAX_SAFETY_MARGIN.min(interval / 10);
    interval.saturating_sub(margin).max(Duration::from_millis(1))
}
