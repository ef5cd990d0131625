//! Resume bookkeeping for a gateway session.
//!
//! One `Session` is shared between the connection task (which records
//! sequences and session ids) and the heartbeat task (which reads the
//! sequence for every beat). It survives reconnect attempts so the next
//! handshake can decide between Resume and a fresh Identify.

use parking_lot::RwLock;
use std::time::Duration;

use crate::gateway::messages::ResumePayload;

#[derive(Debug, Default)]
struct SessionState {
    session_id: Option<String>,
    sequence: Option<u64>,
    heartbeat_interval: Option<Duration>,
    invalidated: bool,
}

#[derive(Debug, Default)]
pub struct Session {
    state: RwLock<SessionState>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a dispatch sequence. Sequences only ever move forward; a
    /// replayed or reordered lower value is ignored and reported back so
    /// the caller can log it.
    pub fn observe_sequence(&self, sequence: u64) -> bool {
        let mut state = self.state.write();
        match state.sequence {
            Some(current) if sequence <= current => false,
            _ => {
                state.sequence = Some(sequence);
                true
            }
        }
    }

    pub fn sequence(&self) -> Option<u64> {
        self.state.read().sequence
    }

    /// Marks the session established under a fresh id. Clears any
    /// invalidation left over from the previous connection.
    pub fn establish(&self, session_id: String) {
        let mut state = self.state.write();
        state.session_id = Some(session_id);
        state.invalidated = false;
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.read().session_id.clone()
    }

    pub fn set_heartbeat_interval(&self, interval: Duration) {
        self.state.write().heartbeat_interval = Some(interval);
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.state.read().heartbeat_interval
    }

    /// Marks the session non-resumable while keeping its id and sequence
    /// around for logging. The next handshake must re-identify.
    pub fn invalidate(&self) {
        self.state.write().invalidated = true;
    }

    /// Wipes all session state. Called before a fresh Identify so the new
    /// session starts from an empty slate and its low sequence numbers
    /// are not rejected as stale.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.session_id = None;
        state.sequence = None;
        state.invalidated = false;
    }

    pub fn resumable(&self) -> bool {
        let state = self.state.read();
        state.session_id.is_some() && state.sequence.is_some() && !state.invalidated
    }

    /// Builds the Resume payload, or `None` when the session cannot be
    /// resumed.
    pub fn resume_payload(&self, token: &str) -> Option<ResumePayload> {
        let state = self.state.read();
        if state.invalidated {
            return None;
        }
        Some(ResumePayload {
            token: token.to_string(),
            session_id: state.session_id.clone()?,
            seq: state.sequence?,
        })
    }
}
