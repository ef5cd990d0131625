//! Reconnect pacing: exponential backoff between failed connection
//! attempts and the mandatory pause before a fresh identify.

use rand::Rng;
use std::time::Duration;

const MULTIPLIER: f64 = 2.0;
const JITTER_FACTOR: f64 = 0.25;

/// Bounds for the forced delay before re-identifying after the server
/// invalidates a session. Spreads simultaneous re-identifies out instead
/// of hammering the gateway in lockstep.
const REIDENTIFY_MIN_MS: u64 = 1_000;
const REIDENTIFY_MAX_MS: u64 = 5_000;

#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Next delay: `base * MULTIPLIER^attempt`, capped at `max`, with
    /// ±25% jitter, never below `base`.
    pub fn next_delay(&mut self) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let raw = base_ms * MULTIPLIER.powi(self.attempt as i32);
        let capped = raw.min(self.max.as_millis() as f64);

        let jitter_range = capped * JITTER_FACTOR;
        let jitter = rand::rng().random_range(-1.0..1.0) * jitter_range;
        let delay_ms = (capped + jitter).max(base_ms);

        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(delay_ms as u64)
    }

    /// Forgets accumulated failures. Called once a connection reaches
    /// Ready.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Random pause before re-identifying with a cleared session.
pub fn reidentify_delay() -> Duration {
    Duration::from_millis(rand::rng().random_range(REIDENTIFY_MIN_MS..REIDENTIFY_MAX_MS))
}
