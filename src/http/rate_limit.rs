//! Client-side rate limit tracking.
//!
//! The server groups routes into buckets and reports bucket state in
//! response headers. The tracker mirrors that state locally so requests
//! wait *before* being sent instead of bouncing off 429s.
//!
//! Claims are made under each bucket's async mutex: a caller that sees
//! `remaining > 0` decrements it in the same critical section, so two
//! concurrent requests can never both spend the last slot. An
//! account-wide block is a single timestamp every request waits out
//! first.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::http::routes::Route;
use crate::http::transport::Headers;
use crate::metrics;

/// Fallback when the server flags a global limit without saying for how
/// long.
const DEFAULT_GLOBAL_RETRY: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Bucket {
    remaining: u32,
    /// Last window size the server reported, restored optimistically
    /// once `reset_at` passes.
    limit: u32,
    reset_at: Instant,
}

#[derive(Default)]
pub struct RateLimitTracker {
    /// Route key -> bucket key, rebound whenever the server moves a
    /// route to a different bucket.
    routes: DashMap<String, String>,
    buckets: DashMap<String, Arc<Mutex<Bucket>>>,
    global_until: RwLock<Option<Instant>>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once it is safe to issue a request for the route: any
    /// global block has expired and the route's bucket (if known) has a
    /// slot left. The slot is claimed before returning.
    pub async fn wait_for(&self, route: &Route) {
        self.wait_global().await;

        let bucket_key = match self.routes.get(&route.key()) {
            Some(entry) => entry.value().clone(),
            None => return, // first call for this route, go optimistically
        };
        let bucket = match self.buckets.get(&bucket_key) {
            Some(entry) => Arc::clone(entry.value()),
            None => return,
        };

        loop {
            let wait_until = {
                let mut state = bucket.lock().await;
                if Instant::now() >= state.reset_at {
                    // Window rolled over without a fresh response yet.
                    state.remaining = state.limit;
                }
                if state.remaining > 0 {
                    state.remaining -= 1;
                    None
                } else {
                    Some(state.reset_at)
                }
            };

            match wait_until {
                None => return,
                Some(reset_at) => {
                    metrics::record_rate_limit_wait("bucket");
                    tracing::debug!(
                        bucket = %bucket_key,
                        delay_ms = reset_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                        "Bucket exhausted, waiting for window reset"
                    );
                    tokio::time::sleep_until(reset_at).await;
                }
            }
        }
    }

    async fn wait_global(&self) {
        loop {
            let blocked_until = *self.global_until.read();
            match blocked_until {
                Some(until) if until > Instant::now() => {
                    metrics::record_rate_limit_wait("global");
                    tracing::debug!(
                        delay_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
                        "Waiting out global rate limit"
                    );
                    tokio::time::sleep_until(until).await;
                }
                _ => return,
            }
        }
    }

    /// Folds one response's headers (and, for 429s, body) into the
    /// tables. Called for every response, success or failure.
    pub async fn record(
        &self,
        route: &Route,
        status: u16,
        headers: &Headers,
        body: Option<&Value>,
    ) {
        if is_global(headers, body) {
            let retry = retry_after(headers, body).unwrap_or(DEFAULT_GLOBAL_RETRY);
            tracing::warn!(
                retry_after_ms = retry.as_millis() as u64,
                "Global rate limit reported"
            );
            *self.global_until.write() = Some(Instant::now() + retry);
            return;
        }

        // No remaining header means the endpoint is unlimited as far as
        // this response is concerned.
        let Some(remaining) = header_u32(headers, "x-ratelimit-remaining") else {
            return;
        };
        let limit = header_u32(headers, "x-ratelimit-limit").unwrap_or_else(|| remaining.max(1));
        let reset_at = Instant::now() + reset_duration(headers).unwrap_or(Duration::ZERO);
        let bucket_key = headers
            .get("x-ratelimit-bucket")
            .map(str::to_string)
            // Endpoints that report limits without a bucket id get a
            // private bucket under their own route key.
            .unwrap_or_else(|| route.key());

        self.routes.insert(route.key(), bucket_key.clone());
        let bucket = self
            .buckets
            .entry(bucket_key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(Bucket {
                    remaining,
                    limit,
                    reset_at,
                }))
            })
            .clone();

        let mut state = bucket.lock().await;
        state.remaining = remaining;
        state.limit = limit;
        state.reset_at = reset_at;

        if status == 429 {
            tracing::warn!(route = %route, "Request was rate limited despite local tracking");
        }
    }

    /// The bucket key currently mapped to a route, if any.
    pub fn bucket_for(&self, route: &Route) -> Option<String> {
        self.routes.get(&route.key()).map(|e| e.value().clone())
    }
}

/// Whether the response flags an account-wide limit.
fn is_global(headers: &Headers, body: Option<&Value>) -> bool {
    headers
        .get("x-ratelimit-global")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
        || body
            .and_then(|b| b.get("global"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
}

/// Server-mandated pause before retrying, from the 429 body or the
/// `Retry-After` header.
pub fn retry_after(headers: &Headers, body: Option<&Value>) -> Option<Duration> {
    body.and_then(|b| b.get("retry_after"))
        .and_then(Value::as_f64)
        .or_else(|| {
            headers
                .get("retry-after")
                .and_then(|v| v.parse::<f64>().ok())
        })
        .map(|seconds| Duration::from_secs_f64(seconds.max(0.0)))
}

/// Time until the window resets. The relative header is preferred; the
/// absolute one is converted against the current wall clock.
fn reset_duration(headers: &Headers) -> Option<Duration> {
    if let Some(after) = header_f64(headers, "x-ratelimit-reset-after") {
        return Some(Duration::from_secs_f64(after.max(0.0)));
    }
    let reset_epoch = header_f64(headers, "x-ratelimit-reset")?;
    let now_epoch = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
    Some(Duration::from_secs_f64((reset_epoch - now_epoch).max(0.0)))
}

fn header_u32(headers: &Headers, name: &str) -> Option<u32> {
    headers.get(name).and_then(|v| v.parse().ok())
}

fn header_f64(headers: &Headers, name: &str) -> Option<f64> {
    headers.get(name).and_then(|v| v.parse().ok())
}
