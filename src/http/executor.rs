//! Rate-governed request execution.
//!
//! [`RestClient`] is the single funnel for REST traffic: every call
//! waits out the local rate limit state, performs the round trip, folds
//! the response headers back into the tracker, and retries 429s against
//! a bounded budget. Callers see either a decoded body or an
//! [`ApiError`]; they never see a 429 that still has budget behind it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::http::rate_limit::{retry_after, RateLimitTracker};
use crate::http::routes::Route;
use crate::http::transport::{Headers, HttpRequest, HttpTransport};
use crate::metrics;
use crate::shared::error::{ApiError, ErrorBody};

/// Retries after the initial attempt, all spent on 429s.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Pause before retrying a 429 that carried no delay of its own.
const FALLBACK_RETRY: Duration = Duration::from_secs(1);

const USER_AGENT: &str = concat!("chat-client/", env!("CARGO_PKG_VERSION"));

/// One REST call, ready to hand to [`RestClient::request`].
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub route: Route,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(route: Route) -> Self {
        Self { route, body: None }
    }

    pub fn with_body(route: Route, body: Value) -> Self {
        Self {
            route,
            body: Some(body),
        }
    }
}

pub struct RestClient {
    transport: Arc<dyn HttpTransport>,
    tracker: RateLimitTracker,
    base_url: String,
    token: String,
    max_retries: u32,
}

impl RestClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            tracker: RateLimitTracker::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Issue a request, waiting for rate limit clearance first.
    ///
    /// 429 responses are absorbed up to the retry budget: the client
    /// sleeps out the server-mandated delay and reissues the request.
    /// Every other non-success status maps to [`ApiError::Api`] without
    /// a retry.
    pub async fn request(&self, request: ApiRequest) -> Result<Option<Value>, ApiError> {
        let route = &request.route;
        let mut attempt: u32 = 0;

        loop {
            self.tracker.wait_for(route).await;

            let started = std::time::Instant::now();
            let response = self
                .transport
                .perform(self.build(route, request.body.clone()))
                .await?;
            let elapsed = started.elapsed().as_secs_f64();

            self.tracker
                .record(route, response.status, &response.headers, response.body.as_ref())
                .await;
            metrics::record_rest_request(
                route.method().as_str(),
                route.template(),
                response.status,
                elapsed,
            );

            if response.status == 429 {
                let retry =
                    retry_after(&response.headers, response.body.as_ref()).unwrap_or(FALLBACK_RETRY);
                if attempt >= self.max_retries {
                    tracing::warn!(route = %route, attempt, "Rate limit retry budget exhausted");
                    return Err(ApiError::RateLimited { retry_after: retry });
                }
                attempt += 1;
                tracing::warn!(
                    route = %route,
                    attempt,
                    retry_after_ms = retry.as_millis() as u64,
                    "Rate limited, retrying after server delay"
                );
                tokio::time::sleep(retry).await;
                continue;
            }

            tracing::debug!(
                method = %route.method(),
                path = %route.path(),
                status = response.status,
                "REST request completed"
            );

            if response.is_success() {
                return Ok(normalize_body(response.status, response.body));
            }
            return Err(ApiError::Api {
                status: response.status,
                error: ErrorBody::from_value(response.body.as_ref()),
            });
        }
    }

    fn build(&self, route: &Route, body: Option<Value>) -> HttpRequest {
        let mut headers = Headers::new();
        headers.insert("authorization", format!("Bearer {}", self.token));
        headers.insert("user-agent", USER_AGENT);
        HttpRequest {
            method: route.method(),
            url: format!("{}{}", self.base_url, route.path()),
            headers,
            body,
        }
    }
}

/// 204 and bodiless 2xx responses come back as `None`.
fn normalize_body(status: u16, body: Option<Value>) -> Option<Value> {
    if status == 204 {
        return None;
    }
    match body {
        Some(Value::Null) | None => None,
        decoded => decoded,
    }
}
