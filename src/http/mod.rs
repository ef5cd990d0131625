//! HTTP Module
//!
//! The REST side of the client: route definitions, the rate limit
//! tracker fed by response headers, the transport seam, and the
//! executor that ties them together.

pub mod executor;
pub mod rate_limit;
pub mod routes;
pub mod transport;

pub use executor::{ApiRequest, RestClient};
pub use rate_limit::RateLimitTracker;
pub use routes::{Method, Route};
pub use transport::{Headers, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
