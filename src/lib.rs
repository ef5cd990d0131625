//! # Chat Client Library
//!
//! This crate provides a Discord-compatible chat client core with:
//! - A persistent WebSocket gateway connection (identify, heartbeat,
//!   resume, reconnect with backoff)
//! - Event dispatch to registered listeners
//! - Rate-governed RESTful API access driven by server bucket headers
//! - An in-memory entity cache kept warm by gateway events
//!
//! ## Module Structure
//!
//! ```text
//! chat_client/
//! +-- client/        Client facade (connect, on, request, close)
//! +-- config/        Configuration management
//! +-- gateway/       Connection, heartbeat, session, dispatch
//! +-- http/          Routes, rate limiting, request execution
//! +-- cache/         Entity tables fed by dispatched events
//! +-- shared/        Common utilities (errors, snowflake IDs)
//! +-- metrics/       Prometheus counters and histograms
//! ```

// Client facade
pub mod client;

// Configuration module
pub mod config;

// Gateway connection and event dispatch
pub mod gateway;

// REST execution and rate limiting
pub mod http;

// Entity cache fed by gateway events
pub mod cache;

// Shared utilities
pub mod shared;

// Prometheus metrics
pub mod metrics;

// Telemetry and observability
pub mod telemetry;

pub use client::{Client, ClientBuilder};
pub use gateway::{ConnectionStatus, Event, ListenerHandle};
pub use http::{ApiRequest, Route};
pub use shared::error::{ApiError, GatewayError, TransportError};
pub use shared::snowflake::Snowflake;
