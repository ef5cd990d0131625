//! # Configuration Module
//!
//! Layered settings for the client: gateway endpoint and reconnect policy,
//! REST base URL and retry budget, identify properties.
//!
//! Sources, later ones winning:
//! - config/default.toml, then config/{RUN_ENV}.toml
//! - environment variables with the APP__ prefix (e.g. APP__GATEWAY__URL)
//! - the CHAT_TOKEN / CHAT_GATEWAY_URL / CHAT_API_URL shortcuts
//!
//! A .env file is honored when present (via dotenvy).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chat_client::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Gateway endpoint: {}", settings.gateway.url);
//! ```

mod settings;

pub use settings::*;
