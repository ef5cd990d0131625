//! Client settings and configuration structures.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all client settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// REST API configuration
    pub api: ApiSettings,

    /// Gateway (websocket) configuration
    pub gateway: GatewaySettings,

    /// Identify properties sent during the gateway handshake
    pub identify: IdentifySettings,

    /// Auth token (usually supplied via CHAT_TOKEN)
    #[serde(default)]
    pub token: Option<String>,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// REST API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    /// Base URL the route paths are appended to (e.g., ".../api/v1")
    pub base_url: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Retries spent on 429 responses before giving up
    pub max_retries: u32,
}

/// Gateway connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    /// Websocket URL of the gateway endpoint
    pub url: String,

    /// Timeout for establishing the websocket in seconds
    pub connect_timeout_secs: u64,

    /// Timeout for the server's Hello after connecting, in seconds
    pub hello_timeout_secs: u64,

    /// First reconnect delay in milliseconds
    pub reconnect_base_ms: u64,

    /// Reconnect delay ceiling in milliseconds
    pub reconnect_max_ms: u64,

    /// Ask the server for compressed frames
    pub compress: bool,

    /// Event group subscription mask; absent means everything
    #[serde(default)]
    pub intents: Option<u64>,
}

/// Identify properties describing this client to the server.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentifySettings {
    /// Operating system reported in the handshake
    pub os: String,

    /// Library/browser name reported in the handshake
    pub browser: String,

    /// Device name reported in the handshake
    pub device: String,
}

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if the reconnect delays are inconsistent.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        // Determine the running environment
        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("api.base_url", "http://localhost:3000/api/v1")?
            .set_default("api.request_timeout_secs", 30)?
            .set_default("api.max_retries", 3)?
            .set_default("gateway.url", "ws://localhost:3000/gateway")?
            .set_default("gateway.connect_timeout_secs", 10)?
            .set_default("gateway.hello_timeout_secs", 10)?
            .set_default("gateway.reconnect_base_ms", 1000)?
            .set_default("gateway.reconnect_max_ms", 60000)?
            .set_default("gateway.compress", false)?
            .set_default("identify.os", std::env::consts::OS)?
            .set_default("identify.browser", "chat-client")?
            .set_default("identify.device", "chat-client")?
            // Load from config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Load from environment variables
            // APP__GATEWAY__URL=ws://... -> gateway.url = ws://...
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            // Map simple environment variables
            .set_override_option("api.base_url", std::env::var("CHAT_API_URL").ok())?
            .set_override_option("gateway.url", std::env::var("CHAT_GATEWAY_URL").ok())?
            .set_override_option("token", std::env::var("CHAT_TOKEN").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| {
                // An inverted delay range would make the backoff shrink
                if settings.gateway.reconnect_base_ms > settings.gateway.reconnect_max_ms {
                    return Err(ConfigError::Message(format!(
                        "gateway.reconnect_base_ms ({}) must not exceed gateway.reconnect_max_ms ({})",
                        settings.gateway.reconnect_base_ms, settings.gateway.reconnect_max_ms
                    )));
                }
                Ok(settings)
            })
    }
}

impl ApiSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl GatewaySettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn hello_timeout(&self) -> Duration {
        Duration::from_secs(self.hello_timeout_secs)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}
