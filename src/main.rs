//! # Chat Client
//!
//! A Discord-compatible chat client demo binary.
//!
//! Connects to the configured gateway, logs every dispatched event and
//! keeps the connection alive (heartbeats, resumes, reconnects) until
//! Ctrl-C.

use anyhow::{Context, Result};
use tracing::info;

use chat_client::config::Settings;
use chat_client::ClientBuilder;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    chat_client::telemetry::init_tracing();

    info!("Starting Chat Client...");

    // Load configuration from environment and config files
    let settings = Settings::load()?;
    info!(
        gateway = %settings.gateway.url,
        api = %settings.api.base_url,
        environment = %settings.environment,
        "Configuration loaded"
    );

    let token = settings
        .token
        .clone()
        .context("no auth token configured; set CHAT_TOKEN")?;

    let mut client = ClientBuilder::from_settings(&settings, token).build()?;

    client.on("MESSAGE_CREATE", |event| async move {
        let author = event
            .payload
            .pointer("/author/username")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let content = event
            .payload
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        info!(author = %author, content = %content, "Message received");
        Ok(())
    });

    client.connect().await?;
    info!("Connected; waiting for events (Ctrl-C to exit)");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    client.close().await;

    Ok(())
}
