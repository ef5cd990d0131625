//! Telemetry and Observability
//!
//! Structured logging setup for the demo binary. Host applications
//! usually install their own subscriber; `init_tracing` backs off
//! instead of panicking when one is already registered.

use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize tracing subscriber
///
/// Respects `RUST_LOG` when set. A subscriber installed earlier by the
/// embedding application wins.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chat_client=debug,tungstenite=warn,reqwest=warn"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let initialized = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok();

    if initialized {
        tracing::info!("Tracing initialized");
    }
}
