//! Telemetry module
//!
//! Structured logging setup

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::TelemetryConfig;

/// Initialize all telemetry subsystems
///
/// The configured level seeds the filter; a `RUST_LOG` environment variable
/// overrides it when present.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;

    Ok(())
}
