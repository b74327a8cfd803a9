//! # Structured Logging
//!
//! Installs a global `tracing` subscriber for applications embedding the
//! shaping engine. The engine itself only emits events; nothing in the crate
//! requires a subscriber to be installed.

use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::error::{ShapingError, ShapingResult};
use crate::observability::config::{LogConfig, LogFormat};

/// Build the filter for `config`; `RUST_LOG` wins when it is set
pub fn build_filter(config: &LogConfig) -> ShapingResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| ShapingError::config(format!("Invalid log level '{}': {}", config.level, e)))
}

/// Install the global subscriber
///
/// Returns `Ok(false)` when a subscriber was already installed, which makes
/// repeated calls (for example from several tests) harmless.
pub fn init_logging(config: &LogConfig) -> ShapingResult<bool> {
    let env_filter = build_filter(config)?;

    let installed = match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()
            .is_ok(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .try_init()
            .is_ok(),
    };

    if installed {
        info!(level = %config.level, format = ?config.format, "Logging initialized");
    } else {
        warn!("Tracing subscriber already initialized, skipping initialization");
    }
    Ok(installed)
}
