//! Tracing subscriber setup

use crate::config::ObservabilityConfig;
use crate::errors::{AppError, Result};
use tracing_subscriber::EnvFilter;

const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "warning", "error"];

/// Normalize a configured log level, rejecting unknown names
pub fn parse_level(level: &str) -> Result<&'static str> {
    let lower = level.trim().to_ascii_lowercase();
    match LEVELS.iter().find(|l| **l == lower) {
        Some(&"warning") => Ok("warn"),
        Some(l) => Ok(*l),
        None => Err(AppError::Configuration {
            message: format!("incompatible log level: {}", level),
        }),
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let level = parse_level(&config.log_level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json_logging {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };

    installed.map_err(|e| AppError::Configuration {
        message: format!("failed to install tracing subscriber: {}", e),
    })
}
