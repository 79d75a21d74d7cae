//! Tracing subscriber setup.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Installs a global `fmt` subscriber for `config`.
///
/// `RUST_LOG` takes precedence over `config.level`. Returns `Ok(false)` if a
/// global subscriber was already installed, so tests and embedders can call
/// this more than once.
pub fn init(config: &LoggingConfig) -> Result<bool> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.is_empty() => EnvFilter::try_new(&directives)
            .with_context(|| format!("invalid RUST_LOG directives '{}'", directives))?,
        _ => EnvFilter::try_new(&config.level)
            .with_context(|| format!("invalid log level '{}'", config.level))?,
    };

    let installed = if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    };
    Ok(installed.is_ok())
}

