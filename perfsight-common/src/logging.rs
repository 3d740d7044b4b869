//! Global `tracing` subscriber setup.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Layer, Registry, fmt};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Error, Result};

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG`, when set and valid, replaces `config.level`. Fails if the level
/// is not a valid filter directive or a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| Error::Tracing(format!("invalid level '{}': {}", config.level, e)))?,
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Text => fmt::layer().with_ansi(config.ansi).boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Tracing(e.to_string()))
}
