//! Tracing setup for the CLI
//!
//! `RUST_LOG` wins when set; otherwise `--verbose` picks between info and debug
//! for the wallbox crates.

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("failed to parse env filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),
}

pub fn default_directive(verbose: bool) -> String {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    format!("wallbox_ble={level},wallbox_ble_controller={level},wallbox_proto={level}")
}

pub fn init(verbose: bool) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive(verbose))?,
    };

    let layer = fmt::layer().compact().with_target(verbose).without_time();
    let subscriber = tracing_subscriber::registry().with(filter).with(layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
