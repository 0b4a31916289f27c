//! Structured JSON logging setup using tracing.
//!
//! The engine itself only emits `tracing` events with `source_id`, `stage`
//! and error fields. Hosts that do not install their own subscriber can call
//! [`init_logging`].

use thiserror::Error;
use tracing_subscriber::{
    filter::ParseError, fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError,
    EnvFilter,
};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("Failed to install log subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Install a JSON subscriber on the global registry.
///
/// `RUST_LOG` takes precedence over `filter` (e.g. `"info,dirsync_engine=debug"`).
/// Fails if a global subscriber is already installed.
pub fn init_logging(filter: &str) -> Result<(), LoggingError> {
    let filter_layer = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(filter)?,
    };

    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter_layer)
        .try_init()?;

    tracing::info!(filter = %filter, "Logging initialized");
    Ok(())
}

/// Initialize logging for tests (with simpler output).
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_test_logging_does_not_panic() {
        init_test_logging();
        init_test_logging();
    }

    #[test]
    fn test_second_init_is_an_error() {
        init_test_logging();
        assert!(matches!(init_logging("info"), Err(LoggingError::Init(_))));
    }
}
