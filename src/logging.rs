//! Logging setup
//!
//! Level names follow the command line: `trace`, `debug`, `info`,
//! `warning`/`warn`, `error` and `fatal` (an alias for `error`). A `RUST_LOG`
//! environment variable takes precedence over the level passed in.

use crate::error::ConfigurationError;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Map a command-line level name to a tracing level
pub fn parse_log_level(name: &str) -> Result<Level, ConfigurationError> {
    match name.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warning" | "warn" => Ok(Level::WARN),
        "error" | "fatal" => Ok(Level::ERROR),
        _ => Err(ConfigurationError::InvalidLogLevel(name.to_string())),
    }
}

/// Install the global subscriber; later calls are ignored
pub fn init_logging(level: &str) -> Result<(), ConfigurationError> {
    let level = parse_log_level(level)?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("loadgraph={},warn", level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .try_init();
    Ok(())
}
