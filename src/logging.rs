//! Process-wide `tracing` setup.

use crate::config::ConfigError;
use tracing::Level;

/// Parses a `LOGGER_LEVEL` value, case-insensitively.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] for anything but
/// `trace`, `debug`, `info`, `warn` or `error`.
pub fn parse_level(raw: &str) -> Result<Level, ConfigError> {
  match raw.trim().to_ascii_lowercase().as_str() {
    "trace" => Ok(Level::TRACE),
    "debug" => Ok(Level::DEBUG),
    "info" => Ok(Level::INFO),
    "warn" | "warning" => Ok(Level::WARN),
    "error" => Ok(Level::ERROR),
    _ => Err(ConfigError::Invalid {
      name: "LOGGER_LEVEL",
      value: raw.to_string(),
      reason: "expected trace, debug, info, warn or error".to_string(),
    }),
  }
}

/// Installs a formatting subscriber capped at `level`.
///
/// # Errors
///
/// Returns [`ConfigError::Logging`] if a global subscriber is already set.
pub fn init(level: Level) -> Result<(), ConfigError> {
  tracing_subscriber::fmt()
    .with_max_level(level)
    .with_target(false)
    .try_init()
    .map_err(|e| ConfigError::Logging(e.to_string()))
}
