//! # Coordinator Errors
//!
//! Top-level error for the coordinator. Every module owns its own error
//! enum; this type wraps them so a controller run returns one error kind.
//!
//! ## Failure classes
//!
//! - **Protocol**: a delivery did not decode. Fatal to the run loop.
//! - **Persistence**: the log could not be read, validated or committed.
//!   Fatal at startup and on commit.
//! - **Transport**: the broker connection failed. Propagated, no retry.
//! - **Config**: invalid settings. Reported before any message is consumed.
//!
//! Duplicate deliveries are not errors; they are acknowledged and dropped.

use crate::config::ConfigError;
use crate::persistence::PersistenceError;
use crate::protocol::{MessageKind, ProtocolError};
use crate::transport::TransportError;
use thiserror::Error;

/// Error returned by coordinator operations.
#[derive(Error, Debug)]
pub enum CoordinatorError {
  /// A delivery could not be decoded.
  #[error("couldn't decode delivery: {0}")]
  Protocol(#[from] ProtocolError),
  /// The transaction log failed.
  #[error("transaction log error: {0}")]
  Persistence(#[from] PersistenceError),
  /// The broker connection failed.
  #[error("transport error: {0}")]
  Transport(#[from] TransportError),
  /// Configuration was rejected.
  #[error("configuration error: {0}")]
  Config(#[from] ConfigError),
  /// A frame other than END reached the coordinator.
  #[error("coordinator received an unexpected {0}")]
  UnexpectedKind(MessageKind),
}

impl CoordinatorError {
  /// Returns true if the error was caused by persisted state, in which case
  /// restarting will not help without operator action.
  pub fn is_corruption(&self) -> bool {
    matches!(
      self,
      CoordinatorError::Persistence(
        PersistenceError::Corrupted { .. }
          | PersistenceError::Truncated(_)
          | PersistenceError::TrailingBytes(_)
          | PersistenceError::Serialization(_)
      )
    )
  }
}
