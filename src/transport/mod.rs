//! # Transport
//!
//! The coordinator talks to the message broker through the [`Transport`]
//! trait: an at-least-once stream of inbound [`Delivery`] values, each of
//! which must be acknowledged explicitly, and a tagged publish operation.
//!
//! Two implementations ship with the crate:
//!
//! - [`ChannelTransport`]: in-process, backed by tokio channels. Used by
//!   tests and when embedding a coordinator next to its producers.
//! - [`TcpTransport`]: length-delimited frames over TCP, used by the
//!   `coordinator` binary.
//!
//! A delivery that is dropped without [`Delivery::ack`] is treated as
//! unprocessed by the peer and will be redelivered.

mod channel;
mod tcp;

pub use channel::{ChannelPeer, ChannelTransport, Published};
pub use tcp::{ACK_BYTE, TcpTransport, TcpTransportConfig};

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Error type for transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
  /// The inbound stream or the outbound side was closed.
  #[error("transport closed: {0}")]
  Closed(String),
  /// Socket or stream error.
  #[error("transport io error: {0}")]
  Io(#[from] std::io::Error),
  /// No outbound route exists for the routing tag.
  #[error("no route for tag {0:?}")]
  UnknownTag(String),
}

/// Acknowledges a single delivery to its sender.
#[async_trait]
pub trait Acker: Send + Sync {
  /// Confirms the delivery was processed.
  async fn ack(self: Box<Self>) -> Result<(), TransportError>;
}

/// One inbound message awaiting acknowledgement.
pub struct Delivery {
  body: Bytes,
  acker: Box<dyn Acker>,
}

impl Delivery {
  /// Pairs a body with the handle that acknowledges it.
  pub fn new(body: Bytes, acker: Box<dyn Acker>) -> Self {
    Self { body, acker }
  }

  /// Returns the raw message bytes.
  pub fn body(&self) -> &Bytes {
    &self.body
  }

  /// Acknowledges the delivery, consuming it.
  ///
  /// # Errors
  ///
  /// Returns a [`TransportError`] if the acknowledgement cannot be sent.
  pub async fn ack(self) -> Result<(), TransportError> {
    self.acker.ack().await
  }
}

impl fmt::Debug for Delivery {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Delivery")
      .field("len", &self.body.len())
      .finish_non_exhaustive()
  }
}

/// Broker connection owned by a coordinator.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Waits for the next delivery. `None` means the inbound stream ended.
  async fn next_delivery(&mut self) -> Option<Result<Delivery, TransportError>>;

  /// Publishes `body` under the routing `tag`.
  async fn write(&self, body: Bytes, tag: &str) -> Result<(), TransportError>;

  /// Releases the connection. Further calls may fail.
  async fn close(&mut self) -> Result<(), TransportError>;
}
