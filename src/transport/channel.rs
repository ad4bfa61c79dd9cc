use super::{Acker, Delivery, Transport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

/// A message the coordinator published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
  /// Routing tag it was written under.
  pub tag: String,
  /// Raw message bytes.
  pub body: Bytes,
}

struct ChannelAcker(oneshot::Sender<()>);

#[async_trait]
impl Acker for ChannelAcker {
  async fn ack(self: Box<Self>) -> Result<(), TransportError> {
    // The peer may have stopped waiting; the ack itself still succeeded.
    let _ = self.0.send(());
    Ok(())
  }
}

/// In-process transport, driven through a [`ChannelPeer`].
#[derive(Debug)]
pub struct ChannelTransport {
  inbound: mpsc::Receiver<Delivery>,
  outbound: mpsc::UnboundedSender<Published>,
}

/// Test side of a [`ChannelTransport`].
#[derive(Debug)]
pub struct ChannelPeer {
  inbound: mpsc::Sender<Delivery>,
  published: mpsc::UnboundedReceiver<Published>,
}

impl ChannelTransport {
  /// Creates a transport and its peer with room for `capacity` unread
  /// deliveries.
  pub fn pair(capacity: usize) -> (ChannelTransport, ChannelPeer) {
    let (in_tx, in_rx) = mpsc::channel(capacity.max(1));
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    (
      ChannelTransport {
        inbound: in_rx,
        outbound: out_tx,
      },
      ChannelPeer {
        inbound: in_tx,
        published: out_rx,
      },
    )
  }
}

#[async_trait]
impl Transport for ChannelTransport {
  async fn next_delivery(&mut self) -> Option<Result<Delivery, TransportError>> {
    self.inbound.recv().await.map(Ok)
  }

  async fn write(&self, body: Bytes, tag: &str) -> Result<(), TransportError> {
    self
      .outbound
      .send(Published {
        tag: tag.to_string(),
        body,
      })
      .map_err(|_| TransportError::Closed("published receiver dropped".to_string()))
  }

  async fn close(&mut self) -> Result<(), TransportError> {
    self.inbound.close();
    Ok(())
  }
}

impl ChannelPeer {
  /// Hands `body` to the coordinator. The returned receiver resolves once
  /// the delivery is acknowledged, or errors if it is dropped unacked.
  ///
  /// # Errors
  ///
  /// Returns [`TransportError::Closed`] if the transport was dropped or
  /// closed.
  pub async fn deliver(&self, body: impl Into<Bytes>) -> Result<oneshot::Receiver<()>, TransportError> {
    let (tx, rx) = oneshot::channel();
    let delivery = Delivery::new(body.into(), Box::new(ChannelAcker(tx)));
    self
      .inbound
      .send(delivery)
      .await
      .map_err(|_| TransportError::Closed("transport dropped".to_string()))?;
    Ok(rx)
  }

  /// Waits for the next published message.
  pub async fn next_published(&mut self) -> Option<Published> {
    self.published.recv().await
  }

  /// Returns a published message if one is already queued.
  pub fn try_published(&mut self) -> Option<Published> {
    self.published.try_recv().ok()
  }

  /// Ends the inbound stream once queued deliveries are consumed.
  pub fn finish(self) -> mpsc::UnboundedReceiver<Published> {
    self.published
  }
}
