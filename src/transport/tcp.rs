//! Length-delimited TCP transport.
//!
//! Upstream nodes connect to the bound address and send each wire frame as
//! one length-delimited record. Acknowledging a delivery writes a single
//! [`ACK_BYTE`] record back on the connection the frame arrived on, so acks
//! reach each sender in the order its frames were processed.
//!
//! Outbound routes map a routing tag to a peer address. Connections are
//! opened lazily on first write and dropped on error; the failing write is
//! reported to the caller and the next write reconnects.

use super::{Acker, Delivery, Transport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Record written back to acknowledge one delivery.
pub const ACK_BYTE: u8 = 0x06;

const INBOUND_BUFFER: usize = 64;

/// Configuration for [`TcpTransport`].
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
  /// Address to listen on for inbound frames.
  pub bind_address: String,
  /// Routing tag to peer address.
  pub routes: HashMap<String, String>,
}

impl Default for TcpTransportConfig {
  fn default() -> Self {
    Self {
      bind_address: "0.0.0.0:7000".to_string(),
      routes: HashMap::new(),
    }
  }
}

impl TcpTransportConfig {
  /// Sets the listen address.
  #[must_use]
  pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
    self.bind_address = address.into();
    self
  }

  /// Adds an outbound route.
  #[must_use]
  pub fn with_route(mut self, tag: impl Into<String>, address: impl Into<String>) -> Self {
    self.routes.insert(tag.into(), address.into());
    self
  }
}

type Outbound = FramedWrite<TcpStream, LengthDelimitedCodec>;

struct TcpAcker(mpsc::UnboundedSender<()>);

#[async_trait]
impl Acker for TcpAcker {
  async fn ack(self: Box<Self>) -> Result<(), TransportError> {
    self
      .0
      .send(())
      .map_err(|_| TransportError::Closed("sender connection is gone".to_string()))
  }
}

/// TCP-backed [`Transport`].
pub struct TcpTransport {
  local_addr: SocketAddr,
  inbound: mpsc::Receiver<Delivery>,
  routes: HashMap<String, String>,
  outbound: Mutex<HashMap<String, Outbound>>,
  accept_task: JoinHandle<()>,
  shutdown: CancellationToken,
}

impl std::fmt::Debug for TcpTransport {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TcpTransport")
      .field("local_addr", &self.local_addr)
      .field("routes", &self.routes)
      .finish_non_exhaustive()
  }
}

impl TcpTransport {
  /// Binds the listener and starts accepting upstream connections.
  ///
  /// # Errors
  ///
  /// Returns [`TransportError::Io`] if the address cannot be bound.
  pub async fn bind(config: TcpTransportConfig) -> Result<Self, TransportError> {
    let listener = TcpListener::bind(&config.bind_address).await?;
    let local_addr = listener.local_addr()?;
    info!(address = %local_addr, routes = config.routes.len(), "tcp transport listening");

    let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
    let shutdown = CancellationToken::new();
    let accept_task = tokio::spawn(accept_loop(listener, tx, shutdown.clone()));

    Ok(Self {
      local_addr,
      inbound: rx,
      routes: config.routes,
      outbound: Mutex::new(HashMap::new()),
      accept_task,
      shutdown,
    })
  }

  /// Address the listener is bound to.
  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<Delivery>, shutdown: CancellationToken) {
  loop {
    tokio::select! {
      _ = shutdown.cancelled() => break,
      accepted = listener.accept() => match accepted {
        Ok((stream, peer)) => {
          debug!(peer = %peer, "upstream connected");
          tokio::spawn(serve_connection(stream, peer, tx.clone(), shutdown.child_token()));
        }
        Err(e) => warn!(error = %e, "failed to accept connection"),
      },
    }
  }
}

async fn serve_connection(
  stream: TcpStream,
  peer: SocketAddr,
  tx: mpsc::Sender<Delivery>,
  shutdown: CancellationToken,
) {
  let (read_half, write_half) = stream.into_split();
  let mut frames = FramedRead::new(read_half, LengthDelimitedCodec::new());

  let (ack_tx, ack_rx) = mpsc::unbounded_channel();
  let acks = FramedWrite::new(write_half, LengthDelimitedCodec::new());
  let writer = tokio::spawn(write_acks(acks, ack_rx));

  loop {
    let frame = tokio::select! {
      _ = shutdown.cancelled() => break,
      frame = frames.next() => frame,
    };
    match frame {
      Some(Ok(body)) => {
        let delivery = Delivery::new(body.freeze(), Box::new(TcpAcker(ack_tx.clone())));
        if tx.send(delivery).await.is_err() {
          break;
        }
      }
      Some(Err(e)) => {
        warn!(peer = %peer, error = %e, "dropping upstream connection");
        break;
      }
      None => {
        debug!(peer = %peer, "upstream disconnected");
        break;
      }
    }
  }

  // Pending deliveries still hold ack senders; the writer drains them and
  // exits once the last one is dropped.
  drop(ack_tx);
  let _ = writer.await;
}

async fn write_acks(
  mut sink: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
  mut acks: mpsc::UnboundedReceiver<()>,
) {
  while acks.recv().await.is_some() {
    if let Err(e) = sink.send(Bytes::from_static(&[ACK_BYTE])).await {
      warn!(error = %e, "failed to write ack");
      break;
    }
  }
}

#[async_trait]
impl Transport for TcpTransport {
  async fn next_delivery(&mut self) -> Option<Result<Delivery, TransportError>> {
    self.inbound.recv().await.map(Ok)
  }

  async fn write(&self, body: Bytes, tag: &str) -> Result<(), TransportError> {
    let address = self
      .routes
      .get(tag)
      .ok_or_else(|| TransportError::UnknownTag(tag.to_string()))?;

    let mut outbound = self.outbound.lock().await;
    if !outbound.contains_key(tag) {
      let stream = TcpStream::connect(address).await?;
      debug!(tag, address = %address, "connected downstream route");
      outbound.insert(tag.to_string(), FramedWrite::new(stream, LengthDelimitedCodec::new()));
    }
    let Some(sink) = outbound.get_mut(tag) else {
      return Err(TransportError::UnknownTag(tag.to_string()));
    };
    if let Err(e) = sink.send(body).await {
      outbound.remove(tag);
      return Err(e.into());
    }
    Ok(())
  }

  async fn close(&mut self) -> Result<(), TransportError> {
    self.shutdown.cancel();
    self.inbound.close();
    let mut outbound = self.outbound.lock().await;
    for (tag, mut sink) in outbound.drain() {
      if let Err(e) = SinkExt::<Bytes>::close(&mut sink).await {
        warn!(tag = %tag, error = %e, "failed to close downstream route");
      }
    }
    info!(address = %self.local_addr, "tcp transport closed");
    Ok(())
  }
}

impl Drop for TcpTransport {
  fn drop(&mut self) {
    self.shutdown.cancel();
    self.accept_task.abort();
  }
}
