use super::{recovery, resource_for};
use crate::barrier::{Admission, EndBarrierState, Resource};
use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::persistence::{EntryKind, TransactionLog};
use crate::protocol::{Frame, MessageHeader, MessageKind};
use crate::transport::{Delivery, Transport, TransportError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What handling one END did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
  /// The END was already propagated for this client; dropped.
  AlreadySent,
  /// No state change: a repeated report or an unknown node.
  Ignored,
  /// The report was recorded and checkpointed; the barrier is still open.
  Recorded,
  /// The barrier drained and one END was published.
  Propagated,
  /// Cancelled during the grace delay; nothing was published.
  Interrupted,
}

/// Drives one barrier from a transport and checkpoints it to a log.
///
/// All mutation happens on the task calling [`CoordinatorController::run`];
/// one delivery is fully handled before the next is read.
pub struct CoordinatorController<T: Transport> {
  config: CoordinatorConfig,
  state: EndBarrierState,
  log: TransactionLog,
  transport: T,
}

impl<T: Transport> std::fmt::Debug for CoordinatorController<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CoordinatorController")
      .field("config", &self.config)
      .field("state", &self.state)
      .finish_non_exhaustive()
  }
}

impl<T: Transport> CoordinatorController<T> {
  /// Validates `config`, restores state from its log and takes ownership of
  /// `transport`.
  ///
  /// # Errors
  ///
  /// Returns [`CoordinatorError::Config`] for invalid settings and
  /// [`CoordinatorError::Persistence`] if the log cannot be restored.
  pub fn recover(config: CoordinatorConfig, transport: T) -> Result<Self, CoordinatorError> {
    config.validate()?;
    let (state, log) = recovery::reload(&config.log_path, config.expected_nodes)?;
    info!(
      variant = ?config.variant,
      expected_nodes = config.expected_nodes,
      node_id = config.node_id,
      "coordinator ready"
    );
    Ok(Self {
      config,
      state,
      log,
      transport,
    })
  }

  /// Current barrier state.
  pub fn state(&self) -> &EndBarrierState {
    &self.state
  }

  /// Transaction log backing the barrier.
  pub fn log(&self) -> &TransactionLog {
    &self.log
  }

  /// Active configuration.
  pub fn config(&self) -> &CoordinatorConfig {
    &self.config
  }

  /// Consumes deliveries until `cancel` fires or an error occurs.
  ///
  /// Cancellation returns `Ok(())`; state committed so far stays on disk.
  ///
  /// # Errors
  ///
  /// Returns the first decode, persistence or transport error, or
  /// [`TransportError::Closed`] if the inbound stream ends.
  pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), CoordinatorError> {
    loop {
      let next = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          info!("coordinator cancelled");
          return Ok(());
        }
        next = self.transport.next_delivery() => next,
      };

      let delivery = match next {
        Some(Ok(delivery)) => delivery,
        Some(Err(e)) => {
          error!(error = %e, "couldn't receive delivery");
          return Err(e.into());
        }
        None => {
          error!("inbound stream ended");
          return Err(TransportError::Closed("inbound stream ended".to_string()).into());
        }
      };

      if self.handle_delivery(delivery, &cancel).await? == Step::Interrupted {
        info!("coordinator cancelled during grace delay");
        return Ok(());
      }
    }
  }

  /// Decodes and processes one delivery, acknowledging it once its effects
  /// are durable.
  ///
  /// # Errors
  ///
  /// Returns [`CoordinatorError::Protocol`] if the body does not decode and
  /// [`CoordinatorError::UnexpectedKind`] for anything but an END.
  pub async fn handle_delivery(
    &mut self,
    delivery: Delivery,
    cancel: &CancellationToken,
  ) -> Result<Step, CoordinatorError> {
    let frame = Frame::unmarshal(delivery.body().clone()).inspect_err(|e| {
      error!(error = %e, len = delivery.body().len(), "couldn't unmarshal protocol message");
    })?;

    if !frame.expect_kind(MessageKind::End) {
      error!(
        kind = %frame.kind(),
        client_id = frame.client_id(),
        node_id = frame.node_id(),
        "unexpected message type different to END"
      );
      return Err(CoordinatorError::UnexpectedKind(frame.kind()));
    }

    let resource = resource_for(&frame, self.config.variant);
    let (node, client) = (frame.node_id(), frame.client_id());
    let step = self
      .process_end(resource, node, client, cancel)
      .await
      .inspect_err(|e| {
        error!(
          resource = %resource,
          node_id = node,
          client_id = client,
          error = %e,
          "couldn't process END"
        );
      })?;

    if step != Step::Interrupted {
      delivery.ack().await?;
    }
    Ok(step)
  }

  /// Folds one END from `node` for `client` into the `resource` barrier.
  ///
  /// Completion is checked even when the report was already known, so an
  /// END redelivered after a crash between checkpoint and publish still
  /// drains the barrier.
  ///
  /// # Errors
  ///
  /// Returns a persistence error if a checkpoint fails and a transport
  /// error if publishing fails.
  pub async fn process_end(
    &mut self,
    resource: Resource,
    node: u32,
    client: u32,
    cancel: &CancellationToken,
  ) -> Result<Step, CoordinatorError> {
    let admission = self.state.add_end(resource, node, client);
    match admission {
      Admission::AlreadySent => {
        info!(resource = %resource, client_id = client, node_id = node, "END already propagated");
        return Ok(Step::AlreadySent);
      }
      Admission::UnknownNode => return Ok(Step::Ignored),
      Admission::AlreadyReported => {
        debug!(resource = %resource, client_id = client, node_id = node, "END already recorded");
      }
      Admission::Recorded => {}
    }

    let recorded = admission.changed_state();
    if recorded {
      self.checkpoint()?;
    }

    if !self.state.all_reported_for(resource, client) {
      return Ok(if recorded { Step::Recorded } else { Step::Ignored });
    }

    let delay = self.config.grace_delay;
    if !delay.is_zero() {
      debug!(
        resource = %resource,
        client_id = client,
        delay_ms = delay.as_millis() as u64,
        "waiting before propagation"
      );
      tokio::select! {
        _ = cancel.cancelled() => {
          warn!(resource = %resource, client_id = client, "cancelled before propagating END");
          return Ok(Step::Interrupted);
        }
        _ = tokio::time::sleep(delay) => {}
      }
    }

    self.propagate(resource, client).await?;
    self.state.reset(resource, client);
    self.state.mark_sent(resource, client);
    self.checkpoint()?;
    Ok(Step::Propagated)
  }

  async fn propagate(&self, resource: Resource, client: u32) -> Result<(), CoordinatorError> {
    let header = MessageHeader::new(self.config.node_id, client, resource.emitted_request_id());
    let body = Frame::end(resource.data_type(), header).marshal();

    for tag in self.config.routes.tags_for(resource) {
      info!(
        resource = %resource,
        client_id = client,
        request_id = header.request_id,
        tag = %tag,
        "propagating END"
      );
      self.transport.write(body.clone(), tag).await?;
    }
    Ok(())
  }

  fn checkpoint(&self) -> Result<(), CoordinatorError> {
    let snapshot = self.state.to_snapshot()?;
    self.log.append(snapshot, EntryKind::Snapshot)?;
    if self.config.compaction {
      self.log.retain_latest(EntryKind::Snapshot)?;
    }
    self.log.commit()?;
    debug!(state = ?self.state, "barrier state");
    Ok(())
  }

  /// Closes the transport.
  ///
  /// # Errors
  ///
  /// Returns the transport's close error.
  pub async fn close(&mut self) -> Result<(), CoordinatorError> {
    self.transport.close().await?;
    Ok(())
  }

  /// Returns the transport, consuming the controller.
  pub fn into_transport(self) -> T {
    self.transport
  }
}
