//! # drainweave
//!
//! Distributed end-of-stream detection for fan-out/fan-in batch pipelines.
//!
//! Every upstream replica emits one END per client when it has finished that
//! client's input. A coordinator collects those ENDs, decides when all
//! replicas have drained, and publishes exactly one downstream END per
//! resource and client. Barrier state is checkpointed to a checksummed
//! transaction log so a restart neither loses nor duplicates a decision.
//!
//! ## Key Features
//!
//! - **Wire Protocol**: compact 17-byte framed messages with bit-packed tags
//! - **End Barrier**: per-resource node/client matrix with idempotent emission
//! - **Transaction Log**: atomic rewrite-on-commit with CRC-32C entries
//! - **Pluggable Transport**: in-process channels or length-delimited TCP
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use drainweave::config::CoordinatorConfig;
//! use drainweave::coordinator::CoordinatorController;
//! use drainweave::transport::ChannelTransport;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), drainweave::error::CoordinatorError> {
//! let (transport, _peer) = ChannelTransport::pair(64);
//! let config = CoordinatorConfig::new(3, "/var/lib/coordinator/games.log");
//! let mut controller = CoordinatorController::recover(config, transport)?;
//! controller.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// End barrier state and resource namespaces.
pub mod barrier;
/// Environment-driven configuration.
pub mod config;
/// The END coordinator and its recovery.
pub mod coordinator;
/// Crate-level error type.
pub mod error;
/// Subscriber setup for `tracing`.
pub mod logging;
/// Checksummed transaction log.
pub mod persistence;
/// Binary wire protocol.
pub mod protocol;
/// Broker transports.
pub mod transport;

pub use barrier::{EndBarrierState, Resource};
pub use coordinator::{CoordinatorController, Variant};
pub use error::CoordinatorError;
pub use persistence::TransactionLog;
pub use protocol::{Frame, Message};
