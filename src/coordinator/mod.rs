//! # Coordinator
//!
//! The END coordinator: consumes END frames from every upstream replica,
//! folds them into an [`EndBarrierState`](crate::barrier::EndBarrierState)
//! and publishes exactly one END per resource and client once all replicas
//! have reported.
//!
//! ## Overview
//!
//! For each `(resource, client)` pair the controller moves through:
//!
//! ```text
//! Idle -> Accumulating -> Draining -> Propagated
//! ```
//!
//! Every state change is checkpointed to the transaction log before the
//! delivery that caused it is acknowledged. After a restart,
//! [`recovery::reload`] restores the newest snapshot and unacknowledged
//! deliveries are redelivered by the broker, so no END is lost.
//!
//! ## Variants
//!
//! - [`Variant::Plain`]: games and reviews barriers.
//! - [`Variant::Joiner`]: adds the final reviews barrier. A reviews END whose
//!   request id is the first-phase sentinel was produced by a joiner that
//!   finished its first pass, and feeds the final reviews barrier instead.

mod controller;
pub mod recovery;


pub use controller::{CoordinatorController, Step};

use crate::barrier::{Phase, Resource};
use crate::protocol::{DataType, Frame};

/// Which barriers a coordinator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variant {
  /// Games and reviews.
  #[default]
  Plain,
  /// Games, reviews and the joiner's final reviews.
  Joiner,
}

/// Maps an END frame to the barrier it feeds.
///
/// # Panics
///
/// Panics if `frame` is not a Data or End frame.
pub fn resource_for(frame: &Frame, variant: Variant) -> Resource {
  match (frame.data_type(), variant) {
    (DataType::Games, _) => Resource::Games,
    (DataType::Reviews, Variant::Plain) => Resource::Reviews,
    (DataType::Reviews, Variant::Joiner) => {
      match Phase::from_request_id(frame.request_id()) {
        Some(Phase::First) => Resource::FinalReviews,
        _ => Resource::Reviews,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::protocol::{FINAL_PHASE_REQUEST_ID, FIRST_PHASE_REQUEST_ID, MessageHeader};

  #[test]
  fn test_resource_for_plain() {
    let games = Frame::end(DataType::Games, MessageHeader::new(1, 1, 1));
    let reviews = Frame::end(DataType::Reviews, MessageHeader::new(1, 1, FIRST_PHASE_REQUEST_ID));
    assert_eq!(resource_for(&games, Variant::Plain), Resource::Games);
    assert_eq!(resource_for(&reviews, Variant::Plain), Resource::Reviews);
  }

  #[test]
  fn test_resource_for_joiner_phases() {
    let ordinary = Frame::end(DataType::Reviews, MessageHeader::new(2, 5, 10));
    let first = Frame::end(DataType::Reviews, MessageHeader::new(2, 5, FIRST_PHASE_REQUEST_ID));
    let final_phase = Frame::end(DataType::Reviews, MessageHeader::new(2, 5, FINAL_PHASE_REQUEST_ID));
    let games = Frame::end(DataType::Games, MessageHeader::new(2, 5, FIRST_PHASE_REQUEST_ID));

    assert_eq!(resource_for(&ordinary, Variant::Joiner), Resource::Reviews);
    assert_eq!(resource_for(&first, Variant::Joiner), Resource::FinalReviews);
    assert_eq!(resource_for(&final_phase, Variant::Joiner), Resource::Reviews);
    assert_eq!(resource_for(&games, Variant::Joiner), Resource::Games);
  }
}
