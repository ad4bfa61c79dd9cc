//! # End Barrier
//!
//! Tracks which upstream replicas have reported END for which clients, per
//! resource, and decides when a resource stream is fully drained.
//!
//! ## Overview
//!
//! Every stateless upstream node emits one END per client once it has
//! processed that client's input. A coordinator expects `N` such ENDs, one
//! from each node id `1..=N`, before it may emit a single downstream END for
//! the client. The barrier keeps, per [`Resource`]:
//!
//! - a map `node id -> clients that node has reported`;
//! - the set of clients whose END was already propagated.
//!
//! A propagated client is never admitted again, which makes broker
//! redeliveries harmless.
//!
//! ## Core Types
//!
//! - [`Resource`]: independent barrier namespaces (games, reviews and the
//!   joiner's final reviews).
//! - [`Phase`]: joiner phase carried on the wire by a reserved request id.
//! - [`EndBarrierState`]: the full barrier, snapshot-able through serde.

mod state;

pub use crate::protocol::{FINAL_PHASE_REQUEST_ID, FIRST_PHASE_REQUEST_ID};
pub use state::{Admission, EndBarrierState, ResourceBarrier};

use crate::protocol::DataType;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// A barrier namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
  /// Game records.
  Games,
  /// Review records.
  Reviews,
  /// Reviews that completed the joiner's second phase.
  FinalReviews,
}

impl Resource {
  /// Every resource, in snapshot order.
  pub const ALL: [Resource; 3] = [Resource::Games, Resource::Reviews, Resource::FinalReviews];

  /// Data type carried by ENDs emitted for this resource.
  pub const fn data_type(self) -> DataType {
    match self {
      Resource::Games => DataType::Games,
      Resource::Reviews | Resource::FinalReviews => DataType::Reviews,
    }
  }

  /// Request id stamped on ENDs emitted for this resource.
  ///
  /// Downstream joiners tell the phases apart by this value alone.
  pub const fn emitted_request_id(self) -> u32 {
    match self {
      Resource::Games | Resource::Reviews => Phase::First.request_id(),
      Resource::FinalReviews => Phase::Final.request_id(),
    }
  }
}

impl Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Resource::Games => write!(f, "games"),
      Resource::Reviews => write!(f, "reviews"),
      Resource::FinalReviews => write!(f, "final reviews"),
    }
  }
}

/// Joiner phase encoded in an END's request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  /// END produced by the first pass over the input.
  First,
  /// END produced after the joiner finished its second pass.
  Final,
}

impl Phase {
  /// Reads the phase sentinel of a request id, if it carries one.
  pub const fn from_request_id(request_id: u32) -> Option<Self> {
    match request_id {
      FIRST_PHASE_REQUEST_ID => Some(Phase::First),
      FINAL_PHASE_REQUEST_ID => Some(Phase::Final),
      _ => None,
    }
  }

  /// Returns the sentinel request id of this phase.
  pub const fn request_id(self) -> u32 {
    match self {
      Phase::First => FIRST_PHASE_REQUEST_ID,
      Phase::Final => FINAL_PHASE_REQUEST_ID,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_phase_sentinels() {
    assert_eq!(Phase::from_request_id(u32::MAX), Some(Phase::First));
    assert_eq!(Phase::from_request_id(u32::MAX - 1), Some(Phase::Final));
    assert_eq!(Phase::from_request_id(17), None);
    assert_eq!(Phase::Final.request_id(), FINAL_PHASE_REQUEST_ID);
  }

  #[test]
  fn test_resource_emission_shape() {
    assert_eq!(Resource::Games.data_type(), DataType::Games);
    assert_eq!(Resource::FinalReviews.data_type(), DataType::Reviews);
    assert_eq!(
      Resource::Reviews.emitted_request_id(),
      Phase::First.request_id()
    );
    assert_eq!(
      Resource::FinalReviews.emitted_request_id(),
      Phase::Final.request_id()
    );
    assert_eq!(Resource::FinalReviews.to_string(), "final reviews");
  }
}
