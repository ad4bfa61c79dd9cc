use super::Resource;
use crate::persistence::PersistenceError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Outcome of folding one END into the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
  /// The node/client pair was new; state changed.
  Recorded,
  /// The node had already reported this client; state unchanged.
  AlreadyReported,
  /// The client was already propagated for this resource; state unchanged.
  AlreadySent,
  /// The node id is outside `1..=N`; state unchanged.
  UnknownNode,
}

impl Admission {
  /// Returns true if the barrier changed and must be persisted.
  pub fn changed_state(self) -> bool {
    matches!(self, Admission::Recorded)
  }
}

/// Barrier for a single resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBarrier {
  reported: BTreeMap<u32, BTreeSet<u32>>,
  sent: BTreeSet<u32>,
}

impl ResourceBarrier {
  fn with_nodes(expected_nodes: u32) -> Self {
    let mut barrier = Self::default();
    barrier.ensure_nodes(expected_nodes);
    barrier
  }

  fn ensure_nodes(&mut self, expected_nodes: u32) {
    for node in 1..=expected_nodes {
      self.reported.entry(node).or_default();
    }
  }

  /// Clients the given node has reported and that are not yet propagated.
  pub fn reported_by(&self, node: u32) -> Option<&BTreeSet<u32>> {
    self.reported.get(&node)
  }

  /// Clients already propagated.
  pub fn sent(&self) -> &BTreeSet<u32> {
    &self.sent
  }

  /// Clients at least one node has reported and that are not yet propagated.
  pub fn pending(&self) -> BTreeSet<u32> {
    self.reported.values().flatten().copied().collect()
  }
}

/// Per-resource END barrier for a fixed number of upstream nodes.
///
/// All operations are synchronous and owned by a single controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndBarrierState {
  expected_nodes: u32,
  games: ResourceBarrier,
  reviews: ResourceBarrier,
  final_reviews: ResourceBarrier,
}

impl EndBarrierState {
  /// Creates an empty barrier expecting node ids `1..=expected_nodes`.
  pub fn new(expected_nodes: u32) -> Self {
    Self {
      expected_nodes,
      games: ResourceBarrier::with_nodes(expected_nodes),
      reviews: ResourceBarrier::with_nodes(expected_nodes),
      final_reviews: ResourceBarrier::with_nodes(expected_nodes),
    }
  }

  /// Number of upstream nodes every client must hear from.
  pub fn expected_nodes(&self) -> u32 {
    self.expected_nodes
  }

  /// Read-only view of one resource.
  pub fn resource(&self, resource: Resource) -> &ResourceBarrier {
    match resource {
      Resource::Games => &self.games,
      Resource::Reviews => &self.reviews,
      Resource::FinalReviews => &self.final_reviews,
    }
  }

  fn resource_mut(&mut self, resource: Resource) -> &mut ResourceBarrier {
    match resource {
      Resource::Games => &mut self.games,
      Resource::Reviews => &mut self.reviews,
      Resource::FinalReviews => &mut self.final_reviews,
    }
  }

  /// Records that `node` finished `client` for `resource`.
  pub fn add_end(&mut self, resource: Resource, node: u32, client: u32) -> Admission {
    if node == 0 || node > self.expected_nodes {
      warn!(
        resource = %resource,
        node_id = node,
        client_id = client,
        expected_nodes = self.expected_nodes,
        "END from unknown node id, ignoring"
      );
      return Admission::UnknownNode;
    }

    let barrier = self.resource_mut(resource);
    if barrier.sent.contains(&client) {
      return Admission::AlreadySent;
    }
    if barrier.reported.entry(node).or_default().insert(client) {
      Admission::Recorded
    } else {
      Admission::AlreadyReported
    }
  }

  /// Returns true if every node `1..=N` has reported `client`.
  pub fn all_reported_for(&self, resource: Resource, client: u32) -> bool {
    let barrier = self.resource(resource);
    (1..=self.expected_nodes).all(|node| {
      barrier
        .reported
        .get(&node)
        .is_some_and(|clients| clients.contains(&client))
    })
  }

  /// Forgets every node's report of `client` for `resource`.
  pub fn reset(&mut self, resource: Resource, client: u32) {
    for clients in self.resource_mut(resource).reported.values_mut() {
      clients.remove(&client);
    }
  }

  /// Returns true if an END was already propagated for `client`.
  pub fn was_already_sent(&self, resource: Resource, client: u32) -> bool {
    self.resource(resource).sent.contains(&client)
  }

  /// Remembers that the END for `client` was propagated.
  pub fn mark_sent(&mut self, resource: Resource, client: u32) {
    self.resource_mut(resource).sent.insert(client);
  }

  /// Encodes the full barrier for a [`Snapshot`](crate::persistence::EntryKind::Snapshot) entry.
  ///
  /// # Errors
  ///
  /// Returns [`PersistenceError::Serialization`] if encoding fails.
  pub fn to_snapshot(&self) -> Result<Vec<u8>, PersistenceError> {
    serde_json::to_vec(self).map_err(|e| PersistenceError::Serialization(e.to_string()))
  }

  /// Decodes a snapshot, keeping `expected_nodes` from configuration.
  ///
  /// # Errors
  ///
  /// Returns [`PersistenceError::Serialization`] if the bytes are not a
  /// barrier snapshot.
  pub fn from_snapshot(bytes: &[u8], expected_nodes: u32) -> Result<Self, PersistenceError> {
    let mut state: Self =
      serde_json::from_slice(bytes).map_err(|e| PersistenceError::Serialization(e.to_string()))?;

    if state.expected_nodes != expected_nodes {
      warn!(
        stored = state.expected_nodes,
        configured = expected_nodes,
        "snapshot was taken with a different node count, using configured value"
      );
      state.expected_nodes = expected_nodes;
    }
    for resource in Resource::ALL {
      state.resource_mut(resource).ensure_nodes(expected_nodes);
    }
    Ok(state)
  }
}
