//! Batch deduplication set.
//!
//! Stateless nodes record the ids of messages already folded into the
//! current batch and persist the set in the transaction log under
//! [`EntryKind::Batch`](super::EntryKind::Batch), so a redelivered message
//! is recognised after a restart.

use super::PersistenceError;
use crate::protocol::Frame;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashSet;

/// Set of message ids, encoded as `[4 count][count x 4 id]` little-endian.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageIdSet {
  ids: HashSet<u32>,
}

impl MessageIdSet {
  /// Creates an empty set.
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds an id. Returns false if it was already present.
  pub fn insert(&mut self, id: u32) -> bool {
    self.ids.insert(id)
  }

  /// Adds the node/message id of every frame.
  pub fn insert_frames<'a>(&mut self, frames: impl IntoIterator<Item = &'a Frame>) {
    self.ids.extend(frames.into_iter().map(Frame::node_id));
  }

  /// Returns true if `id` was recorded.
  pub fn contains(&self, id: u32) -> bool {
    self.ids.contains(&id)
  }

  /// Number of ids recorded.
  pub fn len(&self) -> usize {
    self.ids.len()
  }

  /// Returns true if no id is recorded.
  pub fn is_empty(&self) -> bool {
    self.ids.is_empty()
  }

  /// Forgets every id, typically once a batch has been flushed.
  pub fn clear(&mut self) {
    self.ids.clear();
  }

  /// Encodes the set. Ids are written in ascending order.
  pub fn marshal(&self) -> Bytes {
    let mut ids: Vec<u32> = self.ids.iter().copied().collect();
    ids.sort_unstable();

    let mut buf = BytesMut::with_capacity(4 + ids.len() * 4);
    buf.put_u32_le(ids.len() as u32);
    for id in ids {
      buf.put_u32_le(id);
    }
    buf.freeze()
  }

  /// Decodes a set written by [`MessageIdSet::marshal`].
  ///
  /// # Errors
  ///
  /// Returns [`PersistenceError::Truncated`] if fewer ids are present than
  /// declared, or [`PersistenceError::TrailingBytes`] if more bytes follow.
  pub fn unmarshal(mut bytes: &[u8]) -> Result<Self, PersistenceError> {
    if bytes.len() < 4 {
      return Err(PersistenceError::Truncated("message id count".to_string()));
    }
    let count = bytes.get_u32_le() as usize;
    if bytes.len() / 4 < count {
      return Err(PersistenceError::Truncated(format!(
        "message id set: declares {count} ids, {} bytes left",
        bytes.len()
      )));
    }
    let ids = (0..count).map(|_| bytes.get_u32_le()).collect();
    if !bytes.is_empty() {
      return Err(PersistenceError::TrailingBytes(bytes.len()));
    }
    Ok(Self { ids })
  }
}

impl FromIterator<u32> for MessageIdSet {
  fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
    Self {
      ids: iter.into_iter().collect(),
    }
  }
}
