//! Durable, checksummed transaction log.
//!
//! The log is an ordered list of [`Entry`] values kept in memory and
//! rewritten in full on every [`TransactionLog::commit`], through a sibling
//! temp file, `fsync` and an atomic rename. A crash mid-commit leaves the
//! previously committed file intact.
//!
//! Coordinators use the log as a checkpoint store: every commit carries a
//! full [`EntryKind::Snapshot`] of barrier state and recovery only needs the
//! newest one. Because each commit rewrites history, commit cost grows with
//! the log; [`TransactionLog::retain_latest`] drops superseded snapshots when
//! compaction is enabled.
//!
//! File format (little-endian):
//!
//! ```text
//! [8 entry count][count x (4 crc32, 4 kind, 8 index, 8 timestamp ns, 8 data len, data)]
//! ```

mod log;
mod message_ids;


pub use log::{Entry, TransactionLog, atomic_write_file};
pub use message_ids::MessageIdSet;

use std::path::PathBuf;
use thiserror::Error;

/// Tag stored in [`Entry::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EntryKind {
  /// Set of message ids already folded into a batch.
  Batch = 0,
  /// Full snapshot of barrier state.
  Snapshot = 1,
}

impl EntryKind {
  /// Returns the raw tag.
  #[inline]
  pub const fn as_u32(self) -> u32 {
    self as u32
  }

  /// Maps a raw tag back to a known kind.
  pub const fn from_u32(raw: u32) -> Option<Self> {
    match raw {
      0 => Some(EntryKind::Batch),
      1 => Some(EntryKind::Snapshot),
      _ => None,
    }
  }
}

/// Error type for log and snapshot operations.
#[derive(Error, Debug)]
pub enum PersistenceError {
  /// I/O or filesystem error.
  #[error("io error on {path}: {source}")]
  Io {
    /// File the operation touched.
    path: PathBuf,
    /// Underlying error.
    #[source]
    source: std::io::Error,
  },
  /// An entry's data no longer matches its checksum.
  #[error("couldn't unmarshal log: corrupted entry {position} (stored crc {stored:#010x}, computed {computed:#010x})")]
  Corrupted {
    /// Position of the entry in the file.
    position: u64,
    /// Checksum read from disk.
    stored: u32,
    /// Checksum of the data read from disk.
    computed: u32,
  },
  /// The file ends before the structure it describes.
  #[error("couldn't unmarshal log: truncated {0}")]
  Truncated(String),
  /// Bytes remain after the declared number of entries.
  #[error("couldn't unmarshal log: {0} trailing bytes")]
  TrailingBytes(usize),
  /// Snapshot encoding or decoding failed.
  #[error("snapshot serialization error: {0}")]
  Serialization(String),
  /// The in-memory lock was poisoned by a panicking writer.
  #[error("lock error: {0}")]
  Lock(String),
}

impl PersistenceError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    PersistenceError::Io {
      path: path.into(),
      source,
    }
  }
}
