//! Startup recovery of barrier state.

use crate::barrier::EndBarrierState;
use crate::persistence::{EntryKind, PersistenceError, TransactionLog};
use std::path::Path;
use tracing::info;

/// Opens the log at `path` and restores the newest barrier snapshot.
///
/// A missing file yields an empty barrier and an empty log. Batch entries
/// and entries of unknown kinds are kept in the log but ignored here.
///
/// # Errors
///
/// Returns a [`PersistenceError`] if the file cannot be read, any entry
/// fails its checksum, or the newest snapshot does not decode.
pub fn reload(
  path: &Path,
  expected_nodes: u32,
) -> Result<(EndBarrierState, TransactionLog), PersistenceError> {
  let log = TransactionLog::open(path)?;

  let state = match log.latest(EntryKind::Snapshot)? {
    Some(entry) => {
      info!(
        path = %path.display(),
        entries = log.len()?,
        snapshot_index = entry.index,
        "restored barrier state from transaction log"
      );
      EndBarrierState::from_snapshot(&entry.data, expected_nodes)?
    }
    None => {
      info!(path = %path.display(), "no barrier snapshot found, starting empty");
      EndBarrierState::new(expected_nodes)
    }
  };

  Ok((state, log))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::barrier::Resource;
  use tempfile::tempdir;

  #[test]
  fn test_reload_missing_file() {
    let dir = tempdir().unwrap();
    let (state, log) = reload(&dir.path().join("absent.log"), 3).unwrap();
    assert_eq!(state, EndBarrierState::new(3));
    assert!(log.is_empty().unwrap());
  }

  #[test]
  fn test_reload_keeps_latest_snapshot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("coordinator.log");

    let mut state = EndBarrierState::new(2);
    let log = TransactionLog::new(&path);
    state.add_end(Resource::Games, 1, 3);
    log.append(state.to_snapshot().unwrap(), EntryKind::Snapshot).unwrap();
    log.append(&b"batch ids"[..], EntryKind::Batch).unwrap();
    state.add_end(Resource::Reviews, 2, 3);
    log.append(state.to_snapshot().unwrap(), EntryKind::Snapshot).unwrap();
    log.commit().unwrap();

    let (restored, reopened) = reload(&path, 2).unwrap();
    assert_eq!(restored, state);
    assert_eq!(reopened.len().unwrap(), 3);
  }

  #[test]
  fn test_reload_rejects_corruption() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("coordinator.log");

    let log = TransactionLog::new(&path);
    log
      .append(EndBarrierState::new(1).to_snapshot().unwrap(), EntryKind::Snapshot)
      .unwrap();
    log.commit().unwrap();

    let mut raw = std::fs::read(&path).unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0x20;
    std::fs::write(&path, raw).unwrap();

    assert!(matches!(
      reload(&path, 1),
      Err(PersistenceError::Corrupted { .. })
    ));
  }
}
