use super::{EntryKind, PersistenceError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const COUNT_LEN: usize = 8;
const ENTRY_HEADER_LEN: usize = 4 + 4 + 8 + 8 + 8;

/// One checksummed log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
  /// CRC-32C of `data`.
  pub checksum: u32,
  /// Raw [`EntryKind`] tag. Unknown tags are preserved.
  pub kind: u32,
  /// Append order.
  pub index: i64,
  /// Wall-clock time of the append, in nanoseconds since the epoch.
  pub timestamp: i64,
  /// Entry body.
  pub data: Bytes,
}

impl Entry {
  /// Returns the known kind of this entry, if any.
  pub fn entry_kind(&self) -> Option<EntryKind> {
    EntryKind::from_u32(self.kind)
  }

  fn encoded_len(&self) -> usize {
    ENTRY_HEADER_LEN + self.data.len()
  }

  fn encode(&self, buf: &mut BytesMut) {
    buf.put_u32_le(self.checksum);
    buf.put_u32_le(self.kind);
    buf.put_i64_le(self.index);
    buf.put_i64_le(self.timestamp);
    buf.put_u64_le(self.data.len() as u64);
    buf.put_slice(&self.data);
  }

  fn decode(buf: &mut Bytes, position: u64) -> Result<Self, PersistenceError> {
    if buf.len() < ENTRY_HEADER_LEN {
      return Err(PersistenceError::Truncated(format!(
        "entry {position} header ({} bytes left)",
        buf.len()
      )));
    }
    let checksum = buf.get_u32_le();
    let kind = buf.get_u32_le();
    let index = buf.get_i64_le();
    let timestamp = buf.get_i64_le();
    let len = buf.get_u64_le();
    if (buf.len() as u64) < len {
      return Err(PersistenceError::Truncated(format!(
        "entry {position} data: declares {len} bytes, {} left",
        buf.len()
      )));
    }
    let data = buf.split_to(len as usize);

    let computed = crc32fast::hash(&data);
    if computed != checksum {
      return Err(PersistenceError::Corrupted {
        position,
        stored: checksum,
        computed,
      });
    }

    Ok(Self {
      checksum,
      kind,
      index,
      timestamp,
      data,
    })
  }
}

#[derive(Debug, Default)]
struct LogInner {
  entries: Vec<Entry>,
  next_index: i64,
}

/// Ordered in-memory log, persisted in full on commit.
///
/// Only one process may own a given log file.
#[derive(Debug)]
pub struct TransactionLog {
  path: PathBuf,
  inner: Mutex<LogInner>,
}

impl TransactionLog {
  /// Creates an empty log that will commit to `path`. Nothing is read.
  pub fn new<P: AsRef<Path>>(path: P) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
      inner: Mutex::new(LogInner::default()),
    }
  }

  /// Opens the log at `path`, loading committed entries if the file exists.
  ///
  /// A missing file yields an empty log.
  ///
  /// # Errors
  ///
  /// Returns an error if the file cannot be read or fails validation.
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
    let log = Self::new(path);
    match fs::read(&log.path) {
      Ok(bytes) => {
        log.unmarshal(Bytes::from(bytes))?;
        debug!(path = %log.path.display(), entries = log.len()?, "loaded transaction log");
      }
      Err(e) if e.kind() == ErrorKind::NotFound => {
        debug!(path = %log.path.display(), "no transaction log on disk, starting fresh");
      }
      Err(e) => return Err(PersistenceError::io(&log.path, e)),
    }
    Ok(log)
  }

  /// Returns the file the log commits to.
  pub fn path(&self) -> &Path {
    &self.path
  }

  fn lock(&self) -> Result<MutexGuard<'_, LogInner>, PersistenceError> {
    self
      .inner
      .lock()
      .map_err(|e| PersistenceError::Lock(e.to_string()))
  }

  /// Appends an entry in memory and returns its index. Touches no file.
  ///
  /// # Errors
  ///
  /// Returns [`PersistenceError::Lock`] if the lock is poisoned.
  pub fn append(&self, data: impl Into<Bytes>, kind: EntryKind) -> Result<i64, PersistenceError> {
    let data = data.into();
    let checksum = crc32fast::hash(&data);
    let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);

    let mut inner = self.lock()?;
    let index = inner.next_index;
    inner.next_index += 1;
    inner.entries.push(Entry {
      checksum,
      kind: kind.as_u32(),
      index,
      timestamp,
      data,
    });
    Ok(index)
  }

  /// Writes every entry to disk atomically.
  ///
  /// # Errors
  ///
  /// Returns an error if the temp file cannot be written, synced or renamed.
  pub fn commit(&self) -> Result<(), PersistenceError> {
    let inner = self.lock()?;
    let bytes = encode_entries(&inner.entries);
    atomic_write_file(&self.path, &bytes)
  }

  /// Serializes every entry without touching disk.
  ///
  /// # Errors
  ///
  /// Returns [`PersistenceError::Lock`] if the lock is poisoned.
  pub fn marshal(&self) -> Result<Bytes, PersistenceError> {
    let inner = self.lock()?;
    Ok(encode_entries(&inner.entries))
  }

  /// Replaces the in-memory entries with those decoded from `bytes`.
  ///
  /// Validation is all-or-nothing: a single checksum mismatch rejects the
  /// whole buffer and leaves the log unchanged.
  ///
  /// # Errors
  ///
  /// Returns [`PersistenceError::Corrupted`], [`PersistenceError::Truncated`]
  /// or [`PersistenceError::TrailingBytes`].
  pub fn unmarshal(&self, bytes: Bytes) -> Result<(), PersistenceError> {
    let entries = decode_entries(bytes)?;
    let next_index = entries.iter().map(|e| e.index + 1).max().unwrap_or(0);
    let mut inner = self.lock()?;
    inner.entries = entries;
    inner.next_index = next_index;
    Ok(())
  }

  /// Returns a copy of every entry in append order.
  ///
  /// # Errors
  ///
  /// Returns [`PersistenceError::Lock`] if the lock is poisoned.
  pub fn entries(&self) -> Result<Vec<Entry>, PersistenceError> {
    Ok(self.lock()?.entries.clone())
  }

  /// Returns the number of entries.
  ///
  /// # Errors
  ///
  /// Returns [`PersistenceError::Lock`] if the lock is poisoned.
  pub fn len(&self) -> Result<usize, PersistenceError> {
    Ok(self.lock()?.entries.len())
  }

  /// Returns true if the log holds no entries.
  ///
  /// # Errors
  ///
  /// Returns [`PersistenceError::Lock`] if the lock is poisoned.
  pub fn is_empty(&self) -> Result<bool, PersistenceError> {
    Ok(self.len()? == 0)
  }

  /// Returns the newest entry of `kind`.
  ///
  /// # Errors
  ///
  /// Returns [`PersistenceError::Lock`] if the lock is poisoned.
  pub fn latest(&self, kind: EntryKind) -> Result<Option<Entry>, PersistenceError> {
    let inner = self.lock()?;
    Ok(
      inner
        .entries
        .iter()
        .rev()
        .find(|e| e.kind == kind.as_u32())
        .cloned(),
    )
  }

  /// Drops every entry of `kind` except the newest. Entries of other kinds
  /// and the index sequence are untouched. Returns how many were dropped.
  ///
  /// # Errors
  ///
  /// Returns [`PersistenceError::Lock`] if the lock is poisoned.
  pub fn retain_latest(&self, kind: EntryKind) -> Result<usize, PersistenceError> {
    let mut inner = self.lock()?;
    let raw = kind.as_u32();
    let Some(keep) = inner.entries.iter().rposition(|e| e.kind == raw) else {
      return Ok(0);
    };
    let before = inner.entries.len();
    let mut position = 0;
    inner.entries.retain(|e| {
      let kept = e.kind != raw || position == keep;
      position += 1;
      kept
    });
    Ok(before - inner.entries.len())
  }
}

fn encode_entries(entries: &[Entry]) -> Bytes {
  let size = COUNT_LEN + entries.iter().map(Entry::encoded_len).sum::<usize>();
  let mut buf = BytesMut::with_capacity(size);
  buf.put_u64_le(entries.len() as u64);
  for entry in entries {
    entry.encode(&mut buf);
  }
  buf.freeze()
}

fn decode_entries(mut bytes: Bytes) -> Result<Vec<Entry>, PersistenceError> {
  if bytes.len() < COUNT_LEN {
    return Err(PersistenceError::Truncated(format!(
      "entry count ({} bytes)",
      bytes.len()
    )));
  }
  let count = bytes.get_u64_le();

  // The count is untrusted; let the vector grow with entries actually read.
  let mut entries = Vec::new();
  for position in 0..count {
    entries.push(Entry::decode(&mut bytes, position)?);
  }
  if !bytes.is_empty() {
    return Err(PersistenceError::TrailingBytes(bytes.len()));
  }
  Ok(entries)
}

/// Replaces `path` with `data` through a sibling temp file.
///
/// The temp file is written, synced and renamed over `path`; the parent
/// directory is then synced so the rename itself is durable. On failure the
/// temp file is removed and any previous `path` is left as it was.
///
/// # Errors
///
/// Returns [`PersistenceError::Io`] for any filesystem failure.
pub fn atomic_write_file(path: &Path, data: &[u8]) -> Result<(), PersistenceError> {
  let dir = match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
    _ => PathBuf::from("."),
  };
  fs::create_dir_all(&dir).map_err(|e| PersistenceError::io(&dir, e))?;

  let prefix = path
    .file_name()
    .map(|name| format!("{}.", name.to_string_lossy()))
    .unwrap_or_else(|| "log.".to_string());
  let mut tmp = tempfile::Builder::new()
    .prefix(&prefix)
    .suffix(".tmp")
    .tempfile_in(&dir)
    .map_err(|e| PersistenceError::io(&dir, e))?;

  tmp
    .write_all(data)
    .map_err(|e| PersistenceError::io(tmp.path(), e))?;
  tmp
    .as_file()
    .sync_all()
    .map_err(|e| PersistenceError::io(tmp.path(), e))?;
  tmp
    .persist(path)
    .map_err(|e| PersistenceError::io(path, e.error))?;

  #[cfg(unix)]
  {
    fs::File::open(&dir)
      .and_then(|handle| handle.sync_all())
      .map_err(|e| PersistenceError::io(&dir, e))?;
  }

  Ok(())
}
