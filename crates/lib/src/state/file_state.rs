//! Filesystem snapshots used for staleness detection.

use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

/// The (timestamp, size) of a file or directory when it was last accepted
/// into the build state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileState {
  /// Modification time in nanoseconds since the Unix epoch.
  pub modified: u64,
  pub size: u64,
  #[serde(default)]
  pub directory: bool,
}

impl FileState {
  /// Snapshot `path`, or `None` if it does not exist.
  pub fn of(path: &Path) -> Option<Self> {
    let metadata = fs::metadata(path).ok()?;
    let modified = metadata
      .modified()
      .ok()
      .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
      .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
      .unwrap_or(0);
    Some(Self {
      modified,
      size: if metadata.is_dir() { 0 } else { metadata.len() },
      directory: metadata.is_dir(),
    })
  }

  /// Snapshot `path`, recording a missing path as an empty file.
  pub fn of_or_missing(path: &Path) -> Self {
    Self::of(path).unwrap_or(Self {
      modified: 0,
      size: 0,
      directory: false,
    })
  }

  /// Whether `path` no longer matches this snapshot.
  ///
  /// Directories only compare directory-ness since their timestamps change
  /// whenever a child is added or removed.
  pub fn is_changed(&self, path: &Path) -> bool {
    match Self::of(path) {
      None => true,
      Some(current) if current.directory != self.directory => true,
      Some(_) if self.directory => false,
      Some(current) => current.modified != self.modified || current.size != self.size,
    }
  }
}

/// Whether `path` is missing or differs from `previous`. A missing snapshot
/// always counts as changed.
pub fn is_changed_or_deleted(path: &Path, previous: Option<&FileState>) -> bool {
  previous.is_none_or(|state| state.is_changed(path))
}
