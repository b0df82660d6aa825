//! Persistent build state for one (output directory, builder) pair.
//!
//! A [`BuildState`] wraps the [`BuildGraph`] in a mutex so that several open
//! build contexts for the same output directory and builder can share it.
//! It remembers the (mtime, size) of its state file as last loaded or saved to
//! notice when another process rewrote the file in between.

pub mod file_state;
pub mod graph;
pub mod message;
pub mod storage;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::StateError;

pub use file_state::FileState;
pub use graph::BuildGraph;
pub use message::{Message, Severity};

#[derive(Debug)]
pub struct BuildState {
  state_file: PathBuf,
  graph: Mutex<BuildGraph>,
  /// State file snapshot as of the last load or save.
  stamp: Mutex<Option<FileState>>,
}

impl BuildState {
  /// An empty state that will be saved to `state_file`.
  pub fn empty(state_file: impl Into<PathBuf>) -> Self {
    let state_file = state_file.into();
    let stamp = FileState::of(&state_file);
    Self {
      state_file,
      graph: Mutex::new(BuildGraph::new()),
      stamp: Mutex::new(stamp),
    }
  }

  /// Load the state from `state_file`.
  ///
  /// A missing, unreadable or corrupt file yields an empty state; the build
  /// then simply starts from scratch.
  pub fn load(state_file: impl Into<PathBuf>) -> Self {
    let state = Self::empty(state_file);
    match storage::read_state(&state.state_file) {
      Ok(Some(graph)) => {
        debug!(path = %state.state_file.display(), "loaded build state");
        *state.lock() = graph;
      }
      Ok(None) => {
        debug!(path = %state.state_file.display(), "no previous build state");
      }
      Err(e) => {
        warn!(
          path = %state.state_file.display(),
          error = %e,
          "could not read build state, starting a full build"
        );
      }
    }
    state
  }

  pub fn state_file(&self) -> &Path {
    &self.state_file
  }

  /// Lock the graph for reading or mutation. A poisoned lock is recovered.
  pub fn lock(&self) -> MutexGuard<'_, BuildGraph> {
    self.graph.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Persist the graph.
  ///
  /// Logs a warning if the state file changed on disk since it was last loaded
  /// or saved by this instance, then overwrites it anyway.
  pub fn save(&self) -> Result<(), StateError> {
    let graph = self.lock();
    let mut stamp = self.stamp.lock().unwrap_or_else(PoisonError::into_inner);

    let current = FileState::of(&self.state_file);
    if current.is_some() && current != *stamp {
      warn!(
        path = %self.state_file.display(),
        "build state was modified by another process, overwriting"
      );
    }

    storage::write_state(&self.state_file, &graph)?;
    *stamp = FileState::of(&self.state_file);
    debug!(path = %self.state_file.display(), "saved build state");
    Ok(())
  }

  /// Forget everything and delete the state file.
  pub fn discard(&self) -> Result<(), StateError> {
    *self.lock() = BuildGraph::new();
    *self.stamp.lock().unwrap_or_else(PoisonError::into_inner) = None;
    match fs::remove_file(&self.state_file) {
      Ok(()) => {
        debug!(path = %self.state_file.display(), "discarded build state");
        Ok(())
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(StateError::Write(e)),
    }
  }
}
