//! Error types for build state persistence and build contexts.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors reading or writing a persisted build state file.
#[derive(Debug, Error)]
pub enum StateError {
  #[error("failed to read build state: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write build state: {0}")]
  Write(#[source] io::Error),

  #[error("failed to create build state directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to parse build state: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize build state: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported build state version: {0}")]
  UnsupportedVersion(u32),
}

/// Errors surfaced by [`BuildContext`](crate::context::BuildContext) operations.
#[derive(Debug, Error)]
pub enum BuildError {
  /// The context was closed; no further operations are allowed.
  #[error("build context is closed")]
  Closed,

  /// The context was committed; only `commit` and `close` are allowed.
  #[error("build context has already been committed")]
  Committed,

  /// `add_message` was called without a prior `clear_messages` for the input.
  #[error("messages for {} must be cleared before new ones are added", input.display())]
  MessagesNotCleared { input: PathBuf },

  /// Error messages remain for selected inputs.
  #[error("build failed with {errors} error(s)")]
  BuildFailed { errors: usize },

  #[error("I/O error on {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  State(#[from] StateError),

  #[error("invalid argument: {0}")]
  InvalidArgument(String),
}

impl BuildError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    BuildError::Io {
      path: path.into(),
      source,
    }
  }

  /// Whether this error signals a programming error in the caller rather than
  /// a failed build.
  pub fn is_illegal_state(&self) -> bool {
    matches!(
      self,
      BuildError::Closed | BuildError::Committed | BuildError::MessagesNotCleared { .. }
    )
  }
}
