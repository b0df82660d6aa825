//! Pluggable receivers for diagnostics and output notifications.

use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::state::{Message, Severity};

/// Receives diagnostics as they are reported, and again when messages from
/// an earlier build are replayed at commit.
pub trait MessageSink: Send + Sync {
  fn log_message(&self, input: &Path, message: &Message);
}

/// Notified about outputs that were created, changed or deleted, e.g. to
/// refresh an IDE workspace.
pub trait OutputListener: Send + Sync {
  fn outputs_updated(&self, outputs: &[PathBuf]);
}

/// Logs messages through `tracing` as `<path> [line:col]: text`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMessageSink;

impl MessageSink for TracingMessageSink {
  fn log_message(&self, input: &Path, message: &Message) {
    let rendered = message.render(input);
    match message.severity {
      Severity::Warning => warn!("{rendered}"),
      Severity::Error => error!("{rendered}"),
    }
  }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOutputListener;

impl OutputListener for NoopOutputListener {
  fn outputs_updated(&self, _outputs: &[PathBuf]) {}
}
