//! Diagnostics attached to inputs.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Warning,
  Error,
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Severity::Warning => f.write_str("warning"),
      Severity::Error => f.write_str("error"),
    }
  }
}

/// A diagnostic reported for an input, persisted until the input is cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
  /// 1-based line, or 0 if unknown.
  #[serde(default)]
  pub line: u32,
  /// 1-based column, or 0 if unknown.
  #[serde(default)]
  pub column: u32,
  #[serde(default)]
  pub text: String,
  pub severity: Severity,
  /// Rendered cause, if the message originated from an error.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cause: Option<String>,
}

impl Message {
  pub fn new(line: u32, column: u32, text: impl Into<String>, severity: Severity) -> Self {
    Self {
      line,
      column,
      text: text.into(),
      severity,
      cause: None,
    }
  }

  pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
    self.cause = Some(cause.to_string());
    self
  }

  pub fn is_error(&self) -> bool {
    self.severity == Severity::Error
  }

  /// Render as `<path> [line:col]: text`.
  ///
  /// The location is omitted when unknown. An empty text falls back to the
  /// cause, then to `(unknown issue)`.
  pub fn render(&self, input: &Path) -> String {
    let mut out = input.display().to_string();
    if self.line > 0 {
      out.push_str(&format!(" [{}", self.line));
      if self.column > 0 {
        out.push_str(&format!(":{}", self.column));
      }
      out.push(']');
    }
    out.push_str(": ");
    if !self.text.is_empty() {
      out.push_str(&self.text);
    } else if let Some(cause) = self.cause.as_deref().filter(|c| !c.is_empty()) {
      out.push_str(cause);
    } else {
      out.push_str("(unknown issue)");
    }
    out
  }
}
