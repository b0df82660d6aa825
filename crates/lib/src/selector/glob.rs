//! Ant-style patterns compiled with `globset`.
//!
//! - `**` matches zero or more path segments
//! - `*` matches any run of characters within one segment
//! - `?` matches exactly one character within one segment
//!
//! Brackets and braces carry no meaning in ant patterns and are matched
//! literally. A pattern ending in `/**` also matches the directory itself.

use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use tracing::warn;

const DEEP_TREE: &str = "**";

/// Normalize a pattern: backslashes become `/`, a trailing `/` selects
/// everything below the directory, and runs of `**` segments collapse.
pub fn normalize_pattern(pattern: &str) -> String {
  let mut normalized = pattern.replace('\\', "/");
  if normalized.ends_with('/') {
    normalized.push_str(DEEP_TREE);
  }
  while normalized.contains("**/**") {
    normalized = normalized.replace("**/**", DEEP_TREE);
  }
  normalized
}

fn escape_literals(pattern: &str) -> String {
  let mut escaped = String::with_capacity(pattern.len());
  for c in pattern.chars() {
    match c {
      '[' | ']' | '{' | '}' => {
        escaped.push('[');
        escaped.push(c);
        escaped.push(']');
      }
      _ => escaped.push(c),
    }
  }
  escaped
}

fn build_glob(pattern: &str, case_sensitive: bool) -> Option<Glob> {
  let build = |p: &str| {
    GlobBuilder::new(p)
      .literal_separator(true)
      .case_insensitive(!case_sensitive)
      .backslash_escape(false)
      .build()
  };
  match build(&escape_literals(pattern)) {
    Ok(glob) => Some(glob),
    Err(e) => {
      warn!(pattern, error = %e, "invalid pattern, matching it literally");
      build(&globset::escape(pattern)).ok()
    }
  }
}

/// Compile `patterns` into one set. `x/**` is added as both `x` and `x/**`.
pub fn glob_set<S: AsRef<str>>(patterns: &[S], case_sensitive: bool) -> GlobSet {
  let mut builder = GlobSetBuilder::new();
  for pattern in patterns {
    let pattern = pattern.as_ref();
    if let Some(dir) = pattern.strip_suffix("/**") {
      if let Some(glob) = build_glob(dir, case_sensitive) {
        builder.add(glob);
      }
    }
    if let Some(glob) = build_glob(pattern, case_sensitive) {
      builder.add(glob);
    }
  }
  builder.build().unwrap_or_else(|e| {
    warn!(error = %e, "failed to compile patterns, matching nothing");
    GlobSet::empty()
  })
}

/// The leading segments of a pattern, up to its first `**`, used to decide
/// whether a directory can contain matches.
#[derive(Debug, Clone)]
pub struct PatternStart {
  absolute: bool,
  segments: Vec<GlobMatcher>,
  /// Whether the pattern continues with `**` after `segments`.
  deep: bool,
}

impl PatternStart {
  pub fn new(pattern: &str, case_sensitive: bool) -> Self {
    let mut segments = Vec::new();
    let mut deep = false;
    for segment in pattern.split('/').filter(|s| !s.is_empty()) {
      if segment == DEEP_TREE {
        deep = true;
        break;
      }
      match build_glob(segment, case_sensitive) {
        Some(glob) => segments.push(glob.compile_matcher()),
        None => {
          deep = true;
          break;
        }
      }
    }
    Self {
      absolute: pattern.starts_with('/'),
      segments,
      deep,
    }
  }

  /// Whether something below the directory `path` could match the pattern.
  ///
  /// True when `path` runs out first or the pattern reaches `**`; false when
  /// the pattern runs out while `path` still has segments.
  pub fn matches(&self, path: &str) -> bool {
    if self.absolute != path.starts_with('/') {
      return false;
    }
    for (i, name) in path.split('/').filter(|s| !s.is_empty()).enumerate() {
      let Some(segment) = self.segments.get(i) else {
        return self.deep;
      };
      if !segment.is_match(name) {
        return false;
      }
    }
    true
  }
}
