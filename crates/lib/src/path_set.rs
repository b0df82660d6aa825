//! Declarative selection of inputs: a base directory plus ant-style patterns.
//!
//! A [`PathSet`] is also the key under which a configuration digest is stored
//! in the build state, so equality is structural over every field and the
//! serialized form is stable across runs.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::selector::glob::normalize_pattern;
use crate::util::paths::resolve;

/// Which kinds of filesystem entries a path set selects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSetKind {
  /// Regular files (and empty directories, which are treated as leaves).
  #[default]
  FilesOnly,
  /// Directories only.
  DirectoriesOnly,
  /// Both files and directories.
  FilesAndDirectories,
}

/// A base directory with include/exclude patterns.
///
/// Patterns are matched against `/`-separated paths relative to the base
/// directory. An empty include list selects everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSet {
  basedir: PathBuf,
  #[serde(default)]
  includes: Vec<String>,
  #[serde(default)]
  excludes: Vec<String>,
  #[serde(default = "default_true")]
  default_excludes: bool,
  #[serde(default = "default_true")]
  case_sensitive: bool,
  #[serde(default)]
  kind: PathSetKind,
}

fn default_true() -> bool {
  true
}

impl PathSet {
  /// Create a path set rooted at `basedir` that selects every file below it.
  pub fn new(basedir: impl AsRef<Path>) -> Self {
    Self {
      basedir: resolve(basedir.as_ref()),
      includes: Vec::new(),
      excludes: Vec::new(),
      default_excludes: true,
      case_sensitive: true,
      kind: PathSetKind::default(),
    }
  }

  /// A path set selecting exactly one file, rooted at its parent directory.
  ///
  /// Default excludes are disabled so that the file is selected even if its
  /// name would otherwise be filtered (e.g. `notes.txt~`).
  pub fn from_file(file: impl AsRef<Path>) -> Self {
    let file = resolve(file.as_ref());
    let basedir = file.parent().map(Path::to_path_buf).unwrap_or_else(|| file.clone());
    let name = file
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    Self::new(basedir).with_includes([name]).with_default_excludes(false)
  }

  /// Collect a list of file names into path sets.
  ///
  /// Relative names are gathered into a single path set rooted at `basedir`
  /// (the current directory when `None`). Every absolute name gets its own
  /// [`PathSet::from_file`] set. The relative set, if any, comes first in the
  /// position of the first relative name.
  pub fn from_files<I, S>(basedir: Option<&Path>, files: I) -> Vec<PathSet>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let basedir = resolve(basedir.unwrap_or(Path::new("")));
    let mut path_sets = Vec::new();
    let mut relative_index: Option<usize> = None;

    for file in files {
      let file = file.as_ref();
      if Path::new(file).is_absolute() {
        path_sets.push(PathSet::from_file(file));
        continue;
      }
      let index = *relative_index.get_or_insert_with(|| {
        path_sets.push(PathSet::new(&basedir).with_default_excludes(false));
        path_sets.len() - 1
      });
      path_sets[index].add_includes([file]);
    }

    path_sets
  }

  /// Add include patterns, returning the modified set.
  pub fn with_includes<I, S>(mut self, includes: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    self.add_includes(includes);
    self
  }

  /// Add exclude patterns, returning the modified set.
  pub fn with_excludes<I, S>(mut self, excludes: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    self.add_excludes(excludes);
    self
  }

  pub fn with_default_excludes(mut self, default_excludes: bool) -> Self {
    self.default_excludes = default_excludes;
    self
  }

  pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
    self.case_sensitive = case_sensitive;
    self
  }

  pub fn with_kind(mut self, kind: PathSetKind) -> Self {
    self.kind = kind;
    self
  }

  /// Append include patterns. Duplicates are ignored.
  pub fn add_includes<I, S>(&mut self, includes: I) -> &mut Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    push_patterns(&mut self.includes, includes);
    self
  }

  /// Append exclude patterns. Duplicates are ignored.
  pub fn add_excludes<I, S>(&mut self, excludes: I) -> &mut Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    push_patterns(&mut self.excludes, excludes);
    self
  }

  pub fn set_default_excludes(&mut self, default_excludes: bool) -> &mut Self {
    self.default_excludes = default_excludes;
    self
  }

  pub fn set_case_sensitive(&mut self, case_sensitive: bool) -> &mut Self {
    self.case_sensitive = case_sensitive;
    self
  }

  pub fn set_kind(&mut self, kind: PathSetKind) -> &mut Self {
    self.kind = kind;
    self
  }

  pub fn basedir(&self) -> &Path {
    &self.basedir
  }

  pub fn includes(&self) -> &[String] {
    &self.includes
  }

  pub fn excludes(&self) -> &[String] {
    &self.excludes
  }

  pub fn is_default_excludes(&self) -> bool {
    self.default_excludes
  }

  pub fn is_case_sensitive(&self) -> bool {
    self.case_sensitive
  }

  pub fn kind(&self) -> PathSetKind {
    self.kind
  }

  pub fn is_including_files(&self) -> bool {
    self.kind != PathSetKind::DirectoriesOnly
  }

  pub fn is_including_directories(&self) -> bool {
    self.kind != PathSetKind::FilesOnly
  }
}

fn push_patterns<I, S>(target: &mut Vec<String>, patterns: I)
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  for pattern in patterns {
    let pattern = normalize_pattern(pattern.as_ref());
    if !target.contains(&pattern) {
      target.push(pattern);
    }
  }
}

impl fmt::Display for PathSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} (includes: {:?}, excludes: {:?}, kind: {:?}",
      self.basedir.display(),
      self.includes,
      self.excludes,
      self.kind
    )?;
    if !self.default_excludes {
      f.write_str(", no default excludes")?;
    }
    if !self.case_sensitive {
      f.write_str(", case-insensitive")?;
    }
    f.write_str(")")
  }
}
