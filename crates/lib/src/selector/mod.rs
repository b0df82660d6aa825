//! Compiled include/exclude matching for a [`PathSet`].
//!
//! The selector answers two questions about a `/`-separated path relative to
//! the path set's base directory:
//!
//! - [`Selector::is_selected`]: does the path belong to the set?
//! - [`Selector::is_ancestor_of_potentially_selected`]: could anything below
//!   this directory belong to the set? Used to prune directory walks.

pub mod glob;

use globset::GlobSet;

use crate::path_set::PathSet;

use self::glob::{PatternStart, glob_set, normalize_pattern};

/// Patterns for VCS metadata and editor temp files, excluded unless a path
/// set disables default excludes.
pub const DEFAULT_EXCLUDES: &[&str] = &[
  // temporary files
  "**/*~",
  "**/#*#",
  "**/.#*",
  "**/%*%",
  "**/._*",
  // CVS
  "**/CVS",
  "**/CVS/**",
  "**/.cvsignore",
  // RCS
  "**/RCS",
  "**/RCS/**",
  // SCCS
  "**/SCCS",
  "**/SCCS/**",
  // Visual SourceSafe
  "**/vssver.scc",
  // Subversion
  "**/.svn",
  "**/.svn/**",
  // Arch
  "**/.arch-ids",
  "**/.arch-ids/**",
  // Bazaar
  "**/.bzr",
  "**/.bzr/**",
  "**/.bzrignore",
  // SurroundSCM
  "**/.MySCMServerInfo",
  // macOS
  "**/.DS_Store",
  // Serena Dimensions
  "**/.metadata",
  "**/.metadata/**",
  // Mercurial
  "**/.hg",
  "**/.hg/**",
  "**/.hgignore",
  "**/.hgsub",
  "**/.hgsubstate",
  "**/.hgtags",
  // git
  "**/.git",
  "**/.git/**",
  "**/.gitattributes",
  "**/.gitignore",
  "**/.gitmodules",
  // BitKeeper
  "**/BitKeeper",
  "**/BitKeeper/**",
  "**/ChangeSet",
  "**/ChangeSet/**",
  // darcs
  "**/_darcs",
  "**/_darcs/**",
  "**/.darcsrepo",
  "**/.darcsrepo/**",
  "**/-darcs-backup*",
  "**/.darcs-temp-mail",
];

const DEEP_TREE_SUFFIX: &str = "/**";

#[derive(Debug, Clone)]
pub struct Selector {
  includes: GlobSet,
  excludes: GlobSet,
  /// Leading segments of each include, for pruning.
  include_starts: Vec<PatternStart>,
  /// Excludes of the form `x/**`, compiled as `x`: everything below a match
  /// is excluded.
  excluded_trees: GlobSet,
}

impl Selector {
  pub fn new(path_set: &PathSet) -> Self {
    Self::from_patterns(
      path_set.includes(),
      path_set.excludes(),
      path_set.is_default_excludes(),
      path_set.is_case_sensitive(),
    )
  }

  pub fn from_patterns<S: AsRef<str>>(
    includes: &[S],
    excludes: &[S],
    default_excludes: bool,
    case_sensitive: bool,
  ) -> Self {
    let mut include_patterns = Vec::with_capacity(includes.len());
    for include in includes {
      push_unique(&mut include_patterns, normalize_pattern(include.as_ref()));
    }
    let mut exclude_patterns = Vec::with_capacity(excludes.len());
    for exclude in excludes {
      push_unique(&mut exclude_patterns, normalize_pattern(exclude.as_ref()));
    }
    if default_excludes {
      for exclude in DEFAULT_EXCLUDES {
        push_unique(&mut exclude_patterns, (*exclude).to_string());
      }
    }

    let trees: Vec<&str> = exclude_patterns
      .iter()
      .filter_map(|exclude| exclude.strip_suffix(DEEP_TREE_SUFFIX))
      .collect();

    Self {
      includes: glob_set(&include_patterns, case_sensitive),
      excludes: glob_set(&exclude_patterns, case_sensitive),
      include_starts: include_patterns
        .iter()
        .map(|include| PatternStart::new(include, case_sensitive))
        .collect(),
      excluded_trees: glob_set(&trees, case_sensitive),
    }
  }

  /// Whether `pathname` is matched by an include (or there are none) and by
  /// no exclude.
  pub fn is_selected(&self, pathname: &str) -> bool {
    if !self.includes.is_empty() && !self.includes.is_match(pathname) {
      return false;
    }
    !self.excludes.is_match(pathname)
  }

  /// Whether any descendant of the directory `pathname` could be selected.
  pub fn is_ancestor_of_potentially_selected(&self, pathname: &str) -> bool {
    if self.excluded_trees.is_match(pathname) {
      return false;
    }
    self.include_starts.is_empty() || self.include_starts.iter().any(|start| start.matches(pathname))
  }
}

fn push_unique(target: &mut Vec<String>, pattern: String) {
  if !target.contains(&pattern) {
    target.push(pattern);
  }
}
