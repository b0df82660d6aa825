//! Directory walking and input staleness resolution.
//!
//! [`DirectoryScan`] walks a path set's base directory in file-name order,
//! pruning directories that cannot contain selected entries. Files and empty
//! directories are leaves; non-empty directories are reported only when the
//! path set includes directories.
//!
//! [`resolve_inputs`] runs a scan against a [`BuildGraph`] and reports the
//! inputs that need processing, plus previously known inputs that are gone.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::path_set::PathSet;
use crate::selector::Selector;
use crate::state::BuildGraph;
use crate::util::paths::relativize;

/// A selected entry found by a [`DirectoryScan`].
#[derive(Debug, Clone, Copy)]
pub struct ScanItem<'a> {
  /// `/`-separated path relative to the base directory; empty for the base
  /// directory itself.
  pub pathname: &'a str,
  pub path: &'a Path,
  pub is_dir: bool,
}

#[derive(Debug, Clone)]
pub struct DirectoryScan {
  basedir: PathBuf,
  selector: Selector,
  include_files: bool,
  include_directories: bool,
}

impl DirectoryScan {
  pub fn new(path_set: &PathSet) -> Self {
    Self {
      basedir: path_set.basedir().to_path_buf(),
      selector: Selector::new(path_set),
      include_files: path_set.is_including_files(),
      include_directories: path_set.is_including_directories(),
    }
  }

  pub fn selector(&self) -> &Selector {
    &self.selector
  }

  /// Walk the base directory and call `on_item` for every selected entry.
  ///
  /// A missing base directory yields nothing. Unreadable entries are skipped.
  pub fn run(&self, mut on_item: impl FnMut(ScanItem<'_>)) {
    if !self.basedir.is_dir() {
      debug!(path = %self.basedir.display(), "base directory does not exist, nothing to scan");
      return;
    }

    if self.include_directories && self.selector.is_selected("") {
      on_item(ScanItem {
        pathname: "",
        path: &self.basedir,
        is_dir: true,
      });
    }

    let mut walker = WalkDir::new(&self.basedir)
      .min_depth(1)
      .follow_links(true)
      .sort_by_file_name()
      .into_iter();

    while let Some(entry) = walker.next() {
      let entry = match entry {
        Ok(entry) => entry,
        Err(e) => {
          debug!(error = %e, "skipping unreadable entry");
          continue;
        }
      };
      let Some(pathname) = relativize(entry.path(), &self.basedir) else {
        continue;
      };

      if !entry.file_type().is_dir() {
        if self.include_files && self.selector.is_selected(&pathname) {
          on_item(ScanItem {
            pathname: &pathname,
            path: entry.path(),
            is_dir: false,
          });
        }
        continue;
      }

      let reportable = if is_empty_dir(entry.path()) {
        self.include_files || self.include_directories
      } else {
        self.include_directories
      };
      if reportable && self.selector.is_selected(&pathname) {
        on_item(ScanItem {
          pathname: &pathname,
          path: entry.path(),
          is_dir: true,
        });
      }

      if !self.selector.is_ancestor_of_potentially_selected(&pathname) {
        walker.skip_current_dir();
      }
    }
  }

  /// Absolute paths of every selected entry.
  pub fn collect(&self) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    self.run(|item| paths.push(item.path.to_path_buf()));
    paths
  }
}

fn is_empty_dir(path: &Path) -> bool {
  fs::read_dir(path)
    .map(|mut entries| entries.next().is_none())
    .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
  Present,
  Deleted,
}

/// A scan result relative to the path set's base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedPath {
  pub pathname: String,
  pub state: PathState,
}

impl ScannedPath {
  pub fn is_deleted(&self) -> bool {
    self.state == PathState::Deleted
  }
}

/// Scan `path_set` and classify its entries against `graph`.
///
/// Present entries are reported when `full_build` is set or the graph says
/// they need processing. Inputs known to the graph that the path set selects
/// but the scan did not find are reported as deleted. A directory input that
/// still exists is never deleted by a path set that cannot see it.
pub fn resolve_inputs(path_set: &PathSet, graph: &BuildGraph, full_build: bool) -> Vec<ScannedPath> {
  let scan = DirectoryScan::new(path_set);
  let mut dirty = Vec::new();
  let mut observed: HashSet<PathBuf> = HashSet::new();

  scan.run(|item| {
    observed.insert(item.path.to_path_buf());
    if full_build || graph.is_processing_required(item.path) {
      dirty.push(ScannedPath {
        pathname: item.pathname.to_string(),
        state: PathState::Present,
      });
    }
  });

  let include_files = path_set.is_including_files();
  let include_directories = path_set.is_including_directories();
  for (input, state) in graph.input_states() {
    if !state.directory && !include_files {
      continue;
    }
    // Only empty directories are visible to a scan without directories.
    if state.directory && !include_directories && input.is_dir() && !is_empty_dir(input) {
      continue;
    }
    if observed.contains(input) {
      continue;
    }
    let Some(pathname) = relativize(input, path_set.basedir()) else {
      continue;
    };
    if scan.selector().is_selected(&pathname) {
      dirty.push(ScannedPath {
        pathname,
        state: PathState::Deleted,
      });
    }
  }

  dirty
}
