//! Path resolution helpers.
//!
//! Inputs and outputs are tracked by absolute, lexically normalized paths so
//! that the same file always maps to the same key in the build state, no
//! matter how the caller spelled it. Paths relative to a path set's base
//! directory are represented as `/`-separated strings, which is what the glob
//! selector matches against.

use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding component. Symlinks are not resolved.
pub fn normalize(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => match out.components().next_back() {
        Some(Component::Normal(_)) => {
          out.pop();
        }
        Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
        _ => out.push(".."),
      },
      other => out.push(other.as_os_str()),
    }
  }
  out
}

/// Resolve a path to an absolute, normalized path. Relative paths are
/// resolved against the current working directory; the empty path denotes
/// the current working directory itself.
pub fn resolve(path: &Path) -> PathBuf {
  let absolute = if path.is_absolute() {
    path.to_path_buf()
  } else if path.as_os_str().is_empty() {
    std::env::current_dir().unwrap_or_default()
  } else {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
  };
  dunce::simplified(&normalize(&absolute)).to_path_buf()
}

/// Resolve `path` against `basedir` unless it is already absolute.
pub fn resolve_against(path: &Path, basedir: &Path) -> PathBuf {
  if path.is_absolute() {
    resolve(path)
  } else {
    resolve(&basedir.join(path))
  }
}

/// Express `file` relative to `basedir` as a `/`-separated string.
///
/// Returns `Some("")` when both denote the same directory and `None` when
/// `file` does not live below `basedir`.
pub fn relativize(file: &Path, basedir: &Path) -> Option<String> {
  let rest = file.strip_prefix(basedir).ok()?;
  let mut pathname = String::new();
  for component in rest.components() {
    match component {
      Component::Normal(name) => {
        if !pathname.is_empty() {
          pathname.push('/');
        }
        pathname.push_str(&name.to_string_lossy());
      }
      Component::CurDir => {}
      _ => return None,
    }
  }
  Some(pathname)
}

/// Join a `/`-separated relative pathname onto `basedir`.
///
/// The empty pathname denotes `basedir` itself.
pub fn join_relative(basedir: &Path, pathname: &str) -> PathBuf {
  let mut path = basedir.to_path_buf();
  for segment in pathname.split('/').filter(|s| !s.is_empty()) {
    path.push(segment);
  }
  path
}
