//! Chained configuration fingerprints.
//!
//! A [`Digester`] keeps a running SHA-256 digest `D`. Every operation hashes
//! its payload followed by `D` and makes the result the new `D`, so the final
//! digest depends on every value and on the order of operations.
//!
//! Set-valued operations (`*_set`, [`Digester::entries`]) hash each element on
//! its own and XOR the element digests before folding them in, which makes
//! them insensitive to iteration order. List-valued operations stay
//! order-sensitive.
//!
//! ```ignore
//! let digest = ctx
//!   .new_digester()
//!   .string(&encoding)
//!   .file_set(&filter_files)
//!   .value_bool(strict)
//!   .finish();
//! let changed = ctx.set_configuration(&paths, digest)?;
//! ```

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::state::FileState;
use crate::util::paths::{resolve, resolve_against};

/// Incremental, forkable fingerprint accumulator.
///
/// `Clone` copies the full chain state, so a shared prefix can be hashed once
/// and continued independently.
#[derive(Debug, Clone)]
pub struct Digester {
  hasher: Sha256,
  digest: Vec<u8>,
  basedir: PathBuf,
}

impl Default for Digester {
  fn default() -> Self {
    Self::new()
  }
}

impl Digester {
  pub fn new() -> Self {
    Self {
      hasher: Sha256::new(),
      digest: Sha256::digest(b"").to_vec(),
      basedir: resolve(Path::new("")),
    }
  }

  /// Fold the pending payload and the previous digest into a new digest.
  fn chain(&mut self) -> &mut Self {
    self.hasher.update(&self.digest);
    self.digest = self.hasher.finalize_reset().to_vec();
    self
  }

  /// Hash every element separately and feed the XOR of the element digests.
  fn update_unordered<T>(&mut self, items: impl IntoIterator<Item = T>, mut update: impl FnMut(&mut Self, T)) {
    let mut combined = vec![0u8; self.digest.len()];
    for item in items {
      update(self, item);
      let element = self.hasher.finalize_reset();
      for (dst, src) in combined.iter_mut().zip(element.iter()) {
        *dst ^= src;
      }
    }
    self.hasher.update(&combined);
  }

  fn update_i64(&mut self, value: i64) {
    self.hasher.update(value.to_le_bytes());
  }

  /// Length-prefixed so that adjacent strings cannot trade bytes.
  fn update_str(&mut self, value: &str) {
    self.hasher.update((value.len() as u64).to_le_bytes());
    self.hasher.update(value.as_bytes());
  }

  fn update_hash<T: Hash + ?Sized>(&mut self, value: &T) {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    self.hasher.update(hasher.finish().to_le_bytes());
  }

  /// Absolute path, then size and timestamp if it is an existing file.
  fn update_file(&mut self, file: &Path) {
    let file = resolve_against(file, &self.basedir);
    self.update_str(&file.to_string_lossy());
    if let Some(state) = FileState::of(&file).filter(|s| !s.directory) {
      self.update_i64(state.modified as i64);
      self.update_i64(state.size as i64);
    }
  }

  pub fn value_bool(&mut self, value: bool) -> &mut Self {
    self.hasher.update([u8::from(value)]);
    self.chain()
  }

  pub fn value_i64(&mut self, value: i64) -> &mut Self {
    self.update_i64(value);
    self.chain()
  }

  pub fn value_f64(&mut self, value: f64) -> &mut Self {
    self.value_i64(value.to_bits() as i64)
  }

  pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
    self.hasher.update(value);
    self.chain()
  }

  pub fn string(&mut self, value: &str) -> &mut Self {
    self.update_str(value);
    self.chain()
  }

  /// Order-sensitive list of strings.
  pub fn strings<I, S>(&mut self, values: I) -> &mut Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    for value in values {
      self.update_str(value.as_ref());
    }
    self.chain()
  }

  /// Order-insensitive set of strings.
  pub fn string_set<I, S>(&mut self, values: I) -> &mut Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    self.update_unordered(values, |d, v| d.update_str(v.as_ref()));
    self.chain()
  }

  /// Base directory for resolving relative files; `None` resets it to the
  /// current directory.
  pub fn basedir(&mut self, dir: Option<&Path>) -> &mut Self {
    self.basedir = resolve(dir.unwrap_or(Path::new("")));
    self
  }

  /// A file's absolute path plus, if it exists, its size and timestamp.
  pub fn file(&mut self, file: impl AsRef<Path>) -> &mut Self {
    self.update_file(file.as_ref());
    self.chain()
  }

  /// Order-sensitive list of files.
  pub fn files<I, P>(&mut self, files: I) -> &mut Self
  where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
  {
    for file in files {
      self.update_file(file.as_ref());
    }
    self.chain()
  }

  /// Order-insensitive set of files.
  pub fn file_set<I, P>(&mut self, files: I) -> &mut Self
  where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
  {
    self.update_unordered(files, |d, f| d.update_file(f.as_ref()));
    self.chain()
  }

  /// A value's [`Hash`]. Only stable for a given toolchain, so prefer the typed
  /// operations for anything that must survive a compiler upgrade.
  pub fn hash<T: Hash + ?Sized>(&mut self, value: &T) -> &mut Self {
    self.update_hash(value);
    self.chain()
  }

  /// Order-sensitive list of hashable values.
  pub fn hashes<I>(&mut self, values: I) -> &mut Self
  where
    I: IntoIterator,
    I::Item: Hash,
  {
    for value in values {
      self.update_hash(&value);
    }
    self.chain()
  }

  /// Order-insensitive set of hashable values.
  pub fn hash_set<I>(&mut self, values: I) -> &mut Self
  where
    I: IntoIterator,
    I::Item: Hash,
  {
    self.update_unordered(values, |d, v| d.update_hash(&v));
    self.chain()
  }

  /// Order-insensitive map of string keys to string values.
  pub fn entries<I, K, V>(&mut self, entries: I) -> &mut Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
  {
    self.update_unordered(entries, |d, (k, v)| {
      d.update_str(k.as_ref());
      d.update_str(v.as_ref());
    });
    self.chain()
  }

  /// Return the current digest and restart the chain.
  pub fn finish(&mut self) -> Vec<u8> {
    self.hasher.reset();
    let empty = Sha256::digest(b"").to_vec();
    std::mem::replace(&mut self.digest, empty)
  }
}
