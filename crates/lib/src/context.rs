//! The per-invocation build transaction.
//!
//! A [`BuildContext`] stages everything a build reports (processed and
//! deleted inputs, outputs, referenced inputs, messages, configuration
//! digests and user values) and folds it into the shared [`BuildState`] on
//! [`commit`](BuildContext::commit). Closing a context that was never
//! committed throws the build state away, so the next build starts over.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::digest::Digester;
use crate::error::BuildError;
use crate::manager::ManagerInner;
use crate::output::IncrementalFileOutputStream;
use crate::path_set::PathSet;
use crate::scan::{DirectoryScan, resolve_inputs};
use crate::state::graph::{PathMap, PathSetMap};
use crate::state::{BuildState, Message, Severity};
use crate::util::paths::{join_relative, resolve, resolve_against};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Status {
  #[default]
  Open,
  Committed,
  Closed,
}

/// Everything reported during a build, applied at commit.
#[derive(Default)]
struct Staging {
  status: Status,
  path_sets: Vec<PathSet>,
  /// Inputs to keep, with the outputs registered for them in this build.
  processed: PathSetMap,
  deleted: BTreeSet<PathBuf>,
  referenced: PathSetMap,
  /// Inputs whose messages were cleared, with the messages added since.
  messages: PathMap<Vec<Message>>,
  configurations: HashMap<PathSet, Vec<u8>>,
  values: BTreeMap<String, Option<Value>>,
  /// Outputs written through incremental streams, and whether their content changed.
  written: PathMap<bool>,
}

impl Staging {
  fn ensure_open(&self) -> Result<(), BuildError> {
    match self.status {
      Status::Open => Ok(()),
      Status::Committed => Err(BuildError::Committed),
      Status::Closed => Err(BuildError::Closed),
    }
  }
}

pub(crate) struct ContextInner {
  manager: Arc<ManagerInner>,
  output_directory: PathBuf,
  state: Arc<BuildState>,
  full_build: bool,
  staging: Mutex<Staging>,
}

impl ContextInner {
  pub(crate) fn new(
    manager: Arc<ManagerInner>,
    output_directory: PathBuf,
    state: Arc<BuildState>,
    full_build: bool,
  ) -> Self {
    Self {
      manager,
      output_directory,
      state,
      full_build,
      staging: Mutex::new(Staging::default()),
    }
  }

  fn staging(&self) -> MutexGuard<'_, Staging> {
    self.staging.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn output_directory(&self) -> &Path {
    &self.output_directory
  }

  pub(crate) fn state(&self) -> &Arc<BuildState> {
    &self.state
  }

  pub(crate) fn is_open(&self) -> bool {
    self.staging().status == Status::Open
  }

  /// Whether `input` was handed out by `get_inputs` or had outputs,
  /// references or messages reported in this build.
  pub(crate) fn is_tracking(&self, input: &Path) -> bool {
    let staging = self.staging();
    staging.processed.contains_key(input)
      || staging.referenced.contains_key(input)
      || staging.messages.contains_key(input)
  }

  fn set_configuration(&self, paths: &PathSet, digest: Vec<u8>) -> Result<bool, BuildError> {
    let mut staging = self.staging();
    staging.ensure_open()?;
    let changed = match staging.configurations.get(paths) {
      Some(staged) => *staged != digest,
      None => self.state.lock().configuration(paths) != Some(digest.as_slice()),
    };
    staging.configurations.insert(paths.clone(), digest);
    Ok(changed)
  }

  fn get_inputs(&self, paths: &PathSet, full_build: bool) -> Result<Vec<String>, BuildError> {
    let mut staging = self.staging();
    staging.ensure_open()?;

    let scanned = {
      let graph = self.state.lock();
      resolve_inputs(paths, &graph, full_build || self.full_build)
    };

    let mut inputs = Vec::new();
    let mut deleted = 0usize;
    for path in scanned {
      let file = join_relative(paths.basedir(), &path.pathname);
      if path.is_deleted() {
        staging.deleted.insert(file);
        deleted += 1;
      } else {
        staging.processed.entry(file).or_default();
        inputs.push(path.pathname);
      }
    }
    if !staging.path_sets.contains(paths) {
      staging.path_sets.push(paths.clone());
    }

    debug!(
      basedir = %paths.basedir().display(),
      inputs = inputs.len(),
      deleted,
      "resolved inputs"
    );
    Ok(inputs)
  }

  pub(crate) fn add_outputs(&self, input: &Path, outputs: Vec<PathBuf>) -> Result<(), BuildError> {
    let input = resolve(input);
    let outputs = outputs
      .into_iter()
      .map(|output| resolve_against(&output, &self.output_directory));

    let mut staging = self.staging();
    staging.ensure_open()?;
    staging.processed.entry(input).or_default().extend(outputs);
    Ok(())
  }

  pub(crate) fn new_output_stream(self: &Arc<Self>, output: &Path) -> Result<IncrementalFileOutputStream, BuildError> {
    let output = resolve_against(output, &self.output_directory);
    self.staging().ensure_open()?;
    IncrementalFileOutputStream::for_context(output.clone(), Arc::downgrade(self)).map_err(|e| BuildError::io(output, e))
  }

  fn add_referenced_inputs(&self, input: &Path, referenced: Vec<PathBuf>) -> Result<(), BuildError> {
    let input = resolve(input);
    let mut staging = self.staging();
    staging.ensure_open()?;
    staging
      .referenced
      .entry(input)
      .or_default()
      .extend(referenced.iter().map(|r| resolve(r)));
    Ok(())
  }

  pub(crate) fn add_message(&self, input: &Path, message: Message) -> Result<(), BuildError> {
    let input = resolve(input);
    {
      let mut staging = self.staging();
      staging.ensure_open()?;
      let Some(messages) = staging.messages.get_mut(&input) else {
        return Err(BuildError::MessagesNotCleared { input });
      };
      messages.push(message.clone());
    }
    self.manager.sink.log_message(&input, &message);
    Ok(())
  }

  pub(crate) fn clear_messages(&self, input: &Path) -> Result<(), BuildError> {
    let mut staging = self.staging();
    staging.ensure_open()?;
    staging.messages.insert(resolve(input), Vec::new());
    Ok(())
  }

  fn value(&self, key: &str) -> Option<Value> {
    if let Some(staged) = self.staging().values.get(key) {
      return staged.clone();
    }
    self.state.lock().value(key).cloned()
  }

  fn set_value(&self, key: String, value: Option<Value>) -> Result<(), BuildError> {
    let mut staging = self.staging();
    staging.ensure_open()?;
    staging.values.insert(key, value);
    Ok(())
  }

  /// Called by an incremental output stream when it is closed.
  pub(crate) fn record_written(&self, output: &Path, modified: bool) -> Result<(), BuildError> {
    let mut staging = self.staging();
    staging.ensure_open()?;
    *staging.written.entry(output.to_path_buf()).or_default() |= modified;
    Ok(())
  }

  fn commit(&self) -> Result<(), BuildError> {
    let mut staging = self.staging();
    match staging.status {
      Status::Open => {}
      Status::Committed => return Ok(()),
      Status::Closed => return Err(BuildError::Closed),
    }
    staging.status = Status::Committed;

    let path_sets = std::mem::take(&mut staging.path_sets);
    let processed = std::mem::take(&mut staging.processed);
    let deleted_inputs = std::mem::take(&mut staging.deleted);
    let mut referenced = std::mem::take(&mut staging.referenced);
    let mut messages = std::mem::take(&mut staging.messages);
    let configurations = std::mem::take(&mut staging.configurations);
    let values = std::mem::take(&mut staging.values);
    let written = std::mem::take(&mut staging.written);
    drop(staging);

    let mut stale = Vec::new();
    let (errors, replay) = {
      let mut graph = self.state.lock();

      for (paths, digest) in configurations {
        graph.set_configuration(&paths, digest);
      }
      for (key, value) in values {
        graph.set_value(&key, value);
      }

      for (input, outputs) in &processed {
        stale.extend(graph.set_outputs(input, outputs.iter().cloned()));
        graph.set_referenced_inputs(input, referenced.remove(input).unwrap_or_default());
      }
      for (input, refs) in referenced {
        graph.set_referenced_inputs(&input, refs);
      }
      for input in &deleted_inputs {
        stale.extend(graph.remove_input(input));
      }
      graph.cleanup_referenced_inputs();

      // Deleted inputs take their messages with them.
      messages.retain(|input, _| !deleted_inputs.contains(input));
      let revisited: BTreeSet<PathBuf> = messages.keys().cloned().collect();
      let previous = graph.merge_messages(messages);
      let mut replay = graph.selected_messages(&path_sets, &previous);
      replay.retain(|input, _| !revisited.contains(input));

      (graph.error_count(&path_sets), replay)
    };

    let deleted_outputs = delete_outputs(stale);
    self.state.save()?;

    let mut updated: BTreeSet<PathBuf> = processed
      .values()
      .flatten()
      .filter(|output| written.get(*output) != Some(&false))
      .cloned()
      .collect();
    updated.extend(
      written
        .iter()
        .filter(|(_, modified)| **modified)
        .map(|(output, _)| output.clone()),
    );
    updated.extend(deleted_outputs.iter().cloned());
    if !updated.is_empty() {
      let updated: Vec<PathBuf> = updated.into_iter().collect();
      self.manager.listener.outputs_updated(&updated);
    }

    for (input, messages) in &replay {
      for message in messages {
        self.manager.sink.log_message(input, message);
      }
    }

    info!(
      output_dir = %self.output_directory.display(),
      inputs = processed.len(),
      deleted_inputs = deleted_inputs.len(),
      deleted_outputs = deleted_outputs.len(),
      errors,
      "committed build"
    );

    if errors > 0 {
      return Err(BuildError::BuildFailed { errors });
    }
    Ok(())
  }

  pub(crate) fn close(&self) {
    let previous = {
      let mut staging = self.staging();
      std::mem::replace(&mut staging.status, Status::Closed)
    };

    match previous {
      Status::Open => {
        debug!(
          output_dir = %self.output_directory.display(),
          "build context closed without commit, discarding build state"
        );
        self.manager.discard_state(&self.state);
      }
      Status::Committed => {
        debug!(output_dir = %self.output_directory.display(), "closed build context");
      }
      Status::Closed => {}
    }
  }
}

/// Delete stale outputs, deepest paths first so that directories are emptied
/// before they are removed. Returns the outputs that are gone afterwards.
fn delete_outputs(mut outputs: Vec<PathBuf>) -> Vec<PathBuf> {
  outputs.sort_by(|a, b| {
    b.components()
      .count()
      .cmp(&a.components().count())
      .then_with(|| a.cmp(b))
  });
  outputs.dedup();

  let mut deleted = Vec::with_capacity(outputs.len());
  for output in outputs {
    let result = if output.is_dir() {
      fs::remove_dir(&output)
    } else {
      fs::remove_file(&output)
    };
    match result {
      Ok(()) => {
        debug!(path = %output.display(), "deleted stale output");
        deleted.push(output);
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => deleted.push(output),
      Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => {
        debug!(path = %output.display(), "stale output directory is not empty, keeping it");
      }
      Err(e) => {
        warn!(path = %output.display(), error = %e, "failed to delete stale output");
      }
    }
  }
  deleted
}

/// One build invocation against the state of an (output directory, builder)
/// pair.
///
/// Dropping the context closes it.
pub struct BuildContext {
  inner: Arc<ContextInner>,
}

impl BuildContext {
  pub(crate) fn new(inner: ContextInner) -> Self {
    Self { inner: Arc::new(inner) }
  }

  pub(crate) fn inner(&self) -> &Arc<ContextInner> {
    &self.inner
  }

  pub fn output_directory(&self) -> &Path {
    self.inner.output_directory()
  }

  /// Whether every selected input is reprocessed regardless of its state.
  pub fn is_full_build(&self) -> bool {
    self.inner.full_build
  }

  pub fn new_digester(&self) -> Digester {
    Digester::new()
  }

  /// Record the configuration digest for `paths`. Returns `true` if it
  /// differs from the digest recorded by the previous build, in which case
  /// the caller should request a full build of `paths`.
  pub fn set_configuration(&self, paths: &PathSet, digest: impl Into<Vec<u8>>) -> Result<bool, BuildError> {
    self.inner.set_configuration(paths, digest.into())
  }

  /// Pathnames, relative to the base directory of `paths`, of the selected
  /// inputs that need processing.
  ///
  /// Every returned input is kept at commit even if no outputs are added for
  /// it. Inputs that vanished since the last build are scheduled for removal
  /// along with their outputs.
  pub fn get_inputs(&self, paths: &PathSet, full_build: bool) -> Result<Vec<String>, BuildError> {
    self.inner.get_inputs(paths, full_build)
  }

  /// Open an incremental stream for `output`, resolved against the output
  /// directory. Parent directories are created.
  pub fn new_output_stream(&self, output: impl AsRef<Path>) -> Result<IncrementalFileOutputStream, BuildError> {
    self.inner.new_output_stream(output.as_ref())
  }

  pub fn add_output(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<(), BuildError> {
    self
      .inner
      .add_outputs(input.as_ref(), vec![output.as_ref().to_path_buf()])
  }

  /// Register `outputs` as produced by `input`. Relative outputs are resolved
  /// against the output directory.
  pub fn add_outputs<I, P>(&self, input: impl AsRef<Path>, outputs: I) -> Result<(), BuildError>
  where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
  {
    let outputs = outputs.into_iter().map(|o| o.as_ref().to_path_buf()).collect();
    self.inner.add_outputs(input.as_ref(), outputs)
  }

  /// Register every entry selected by `outputs` as produced by `input`.
  pub fn add_output_set(&self, input: impl AsRef<Path>, outputs: &PathSet) -> Result<Vec<PathBuf>, BuildError> {
    let found = DirectoryScan::new(outputs).collect();
    self.inner.add_outputs(input.as_ref(), found.clone())?;
    Ok(found)
  }

  /// Record files `input` depends on, so that changes to them cause `input`
  /// to be processed again.
  pub fn add_referenced_inputs<I, P>(&self, input: impl AsRef<Path>, referenced: I) -> Result<(), BuildError>
  where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
  {
    let referenced = referenced.into_iter().map(|r| r.as_ref().to_path_buf()).collect();
    self.inner.add_referenced_inputs(input.as_ref(), referenced)
  }

  /// Report a diagnostic for `input`. Must be preceded by
  /// [`clear_messages`](Self::clear_messages) for the same input.
  pub fn add_message(
    &self,
    input: impl AsRef<Path>,
    line: u32,
    column: u32,
    text: impl Into<String>,
    severity: Severity,
    cause: Option<&dyn fmt::Display>,
  ) -> Result<(), BuildError> {
    let mut message = Message::new(line, column, text, severity);
    if let Some(cause) = cause {
      message = message.with_cause(cause);
    }
    self.inner.add_message(input.as_ref(), message)
  }

  /// Drop the messages of `input` from previous builds.
  pub fn clear_messages(&self, input: impl AsRef<Path>) -> Result<(), BuildError> {
    self.inner.clear_messages(input.as_ref())
  }

  /// A value stored by this or a previous build.
  pub fn value(&self, key: &str) -> Option<Value> {
    self.inner.value(key)
  }

  /// Store a value for the next build; `None` removes it.
  pub fn set_value(&self, key: impl Into<String>, value: Option<Value>) -> Result<(), BuildError> {
    self.inner.set_value(key.into(), value)
  }

  /// Apply everything reported in this build to the build state, delete
  /// stale outputs and save the state.
  ///
  /// Fails with [`BuildError::BuildFailed`] if error messages remain for
  /// inputs selected by the path sets passed to
  /// [`get_inputs`](Self::get_inputs); the state is saved regardless.
  /// Committing again is a no-op.
  pub fn commit(&self) -> Result<(), BuildError> {
    self.inner.commit()
  }

  /// Release the context. Without a prior commit, the build state is
  /// discarded and the next build is a full build.
  pub fn close(&self) {
    self.inner.close();
  }
}

impl Drop for BuildContext {
  fn drop(&mut self) {
    self.inner.close();
  }
}

impl fmt::Debug for BuildContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BuildContext")
      .field("output_directory", &self.inner.output_directory)
      .field("state_file", &self.inner.state.state_file())
      .field("full_build", &self.inner.full_build)
      .finish()
  }
}
