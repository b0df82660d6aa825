//! Build context creation and build state sharing.
//!
//! The manager caches one [`BuildState`] per state file for as long as some
//! open context uses it, so that nested or sibling builds against the same
//! output directory and builder see each other's work. A [`ContextScope`]
//! tracks the contexts opened along one call chain and routes outputs from
//! code that has no context handle to the context owning the output.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, warn};

use crate::config::full_build_from_env;
use crate::consts::STATE_FILE_EXT;
use crate::context::{BuildContext, ContextInner};
use crate::digest::Digester;
use crate::error::BuildError;
use crate::output::IncrementalFileOutputStream;
use crate::sink::{MessageSink, NoopOutputListener, OutputListener, TracingMessageSink};
use crate::state::{BuildState, Message, Severity};
use crate::util::paths::resolve;

/// Decides from (output directory, state directory, builder id) whether a new
/// context must ignore all previous state.
pub type FullBuildPolicy = dyn Fn(&Path, &Path, &str) -> bool + Send + Sync;

pub(crate) struct ManagerInner {
  states: Mutex<HashMap<PathBuf, Weak<BuildState>>>,
  pub(crate) sink: Arc<dyn MessageSink>,
  pub(crate) listener: Arc<dyn OutputListener>,
  full_build_policy: Box<FullBuildPolicy>,
}

impl ManagerInner {
  fn states(&self) -> MutexGuard<'_, HashMap<PathBuf, Weak<BuildState>>> {
    self.states.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// The cached state for `state_file`, or a freshly loaded one. A full build
  /// always starts from an empty state and replaces the cache entry.
  fn state(&self, state_file: &Path, full_build: bool) -> Arc<BuildState> {
    let mut states = self.states();
    states.retain(|_, state| state.strong_count() > 0);

    if !full_build {
      if let Some(state) = states.get(state_file).and_then(Weak::upgrade) {
        debug!(path = %state_file.display(), "reusing cached build state");
        return state;
      }
    }

    let state = Arc::new(if full_build {
      BuildState::empty(state_file)
    } else {
      BuildState::load(state_file)
    });
    states.insert(state_file.to_path_buf(), Arc::downgrade(&state));
    state
  }

  /// Forget `state` and delete its file.
  pub(crate) fn discard_state(&self, state: &Arc<BuildState>) {
    {
      let mut states = self.states();
      let cached = states
        .get(state.state_file())
        .is_some_and(|cached| Weak::ptr_eq(cached, &Arc::downgrade(state)));
      if cached {
        states.remove(state.state_file());
      }
    }

    if let Err(e) = state.discard() {
      warn!(path = %state.state_file().display(), error = %e, "failed to discard build state");
    }
  }
}

/// Creates [`BuildContext`]s and shares build states between them.
///
/// Cloning is cheap; clones share the state cache and collaborators.
#[derive(Clone)]
pub struct BuildContextManager {
  inner: Arc<ManagerInner>,
}

impl BuildContextManager {
  /// A manager that logs messages through `tracing`, ignores output updates
  /// and forces full builds when `BUILDGUARD_FULL_BUILD` is set.
  pub fn new() -> Self {
    Self::builder().build()
  }

  pub fn builder() -> ManagerBuilder {
    ManagerBuilder::default()
  }

  /// Location of the state file for an (output directory, builder) pair:
  /// `<state_directory>/<digest(output_directory)>-<digest(builder_id)>.json`.
  pub fn state_file(output_directory: &Path, state_directory: &Path, builder_id: &str) -> PathBuf {
    let mut digester = Digester::new();
    let output = hex::encode(digester.string(&resolve(output_directory).to_string_lossy()).finish());
    let builder = hex::encode(digester.string(builder_id).finish());
    resolve(state_directory).join(format!("{output}-{builder}.{STATE_FILE_EXT}"))
  }

  /// Open a build context for `builder_id` writing below `output_directory`,
  /// with its state kept in `state_directory`.
  pub fn new_context(
    &self,
    output_directory: impl AsRef<Path>,
    state_directory: impl AsRef<Path>,
    builder_id: &str,
  ) -> Result<BuildContext, BuildError> {
    if builder_id.is_empty() {
      return Err(BuildError::InvalidArgument("builder id not specified".to_string()));
    }

    let output_directory = resolve(output_directory.as_ref());
    let state_directory = resolve(state_directory.as_ref());
    let full_build = (self.inner.full_build_policy)(&output_directory, &state_directory, builder_id);
    let state_file = Self::state_file(&output_directory, &state_directory, builder_id);
    let state = self.inner.state(&state_file, full_build);

    debug!(
      output_dir = %output_directory.display(),
      state_file = %state_file.display(),
      builder_id,
      full_build,
      "opened build context"
    );
    Ok(BuildContext::new(ContextInner::new(
      self.inner.clone(),
      output_directory,
      state,
      full_build,
    )))
  }

  /// A fresh registry for one call chain.
  pub fn scope(&self) -> ContextScope {
    ContextScope {
      manager: self.clone(),
      open: Arc::new(Mutex::new(BTreeMap::new())),
    }
  }
}

impl Default for BuildContextManager {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for BuildContextManager {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BuildContextManager")
      .field("cached_states", &self.inner.states().len())
      .finish_non_exhaustive()
  }
}

pub struct ManagerBuilder {
  sink: Arc<dyn MessageSink>,
  listener: Arc<dyn OutputListener>,
  full_build_policy: Box<FullBuildPolicy>,
}

impl Default for ManagerBuilder {
  fn default() -> Self {
    Self {
      sink: Arc::new(TracingMessageSink),
      listener: Arc::new(NoopOutputListener),
      full_build_policy: Box::new(|_: &Path, _: &Path, _: &str| full_build_from_env()),
    }
  }
}

impl ManagerBuilder {
  pub fn message_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
    self.sink = sink;
    self
  }

  pub fn output_listener(mut self, listener: Arc<dyn OutputListener>) -> Self {
    self.listener = listener;
    self
  }

  pub fn full_build_policy(mut self, policy: impl Fn(&Path, &Path, &str) -> bool + Send + Sync + 'static) -> Self {
    self.full_build_policy = Box::new(policy);
    self
  }

  pub fn build(self) -> BuildContextManager {
    BuildContextManager {
      inner: Arc::new(ManagerInner {
        states: Mutex::new(HashMap::new()),
        sink: self.sink,
        listener: self.listener,
        full_build_policy: self.full_build_policy,
      }),
    }
  }
}

type Registry = BTreeMap<PathBuf, Weak<ContextInner>>;

/// The contexts opened along one logical call chain.
///
/// Clones share the registry; [`child`](Self::child) starts a new registry
/// seeded with the parent's open contexts. Contexts are held weakly, so a
/// dropped or closed context simply stops receiving anything.
#[derive(Clone)]
pub struct ContextScope {
  manager: BuildContextManager,
  open: Arc<Mutex<Registry>>,
}

impl ContextScope {
  fn open(&self) -> MutexGuard<'_, Registry> {
    self.open.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Like [`BuildContextManager::new_context`], and register the context
  /// under its output directory.
  pub fn new_context(
    &self,
    output_directory: impl AsRef<Path>,
    state_directory: impl AsRef<Path>,
    builder_id: &str,
  ) -> Result<BuildContext, BuildError> {
    let context = self.manager.new_context(output_directory, state_directory, builder_id)?;
    self
      .open()
      .insert(context.output_directory().to_path_buf(), Arc::downgrade(context.inner()));
    Ok(context)
  }

  /// A scope for nested work that sees the contexts open here, but whose own
  /// contexts stay invisible to this scope.
  pub fn child(&self) -> ContextScope {
    let open = self.open().clone();
    ContextScope {
      manager: self.manager.clone(),
      open: Arc::new(Mutex::new(open)),
    }
  }

  /// Open contexts, deepest output directory first.
  fn live_contexts(&self) -> Vec<Arc<ContextInner>> {
    let mut open = self.open();
    open.retain(|_, context| context.upgrade().is_some_and(|c| c.is_open()));
    open.values().rev().filter_map(Weak::upgrade).collect()
  }

  /// The open context whose output directory is the deepest ancestor of `output`.
  fn context_for_output(&self, output: &Path) -> Option<Arc<ContextInner>> {
    self
      .live_contexts()
      .into_iter()
      .find(|context| output.starts_with(context.output_directory()))
  }

  fn context_for_input(&self, input: &Path) -> Option<Arc<ContextInner>> {
    self
      .live_contexts()
      .into_iter()
      .find(|context| context.is_tracking(input))
  }

  pub fn add_output(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<(), BuildError> {
    self.add_outputs(input, [output])
  }

  /// Register each output with the context owning it. Outputs outside every
  /// open context are reported to the output listener right away.
  pub fn add_outputs<I, P>(&self, input: impl AsRef<Path>, outputs: I) -> Result<(), BuildError>
  where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
  {
    let input = input.as_ref();
    let mut routed: BTreeMap<PathBuf, (Arc<ContextInner>, Vec<PathBuf>)> = BTreeMap::new();
    let mut unowned = Vec::new();

    for output in outputs {
      let output = resolve(output.as_ref());
      match self.context_for_output(&output) {
        Some(context) => {
          routed
            .entry(context.output_directory().to_path_buf())
            .or_insert_with(|| (context.clone(), Vec::new()))
            .1
            .push(output);
        }
        None => unowned.push(output),
      }
    }

    for (context, outputs) in routed.into_values() {
      context.add_outputs(input, outputs)?;
    }
    if !unowned.is_empty() {
      debug!(outputs = unowned.len(), "outputs outside any open build context");
      self.manager.inner.listener.outputs_updated(&unowned);
    }
    Ok(())
  }

  /// An incremental stream recorded by the context owning `output`, or
  /// reported straight to the output listener if no context owns it.
  pub fn new_output_stream(&self, output: impl AsRef<Path>) -> Result<IncrementalFileOutputStream, BuildError> {
    let output = resolve(output.as_ref());
    match self.context_for_output(&output) {
      Some(context) => context.new_output_stream(&output),
      None => IncrementalFileOutputStream::for_listener(output.clone(), self.manager.inner.listener.clone())
        .map_err(|e| BuildError::io(output, e)),
    }
  }

  /// Report a diagnostic to the open context tracking `input`; without one
  /// the message is only logged.
  pub fn add_message(
    &self,
    input: impl AsRef<Path>,
    line: u32,
    column: u32,
    text: impl Into<String>,
    severity: Severity,
    cause: Option<&dyn fmt::Display>,
  ) -> Result<(), BuildError> {
    let input = resolve(input.as_ref());
    let mut message = Message::new(line, column, text, severity);
    if let Some(cause) = cause {
      message = message.with_cause(cause);
    }

    match self.context_for_input(&input) {
      Some(context) => context.add_message(&input, message),
      None => {
        self.manager.inner.sink.log_message(&input, &message);
        Ok(())
      }
    }
  }

  pub fn clear_messages(&self, input: impl AsRef<Path>) -> Result<(), BuildError> {
    let input = resolve(input.as_ref());
    match self.context_for_input(&input) {
      Some(context) => context.clear_messages(&input),
      None => Ok(()),
    }
  }
}

impl fmt::Debug for ContextScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let open: Vec<PathBuf> = self.open().keys().cloned().collect();
    f.debug_struct("ContextScope").field("open", &open).finish()
  }
}
