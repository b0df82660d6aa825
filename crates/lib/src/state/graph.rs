//! The input/output dependency graph of one build state.
//!
//! `outputs_by_input` and `inputs_by_output` are exact inverses of each other.
//! An output disappears from the graph as soon as its last input lets go of it,
//! and the caller receives it back so it can be deleted from disk.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::path_set::PathSet;
use crate::selector::Selector;
use crate::util::paths::relativize;

use super::file_state::{FileState, is_changed_or_deleted};
use super::message::Message;

pub type PathMap<T> = BTreeMap<PathBuf, T>;
pub type PathSetMap = BTreeMap<PathBuf, BTreeSet<PathBuf>>;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BuildGraph {
  pub(crate) configurations: HashMap<PathSet, Vec<u8>>,
  pub(crate) values: BTreeMap<String, Value>,
  pub(crate) messages: PathMap<Vec<Message>>,
  pub(crate) input_states: PathMap<FileState>,
  pub(crate) inputs_by_output: PathSetMap,
  pub(crate) outputs_by_input: PathSetMap,
  pub(crate) referenced_inputs: PathSetMap,
  pub(crate) referenced_input_states: PathMap<FileState>,
}

impl BuildGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Recompute `outputs_by_input` from `inputs_by_output`.
  pub(crate) fn rebuild_outputs_by_input(&mut self) {
    self.outputs_by_input.clear();
    for (output, inputs) in &self.inputs_by_output {
      for input in inputs {
        self
          .outputs_by_input
          .entry(input.clone())
          .or_default()
          .insert(output.clone());
      }
    }
  }

  /// Store the configuration digest for `paths`. Returns `true` if it differs
  /// from the previously stored digest or none was stored.
  pub fn set_configuration(&mut self, paths: &PathSet, digest: Vec<u8>) -> bool {
    let changed = self.configurations.get(paths) != Some(&digest);
    self.configurations.insert(paths.clone(), digest);
    changed
  }

  pub fn configuration(&self, paths: &PathSet) -> Option<&[u8]> {
    self.configurations.get(paths).map(Vec::as_slice)
  }

  pub fn value(&self, key: &str) -> Option<&Value> {
    self.values.get(key)
  }

  /// Store or (with `None`) remove a value, returning the previous one.
  pub fn set_value(&mut self, key: &str, value: Option<Value>) -> Option<Value> {
    match value {
      Some(value) => self.values.insert(key.to_string(), value),
      None => self.values.remove(key),
    }
  }

  /// Replace the outputs of `input` and snapshot its current state.
  ///
  /// Returns the previous outputs of `input` that it no longer produces and
  /// that no other input claims.
  pub fn set_outputs<I>(&mut self, input: &Path, outputs: I) -> Vec<PathBuf>
  where
    I: IntoIterator<Item = PathBuf>,
  {
    self
      .input_states
      .insert(input.to_path_buf(), FileState::of_or_missing(input));

    let outputs: BTreeSet<PathBuf> = outputs.into_iter().collect();
    for output in &outputs {
      self
        .inputs_by_output
        .entry(output.clone())
        .or_default()
        .insert(input.to_path_buf());
    }

    let previous = if outputs.is_empty() {
      self.outputs_by_input.remove(input)
    } else {
      self.outputs_by_input.insert(input.to_path_buf(), outputs.clone())
    };

    let obsolete: Vec<PathBuf> = previous
      .unwrap_or_default()
      .difference(&outputs)
      .cloned()
      .collect();
    self.release_outputs(input, obsolete)
  }

  /// Record the files `input` depends on besides itself.
  pub fn set_referenced_inputs(&mut self, input: &Path, referenced: BTreeSet<PathBuf>) {
    if referenced.is_empty() {
      self.referenced_inputs.remove(input);
      return;
    }
    for reference in &referenced {
      match FileState::of(reference) {
        Some(state) => {
          self.referenced_input_states.insert(reference.clone(), state);
        }
        None => {
          self.referenced_input_states.remove(reference);
        }
      }
    }
    self.referenced_inputs.insert(input.to_path_buf(), referenced);
  }

  /// Forget everything about `input`.
  ///
  /// Returns the outputs of `input` that no other input claims.
  pub fn remove_input(&mut self, input: &Path) -> Vec<PathBuf> {
    self.messages.remove(input);
    self.input_states.remove(input);
    self.referenced_inputs.remove(input);
    let outputs = self.outputs_by_input.remove(input).unwrap_or_default();
    self.release_outputs(input, outputs)
  }

  fn release_outputs(&mut self, input: &Path, outputs: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
    let mut released = Vec::new();
    for output in outputs {
      let Some(inputs) = self.inputs_by_output.get_mut(&output) else {
        continue;
      };
      inputs.remove(input);
      if inputs.is_empty() {
        self.inputs_by_output.remove(&output);
        released.push(output);
      }
    }
    released
  }

  /// Whether `input` is new or changed, lost one of its outputs, or depends on
  /// a referenced input that is missing or changed.
  ///
  /// An input that produced no outputs is not considered to miss any.
  pub fn is_processing_required(&self, input: &Path) -> bool {
    if is_changed_or_deleted(input, self.input_states.get(input)) {
      return true;
    }

    let output_missing = self
      .outputs_by_input
      .get(input)
      .is_some_and(|outputs| outputs.iter().any(|output| !output.exists()));
    if output_missing {
      return true;
    }

    self.referenced_inputs.get(input).is_some_and(|referenced| {
      referenced
        .iter()
        .any(|r| is_changed_or_deleted(r, self.referenced_input_states.get(r)))
    })
  }

  /// Drop referenced-input bookkeeping for inputs that are no longer tracked
  /// and snapshots of files nobody references anymore.
  pub fn cleanup_referenced_inputs(&mut self) {
    let input_states = &self.input_states;
    self
      .referenced_inputs
      .retain(|input, _| input_states.contains_key(input));

    let referenced: BTreeSet<&PathBuf> = self.referenced_inputs.values().flatten().collect();
    self
      .referenced_input_states
      .retain(|reference, _| referenced.contains(reference));
  }

  /// Replace the messages of every input in `messages`, keeping the messages
  /// of all other inputs. Returns the messages as they were before.
  pub fn merge_messages(&mut self, messages: PathMap<Vec<Message>>) -> PathMap<Vec<Message>> {
    let previous = self.messages.clone();
    for (input, list) in messages {
      if list.is_empty() {
        self.messages.remove(&input);
      } else {
        self.messages.insert(input, list);
      }
    }
    previous
  }

  /// Inputs among `candidates` selected by any of `path_sets`, plus the
  /// referenced inputs of every selected owner.
  pub fn selected_inputs<'a>(
    &self,
    path_sets: &[PathSet],
    candidates: impl IntoIterator<Item = &'a PathBuf>,
  ) -> BTreeSet<PathBuf> {
    let mut selected = BTreeSet::new();
    if path_sets.is_empty() {
      return selected;
    }

    let selectors: Vec<(&PathSet, Selector)> = path_sets.iter().map(|p| (p, Selector::new(p))).collect();
    let is_selected = |file: &Path| {
      selectors.iter().any(|(paths, selector)| {
        relativize(file, paths.basedir()).is_some_and(|pathname| selector.is_selected(&pathname))
      })
    };

    selected.extend(candidates.into_iter().filter(|c| is_selected(c)).cloned());
    for (owner, referenced) in &self.referenced_inputs {
      if is_selected(owner) {
        selected.extend(referenced.iter().cloned());
      }
    }
    selected
  }

  /// Number of error messages attached to inputs selected by `path_sets`.
  pub fn error_count(&self, path_sets: &[PathSet]) -> usize {
    self
      .selected_inputs(path_sets, self.messages.keys())
      .iter()
      .filter_map(|input| self.messages.get(input))
      .flatten()
      .filter(|message| message.is_error())
      .count()
  }

  /// The subset of `messages` belonging to inputs selected by `path_sets`.
  pub fn selected_messages(&self, path_sets: &[PathSet], messages: &PathMap<Vec<Message>>) -> PathMap<Vec<Message>> {
    self
      .selected_inputs(path_sets, messages.keys())
      .into_iter()
      .filter_map(|input| messages.get(&input).map(|list| (input, list.clone())))
      .collect()
  }

  pub fn input_state(&self, input: &Path) -> Option<&FileState> {
    self.input_states.get(input)
  }

  pub fn input_states(&self) -> &PathMap<FileState> {
    &self.input_states
  }

  pub fn outputs(&self, input: &Path) -> Option<&BTreeSet<PathBuf>> {
    self.outputs_by_input.get(input)
  }

  pub fn inputs(&self, output: &Path) -> Option<&BTreeSet<PathBuf>> {
    self.inputs_by_output.get(output)
  }

  pub fn referenced_inputs(&self, input: &Path) -> Option<&BTreeSet<PathBuf>> {
    self.referenced_inputs.get(input)
  }

  pub fn messages(&self, input: &Path) -> Option<&[Message]> {
    self.messages.get(input).map(Vec::as_slice)
  }
}
