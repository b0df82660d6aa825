//! On-disk format of a build state.
//!
//! One pretty-printed JSON document per (output directory, builder) pair:
//!
//! ```text
//! {
//!   "version": 1,
//!   "configurations": [{ "paths": PathSet, "digest": "<hex>" }],
//!   "values": { key: any },
//!   "messages": { input: [Message] },
//!   "inputStates": { input: FileState },
//!   "inputs": { output: [input] },
//!   "referencedInputs": { input: [referenced] },
//!   "referencedInputStates": { referenced: FileState }
//! }
//! ```
//!
//! Only the output → inputs direction of the graph is stored; the inverse is
//! rebuilt on load. Missing fields default to empty and unknown fields are
//! ignored. Writes go to a temporary file that is then renamed into place.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::consts::{STATE_VERSION, TEMP_FILE_SUFFIX};
use crate::error::StateError;
use crate::path_set::PathSet;

use super::graph::{BuildGraph, PathMap, PathSetMap};
use super::file_state::FileState;
use super::message::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigurationEntry {
  paths: PathSet,
  #[serde(with = "hex")]
  digest: Vec<u8>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StateDocument {
  version: u32,
  configurations: Vec<ConfigurationEntry>,
  values: BTreeMap<String, Value>,
  messages: PathMap<Vec<Message>>,
  input_states: PathMap<FileState>,
  inputs: PathSetMap,
  referenced_inputs: PathSetMap,
  referenced_input_states: PathMap<FileState>,
}

impl From<&BuildGraph> for StateDocument {
  fn from(graph: &BuildGraph) -> Self {
    let mut configurations: Vec<ConfigurationEntry> = graph
      .configurations
      .iter()
      .map(|(paths, digest)| ConfigurationEntry {
        paths: paths.clone(),
        digest: digest.clone(),
      })
      .collect();
    // HashMap order is random; keep the file stable between saves.
    configurations.sort_by_cached_key(|entry| serde_json::to_string(&entry.paths).unwrap_or_default());

    Self {
      version: STATE_VERSION,
      configurations,
      values: graph.values.clone(),
      messages: graph.messages.clone(),
      input_states: graph.input_states.clone(),
      inputs: graph.inputs_by_output.clone(),
      referenced_inputs: graph.referenced_inputs.clone(),
      referenced_input_states: graph.referenced_input_states.clone(),
    }
  }
}

impl From<StateDocument> for BuildGraph {
  fn from(doc: StateDocument) -> Self {
    let mut graph = BuildGraph {
      configurations: doc
        .configurations
        .into_iter()
        .map(|entry| (entry.paths, entry.digest))
        .collect(),
      values: doc.values,
      messages: doc.messages,
      input_states: doc.input_states,
      inputs_by_output: doc.inputs,
      outputs_by_input: PathSetMap::new(),
      referenced_inputs: doc.referenced_inputs,
      referenced_input_states: doc.referenced_input_states,
    };
    graph.inputs_by_output.retain(|_, inputs| !inputs.is_empty());
    graph.rebuild_outputs_by_input();
    graph
  }
}

/// Read a build state file.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn read_state(path: &Path) -> Result<Option<BuildGraph>, StateError> {
  let content = match fs::read_to_string(path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(StateError::Read(e)),
  };

  let doc: StateDocument = serde_json::from_str(&content).map_err(StateError::Parse)?;
  if doc.version != STATE_VERSION {
    return Err(StateError::UnsupportedVersion(doc.version));
  }

  Ok(Some(doc.into()))
}

/// Write a build state file atomically (write to temp, then rename).
pub fn write_state(path: &Path, graph: &BuildGraph) -> Result<(), StateError> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(StateError::CreateDir)?;
  }

  let content = serde_json::to_string_pretty(&StateDocument::from(graph)).map_err(StateError::Serialize)?;
  let temp_path = temp_path(path);
  fs::write(&temp_path, &content).map_err(StateError::Write)?;
  fs::rename(&temp_path, path).map_err(StateError::Write)?;

  Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
  let mut name = path.as_os_str().to_owned();
  name.push(".");
  name.push(TEMP_FILE_SUFFIX);
  PathBuf::from(name)
}
