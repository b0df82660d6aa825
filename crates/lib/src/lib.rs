//! buildguard-lib: incremental build avoidance
//!
//! This crate decides which inputs of a build step need processing and keeps
//! track of what they produced:
//! - `PathSet` / `Selector`: ant-style selection of inputs below a directory
//! - `Digester`: order-aware and order-insensitive configuration fingerprints
//! - `BuildState`: the persisted input/output graph of one builder
//! - `BuildContext`: one build invocation, committed or discarded as a whole
//! - `BuildContextManager`: creates contexts and shares their state
//! - `IncrementalFileOutputStream`: writes outputs only when content changes

pub mod config;
pub mod consts;
pub mod context;
pub mod digest;
pub mod error;
pub mod manager;
pub mod output;
pub mod path_set;
pub mod scan;
pub mod selector;
pub mod sink;
pub mod state;
pub mod util;

pub use context::BuildContext;
pub use digest::Digester;
pub use error::{BuildError, StateError};
pub use manager::{BuildContextManager, ContextScope, ManagerBuilder};
pub use output::IncrementalFileOutputStream;
pub use path_set::{PathSet, PathSetKind};
pub use sink::{MessageSink, NoopOutputListener, OutputListener, TracingMessageSink};
pub use state::{Message, Severity};
