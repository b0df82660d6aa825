//! Content-aware output writing.
//!
//! An [`IncrementalFileOutputStream`] compares what is written against the
//! bytes already in the file and leaves the file alone (timestamp included)
//! as long as they agree. From the first differing byte on it writes through.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use crate::consts::COMPARE_BUFFER_SIZE;
use crate::context::ContextInner;
use crate::sink::OutputListener;

/// Who hears about the output once the stream is closed.
enum Owner {
  Context(Weak<ContextInner>),
  Listener(Arc<dyn OutputListener>),
}

pub struct IncrementalFileOutputStream {
  path: PathBuf,
  file: Option<File>,
  /// Bytes accepted so far; also the offset of the next byte in the file.
  position: u64,
  modified: bool,
  scratch: Vec<u8>,
  owner: Owner,
}

impl IncrementalFileOutputStream {
  pub(crate) fn for_context(path: PathBuf, context: Weak<ContextInner>) -> io::Result<Self> {
    Self::open(path, Owner::Context(context))
  }

  pub(crate) fn for_listener(path: PathBuf, listener: Arc<dyn OutputListener>) -> io::Result<Self> {
    Self::open(path, Owner::Listener(listener))
  }

  fn open(path: PathBuf, owner: Owner) -> io::Result<Self> {
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    let existed = path.exists();
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)?;

    Ok(Self {
      path,
      file: Some(file),
      position: 0,
      modified: !existed,
      scratch: Vec::new(),
      owner,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Whether the file content differs from what it was before this stream
  /// was opened, as far as written so far.
  pub fn is_modified(&self) -> bool {
    self.modified
  }

  /// Finish writing: drop any stale tail of the old content and report the
  /// output to its context or listener.
  ///
  /// Closing twice is a no-op.
  pub fn close(&mut self) -> io::Result<()> {
    let Some(mut file) = self.file.take() else {
      return Ok(());
    };
    file.flush()?;

    let len = file.metadata()?.len();
    if len > self.position {
      file.set_len(self.position)?;
      self.modified = true;
    }
    drop(file);

    debug!(path = %self.path.display(), modified = self.modified, "closed output stream");
    match &self.owner {
      Owner::Context(context) => match context.upgrade() {
        Some(context) => context.record_written(&self.path, self.modified).map_err(io::Error::other)?,
        None => debug!(path = %self.path.display(), "build context is gone, output not recorded"),
      },
      Owner::Listener(listener) => {
        if self.modified {
          listener.outputs_updated(std::slice::from_ref(&self.path));
        }
      }
    }
    Ok(())
  }

  fn file(&mut self) -> io::Result<&mut File> {
    self
      .file
      .as_mut()
      .ok_or_else(|| io::Error::other("output stream is closed"))
  }

  /// Compare `buf` with the existing content at the current position.
  /// Returns the offset of the first differing byte, if any.
  fn compare(&mut self, buf: &[u8]) -> io::Result<Option<usize>> {
    let mut scratch = std::mem::take(&mut self.scratch);
    scratch.resize(COMPARE_BUFFER_SIZE.min(buf.len()), 0);

    let mut offset = 0;
    let mut mismatch = None;
    while offset < buf.len() {
      let chunk = &buf[offset..buf.len().min(offset + scratch.len())];
      let read = read_fully(self.file()?, &mut scratch[..chunk.len()])?;
      let differs = chunk[..read]
        .iter()
        .zip(&scratch[..read])
        .position(|(a, b)| a != b)
        .or((read < chunk.len()).then_some(read));
      if let Some(at) = differs {
        mismatch = Some(offset + at);
        break;
      }
      offset += chunk.len();
    }

    self.scratch = scratch;
    Ok(mismatch)
  }
}

impl Write for IncrementalFileOutputStream {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    if buf.is_empty() {
      return Ok(0);
    }

    if self.modified {
      self.file()?.write_all(buf)?;
    } else if let Some(at) = self.compare(buf)? {
      self.modified = true;
      let start = self.position + at as u64;
      let file = self.file()?;
      file.seek(SeekFrom::Start(start))?;
      file.write_all(&buf[at..])?;
    }

    self.position += buf.len() as u64;
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    match self.file.as_mut() {
      Some(file) => file.flush(),
      None => Ok(()),
    }
  }
}

impl Drop for IncrementalFileOutputStream {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      warn!(path = %self.path.display(), error = %e, "failed to close output stream");
    }
  }
}

impl fmt::Debug for IncrementalFileOutputStream {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("IncrementalFileOutputStream")
      .field("path", &self.path)
      .field("position", &self.position)
      .field("modified", &self.modified)
      .field("open", &self.file.is_some())
      .finish()
  }
}

/// Read until `buf` is full or the file ends. Returns the number of bytes read.
fn read_fully(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
  let mut filled = 0;
  while filled < buf.len() {
    match file.read(&mut buf[filled..]) {
      Ok(0) => break,
      Ok(n) => filled += n,
      Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
      Err(e) => return Err(e),
    }
  }
  Ok(filled)
}
