//! Per-open-handle state: a file handle exists from `open` to the last
//! `release` the kernel sends for it, and this is where that lifetime's
//! state lives.
//!
//! Two state machines live here:
//! - [`SendState`]: accumulates writes and commits exactly once on the first
//!   non-empty flush.
//! - [`CtlState`]: accumulates `key=value` lines and applies them atomically
//!   on release.
//!
//! Read-only handles (rendered markdown, projected JSON leaves, directory
//! listings) just snapshot their content once at `open` time so repeated
//! `read`/`readdir` calls on the same handle are consistent even if the
//! backend changes underneath.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::fs::path::Node;

pub type Fh = u64;

/// Buffered writer for the conversation `send` file. `committed` absorbs
/// flushes from duplicated file descriptors (the shell-redirect
/// close-dup-close sequence) so the backend only ever sees one commit.
#[derive(Default)]
pub struct SendState {
    pub buffer: Vec<u8>,
    pub committed: bool,
}

/// Buffered writer for the conversation `ctl` file.
#[derive(Default)]
pub struct CtlState {
    pub buffer: Vec<u8>,
}

/// Buffered writer for any other single-shot writable file (currently just
/// the backend `url` file): accumulates writes and applies them on flush,
/// with no commit/no-op distinction since plain writes aren't idempotency
/// sensitive the way `send` is.
#[derive(Default)]
pub struct WriteState {
    pub buffer: Vec<u8>,
}

pub enum HandleState {
    Send(Mutex<SendState>),
    Ctl(Mutex<CtlState>),
    Write(Mutex<WriteState>),
    /// A snapshot taken at `open` time: file content, or rendered directory
    /// listing entries (name, child inode, file type).
    ReadBuffer(Vec<u8>),
    Dir(Vec<(String, u64, fuser::FileType)>),
}

pub struct HandleTable {
    next_fh: AtomicU64,
    handles: Mutex<HashMap<Fh, (Node, HandleState)>>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_fh: AtomicU64::new(1),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn open(&self, node: Node, state: HandleState) -> Fh {
        let fh = self.next_fh.fetch_add(1, Ordering::SeqCst);
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).insert(fh, (node, state));
        fh
    }

    pub fn with_state<R>(&self, fh: Fh, f: impl FnOnce(&Node, &HandleState) -> R) -> Option<R> {
        let guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(&fh).map(|(node, state)| f(node, state))
    }

    pub fn release(&self, fh: Fh) -> Option<(Node, HandleState)> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).remove(&fh)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::path::Node;

    #[test]
    fn open_then_release_roundtrips() {
        let table = HandleTable::new();
        let fh = table.open(Node::Root, HandleState::ReadBuffer(b"hi".to_vec()));
        assert_eq!(table.len(), 1);
        let (node, state) = table.release(fh).unwrap();
        assert_eq!(node, Node::Root);
        match state {
            HandleState::ReadBuffer(b) => assert_eq!(b, b"hi"),
            _ => panic!("wrong state"),
        }
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn send_state_defaults_uncommitted() {
        let state = SendState::default();
        assert!(state.buffer.is_empty());
        assert!(!state.committed);
    }
}
