//! Binds the node graph to the kernel FUSE protocol. `Fs` is the only thing
//! in this crate that speaks `fuser`'s wire types; every decision about what
//! a path means lives in `fs::path` and `fs::ops`, not here.
//!
//! `fuser::Filesystem` methods are synchronous callbacks dispatched on
//! whichever thread the kernel driver hands the request to; the node graph's
//! own operations are `async` (they may call the backend or the state
//! store). `Fs` bridges the two with a borrowed [`tokio::runtime::Handle`]
//! and `block_on`.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;

use crate::fs::attrs::CacheClass;
use crate::fs::handles::{CtlState, HandleState, SendState, WriteState};
use crate::fs::ops::{self, Kind, Resolved};
use crate::fs::path::{self, ConvField, ModelField, Node};
use crate::fs::shared::FsShared;

const FOPEN_DIRECT_IO: u32 = 1 << 0;

/// `fuser::Filesystem` adapter over the node graph.
pub struct Fs {
    shared: Arc<FsShared>,
    rt: tokio::runtime::Handle,
    uid: u32,
    gid: u32,
}

impl Fs {
    pub fn new(shared: Arc<FsShared>, rt: tokio::runtime::Handle) -> Self {
        // SAFETY: `getuid`/`getgid` take no arguments and cannot fail.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self { shared, rt, uid, gid }
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.rt.block_on(fut)
    }

    fn path_for(&self, ino: u64) -> Option<String> {
        self.shared.inodes.path_for(ino)
    }

    fn classify_ino(&self, ino: u64) -> Result<(String, Node), c_int> {
        let path = self.path_for(ino).ok_or(libc::ENOENT)?;
        let node = path::classify(&path).ok_or(libc::ENOENT)?;
        Ok((path, node))
    }

    fn resolve(&self, node: &Node) -> Result<Resolved, c_int> {
        self.block_on(ops::resolve(&self.shared, node)).map_err(|e| e.errno())
    }

    /// `(owner permission bits, file type)` for a resolved node.
    fn attr(&self, ino: u64, node: &Node, resolved: &Resolved) -> FileAttr {
        let now = SystemTime::now();
        let mtime = resolved.mtime.unwrap_or(now);
        let (kind, size, perm) = match &resolved.kind {
            Kind::Dir => (FileType::Directory, 4096, 0o755),
            Kind::File { size } => {
                let perm = if ops::is_writable(node) { 0o644 } else { 0o444 };
                (FileType::RegularFile, *size, perm)
            }
            Kind::Symlink { target } => (FileType::Symlink, target.len() as u64, 0o777),
        };
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(512).max(1),
            atime: now,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind,
            perm,
            nlink: if matches!(kind, FileType::Directory) { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    /// A placeholder `ino: 0` entry for a short-TTL negative lookup: the
    /// kernel recognizes `ino == 0` in an entry reply as "doesn't exist, but
    /// re-check after this timeout" rather than a permanent miss. The
    /// timeout must stay short, or a creation transition (e.g. `archived`
    /// appearing) becomes invisible to an already-cached negative lookup.
    fn negative_attr(&self) -> FileAttr {
        let now = SystemTime::now();
        FileAttr {
            ino: 0,
            size: 0,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: FileType::RegularFile,
            perm: 0o444,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }
}

/// Presence files (`archived`, `waiting_for_input`, `connected`, `ready`)
/// whose non-existence is expected to be transient — these get a short
/// negative-entry TTL on a lookup miss instead of the kernel's default
/// (potentially unbounded) negative-lookup caching.
fn is_dynamic_presence(node: &Node) -> bool {
    matches!(
        node,
        Node::ConversationField { field: ConvField::Archived | ConvField::Waiting, .. }
            | Node::BackendConnected { .. }
            | Node::ModelFieldNode { field: ModelField::Ready, .. }
    )
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

impl Filesystem for Fs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        Ok(())
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let parent_path = match self.path_for(parent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let name_str = match name.to_str() {
            Some(s) => s,
            None => return reply.error(libc::ENOENT),
        };
        let child_path = path::join_path(&parent_path, name_str);
        let node = match path::classify(&child_path) {
            Some(n) => n,
            None => return reply.error(libc::ENOENT),
        };

        let guard = self.shared.diagnostics.register("node", "lookup", child_path.clone());
        match self.resolve(&node) {
            Ok(resolved) => {
                let ino = self.shared.inodes.lookup(&child_path);
                let attr = self.attr(ino, &node, &resolved);
                reply.entry(&resolved.cache.ttl(), &attr, 0);
            }
            Err(errno) if errno == libc::ENOENT && is_dynamic_presence(&node) => {
                reply.entry(&CacheClass::Negative.ttl(), &self.negative_attr(), 0);
            }
            Err(errno) => reply.error(errno),
        }
        drop(guard);
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.shared.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let (_path, node) = match self.classify_ino(ino) {
            Ok(v) => v,
            Err(e) => return reply.error(e),
        };
        match self.resolve(&node) {
            Ok(resolved) => {
                let attr = self.attr(ino, &node, &resolved);
                reply.attr(&resolved.cache.ttl(), &attr);
            }
            Err(errno) => reply.error(errno),
        }
    }

    /// Presence-file `touch` and friends succeed silently without modifying
    /// anything, generalized to every node kind since nothing in this node
    /// graph exposes mutable POSIX metadata.
    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let (_path, node) = match self.classify_ino(ino) {
            Ok(v) => v,
            Err(e) => return reply.error(e),
        };
        match self.resolve(&node) {
            Ok(resolved) => reply.attr(&resolved.cache.ttl(), &self.attr(ino, &node, &resolved)),
            Err(errno) => reply.error(errno),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let (_path, node) = match self.classify_ino(ino) {
            Ok(v) => v,
            Err(e) => return reply.error(e),
        };
        match self.block_on(ops::symlink_target(&self.shared, &node)) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
        let parent_path = match self.path_for(parent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let name_str = match name.to_str() {
            Some(s) => s,
            None => return reply.error(libc::EINVAL),
        };
        if parent_path != "backend" {
            return reply.error(libc::ENOTSUP);
        }
        if let Err(e) = ops::backends::mkdir(&self.shared, name_str) {
            return reply.error(e.errno());
        }
        let node = Node::Backend { backend: name_str.to_string() };
        match self.resolve(&node) {
            Ok(resolved) => {
                let child_path = path::join_path(&parent_path, name_str);
                let ino = self.shared.inodes.lookup(&child_path);
                reply.entry(&resolved.cache.ttl(), &self.attr(ino, &node, &resolved), 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let parent_path = match self.path_for(parent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let name_str = match name.to_str() {
            Some(s) => s,
            None => return reply.error(libc::EINVAL),
        };
        if parent_path != "backend" {
            return reply.error(libc::ENOTSUP);
        }
        match ops::backends::rmdir(&self.shared, name_str) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let parent_path = match self.path_for(parent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let newparent_path = match self.path_for(newparent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let name_str = match name.to_str() {
            Some(s) => s,
            None => return reply.error(libc::EINVAL),
        };
        let newname_str = match newname.to_str() {
            Some(s) => s,
            None => return reply.error(libc::EINVAL),
        };
        if parent_path != "backend" {
            return reply.error(libc::ENOTSUP);
        }
        if newparent_path != parent_path {
            return reply.error(libc::EXDEV);
        }
        match ops::backends::rename(&self.shared, name_str, newname_str) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn symlink(&mut self, _req: &Request<'_>, parent: u64, link_name: &OsStr, target: &Path, reply: ReplyEntry) {
        let parent_path = match self.path_for(parent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let link_str = match link_name.to_str() {
            Some(s) => s,
            None => return reply.error(libc::EINVAL),
        };
        let target_str = match target.to_str() {
            Some(s) => s,
            None => return reply.error(libc::EINVAL),
        };
        if parent_path != "backend" {
            return reply.error(libc::ENOTSUP);
        }
        if let Err(e) = ops::backends::symlink(&self.shared, link_str, target_str) {
            return reply.error(e.errno());
        }
        let node = Node::BackendDefaultSymlink;
        match self.resolve(&node) {
            Ok(resolved) => {
                let child_path = path::join_path(&parent_path, link_str);
                let ino = self.shared.inodes.lookup(&child_path);
                reply.entry(&resolved.cache.ttl(), &self.attr(ino, &node, &resolved), 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let (path, node) = match self.classify_ino(ino) {
            Ok(v) => v,
            Err(e) => return reply.error(e),
        };
        let resolved = match self.resolve(&node) {
            Ok(r) => r,
            Err(errno) => return reply.error(errno),
        };
        let open_flags = if resolved.cache.direct_io() { FOPEN_DIRECT_IO } else { 0 };

        let access = flags & libc::O_ACCMODE;
        let wants_write = access == libc::O_WRONLY || access == libc::O_RDWR;

        if wants_write {
            if !ops::is_writable(&node) {
                return reply.error(libc::EPERM);
            }
            let state = match &node {
                Node::ConversationSend { .. } => HandleState::Send(std::sync::Mutex::new(SendState::default())),
                Node::ConversationCtl { .. } => HandleState::Ctl(std::sync::Mutex::new(CtlState::default())),
                _ => HandleState::Write(std::sync::Mutex::new(WriteState::default())),
            };
            let fh = self.shared.handles.open(node, state);
            reply.opened(fh, open_flags);
            return;
        }

        let guard = self.shared.diagnostics.register("node", "open", path);
        match self.block_on(ops::read(&self.shared, &node)) {
            Ok(bytes) => {
                let fh = self.shared.handles.open(node, HandleState::ReadBuffer(bytes));
                reply.opened(fh, open_flags);
            }
            Err(e) => reply.error(e.errno()),
        }
        drop(guard);
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let result = self.shared.handles.with_state(fh, |_node, state| match state {
            HandleState::ReadBuffer(bytes) => {
                let offset = offset.max(0) as usize;
                if offset >= bytes.len() {
                    Vec::new()
                } else {
                    let end = (offset + size as usize).min(bytes.len());
                    bytes[offset..end].to_vec()
                }
            }
            HandleState::Send(_) | HandleState::Ctl(_) | HandleState::Write(_) | HandleState::Dir(_) => Vec::new(),
        });
        match result {
            Some(data) => reply.data(&data),
            None => reply.error(libc::EBADF),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        // Offset is deliberately ignored: every writable node here is a
        // one-shot accumulator, and writes on a handle arrive in the
        // kernel's own issue order, so appending by arrival order is exactly
        // the buffering these nodes want.
        let result = self.shared.handles.with_state(fh, |_node, state| match state {
            HandleState::Send(m) => {
                m.lock().unwrap_or_else(|e| e.into_inner()).buffer.extend_from_slice(data);
                true
            }
            HandleState::Ctl(m) => {
                m.lock().unwrap_or_else(|e| e.into_inner()).buffer.extend_from_slice(data);
                true
            }
            HandleState::Write(m) => {
                m.lock().unwrap_or_else(|e| e.into_inner()).buffer.extend_from_slice(data);
                true
            }
            HandleState::ReadBuffer(_) | HandleState::Dir(_) => false,
        });
        match result {
            Some(true) => reply.written(data.len() as u32),
            Some(false) | None => reply.error(libc::EPERM),
        }
    }

    /// Commit a buffered `send`/`ctl`/`url` write exactly once per non-empty
    /// buffer. Called once per `close(2)` on any descriptor sharing this
    /// handle, so a shell's redirect-then-dup-then-close sequence calls this
    /// more than once — the `committed` flag absorbs the repeats.
    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        enum Action {
            None,
            Send { backend: String, local_id: String, buffer: Vec<u8> },
            Ctl { backend: String, local_id: String, buffer: Vec<u8> },
            Write { backend: String, buffer: Vec<u8> },
        }

        let action = match self.shared.handles.with_state(fh, |node, state| match (node, state) {
            (Node::ConversationSend { backend, alias }, HandleState::Send(m)) => {
                let s = m.lock().unwrap_or_else(|e| e.into_inner());
                if s.buffer.is_empty() || s.committed {
                    Action::None
                } else {
                    Action::Send {
                        backend: backend.clone(),
                        local_id: alias.clone(),
                        buffer: s.buffer.clone(),
                    }
                }
            }
            (Node::ConversationCtl { backend, alias }, HandleState::Ctl(m)) => {
                let s = m.lock().unwrap_or_else(|e| e.into_inner());
                if s.buffer.is_empty() {
                    Action::None
                } else {
                    Action::Ctl {
                        backend: backend.clone(),
                        local_id: alias.clone(),
                        buffer: s.buffer.clone(),
                    }
                }
            }
            (Node::BackendUrl { backend }, HandleState::Write(m)) => {
                let s = m.lock().unwrap_or_else(|e| e.into_inner());
                if s.buffer.is_empty() {
                    Action::None
                } else {
                    Action::Write {
                        backend: backend.clone(),
                        buffer: s.buffer.clone(),
                    }
                }
            }
            _ => Action::None,
        }) {
            Some(a) => a,
            None => return reply.error(libc::EBADF),
        };

        let is_send = matches!(action, Action::Send { .. });
        let detail = match &action {
            Action::Send { local_id, .. } | Action::Ctl { local_id, .. } => local_id.clone(),
            Action::Write { backend, .. } => backend.clone(),
            Action::None => String::new(),
        };
        let guard = (!matches!(action, Action::None)).then(|| self.shared.diagnostics.register("conversation", "flush", detail));
        if let Some(g) = &guard {
            g.set_phase("HTTP POST");
        }

        let result = match action {
            Action::None => Ok(()),
            Action::Send { backend, local_id, buffer } => self.block_on(ops::conversations::commit_send(&self.shared, &backend, &local_id, &buffer)),
            Action::Ctl { backend, local_id, buffer } => self.block_on(ops::conversations::apply_ctl(&self.shared, &backend, &local_id, &buffer)),
            Action::Write { backend, buffer } => {
                let text = String::from_utf8_lossy(&buffer).to_string();
                ops::backends::write_url(&self.shared, &backend, &text)
            }
        };
        drop(guard);

        if result.is_ok() && is_send {
            self.shared.handles.with_state(fh, |_node, state| {
                if let HandleState::Send(m) = state {
                    m.lock().unwrap_or_else(|e| e.into_inner()).committed = true;
                }
            });
        }

        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, _lock_owner: Option<u64>, _flush: bool, reply: ReplyEmpty) {
        self.shared.handles.release(fh);
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let (path, node) = match self.classify_ino(ino) {
            Ok(v) => v,
            Err(e) => return reply.error(e),
        };

        let guard = self.shared.diagnostics.register("node", "readdir", path.clone());
        let entries = match self.block_on(ops::list_dir(&self.shared, &node)) {
            Ok(e) => e,
            Err(e) => {
                drop(guard);
                return reply.error(e.errno());
            }
        };
        drop(guard);

        let parent_path = parent_of(&path);
        let parent_ino = self.shared.inodes.peek(&parent_path);

        let mut dir_entries = vec![
            (".".to_string(), ino, FileType::Directory),
            ("..".to_string(), parent_ino, FileType::Directory),
        ];
        for (name, child_node) in entries {
            let child_path = path::join_path(&path, &name);
            let file_type = match self.resolve(&child_node) {
                Ok(r) => r.kind.file_type(),
                Err(_) => continue,
            };
            let child_ino = self.shared.inodes.peek(&child_path);
            dir_entries.push((name, child_ino, file_type));
        }

        let fh = self.shared.handles.open(node, HandleState::Dir(dir_entries));
        reply.opened(fh, 0);
    }

    fn readdir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let entries = match self.shared.handles.with_state(fh, |_node, state| match state {
            HandleState::Dir(entries) => Some(entries.clone()),
            _ => None,
        }) {
            Some(Some(entries)) => entries,
            _ => return reply.error(libc::EBADF),
        };

        for (i, (name, child_ino, file_type)) in entries.iter().enumerate().skip(offset.max(0) as usize) {
            if reply.add(*child_ino, (i + 1) as i64, *file_type, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        self.shared.handles.release(fh);
        reply.ok();
    }
}

/// Time a FUSE request is allowed before the watchdog (run by the test
/// harness) logs the diagnostics snapshot and a stack trace.
pub const WATCHDOG_DEADLINE: Duration = Duration::from_secs(30);
pub const WATCHDOG_MARGIN: Duration = Duration::from_secs(5);
