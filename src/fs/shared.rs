//! Shared lower-layer handles. Logical parent/child relationships between
//! nodes are represented as shared handles (reference counts) to the
//! lower-layer components, never as back-pointers up the node tree.
//!
//! [`FsShared`] is the one `Arc`-wrapped bundle every node operation borrows
//! from; the node graph itself stays a tree keyed by path (`fs::path`,
//! `fs::inode`), never pointing back up.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ParseCache;
use crate::diagnostics::Diagnostics;
use crate::fs::handles::HandleTable;
use crate::fs::inode::InodeTable;
use crate::fs::registry::BackendRegistry;
use crate::state::StateStore;

pub struct FsShared {
    pub state: Arc<StateStore>,
    pub parse_cache: Arc<ParseCache>,
    pub backends: Arc<BackendRegistry>,
    pub diagnostics: Arc<Diagnostics>,
    pub inodes: Arc<InodeTable>,
    pub handles: Arc<HandleTable>,
    pub clone_timeout: Duration,
    /// The daemon's mountpoint, recorded so backend-triggered filesystem
    /// access can be checked against it: nothing in this crate's request
    /// path ever opens a path under here, which is what prevents a backend
    /// call from re-entering its own mount.
    pub mountpoint: PathBuf,
}

impl FsShared {
    pub fn new(
        state: StateStore,
        cache_ttl: Duration,
        clone_timeout: Duration,
        diagnostics_enabled: bool,
        mountpoint: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(state),
            parse_cache: Arc::new(ParseCache::new()),
            backends: Arc::new(BackendRegistry::new(cache_ttl)),
            diagnostics: Arc::new(Diagnostics::new(diagnostics_enabled)),
            inodes: Arc::new(InodeTable::new()),
            handles: Arc::new(HandleTable::new()),
            clone_timeout,
            mountpoint,
        })
    }

    pub fn now_rfc3339(&self) -> String {
        chrono::Utc::now().to_rfc3339()
    }
}
