//! Stable inode table. Nodes that appear repeatedly across lookups need a
//! stable inode number, or the kernel discards cached attributes on every
//! re-lookup.
//!
//! An inode is a deterministic hash of the node's canonical slash-joined
//! path, so the same logical node always gets the same inode even across
//! cache evictions, and distinct mounts never need to coordinate allocation.
//! The reverse `ino -> path` map is populated on lookup and trimmed on
//! `forget`, mirroring the kernel's own lookup-count protocol.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

pub const ROOT_INO: u64 = 1;

struct Entry {
    path: String,
    lookups: u64,
}

pub struct InodeTable {
    inner: Mutex<Inner>,
}

struct Inner {
    path_to_ino: HashMap<String, u64>,
    entries: HashMap<u64, Entry>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            ROOT_INO,
            Entry {
                path: String::new(),
                lookups: 1,
            },
        );
        Self {
            inner: Mutex::new(Inner {
                path_to_ino: HashMap::new(),
                entries,
            }),
        }
    }

    fn hash_path(path: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        let h = hasher.finish();
        if h == ROOT_INO {
            h.wrapping_add(1)
        } else {
            h
        }
    }

    /// Resolve (or mint) the inode for `path`, bumping its lookup refcount
    /// by one. Every call here must be balanced by a kernel `forget`.
    pub fn lookup(&self, path: &str) -> u64 {
        if path.is_empty() {
            return ROOT_INO;
        }
        let ino = Self::hash_path(path);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.path_to_ino.insert(path.to_string(), ino);
        inner
            .entries
            .entry(ino)
            .and_modify(|e| e.lookups += 1)
            .or_insert_with(|| Entry {
                path: path.to_string(),
                lookups: 1,
            });
        ino
    }

    /// Compute the inode a path would hash to without registering it or
    /// bumping any lookup refcount. Used for `readdir` entries: the kernel
    /// treats directory-listing inode numbers as display-only and will issue
    /// its own `lookup` before acting on any of them, so minting a tracked
    /// entry here would only leak a refcount nothing will ever `forget`.
    pub fn peek(&self, path: &str) -> u64 {
        if path.is_empty() {
            ROOT_INO
        } else {
            Self::hash_path(path)
        }
    }

    /// Resolve the path for an inode the kernel already holds a reference to
    /// (getattr/open/read/write/etc.), without affecting the lookup count.
    pub fn path_for(&self, ino: u64) -> Option<String> {
        if ino == ROOT_INO {
            return Some(String::new());
        }
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .get(&ino)
            .map(|e| e.path.clone())
    }

    pub fn forget(&self, ino: u64, n: u64) {
        if ino == ROOT_INO {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let stale_path = match inner.entries.get_mut(&ino) {
            Some(entry) => {
                entry.lookups = entry.lookups.saturating_sub(n);
                (entry.lookups == 0).then(|| entry.path.clone())
            }
            None => None,
        };
        if let Some(path) = stale_path {
            inner.entries.remove(&ino);
            inner.path_to_ino.remove(&path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_path_is_reserved_inode_one() {
        let t = InodeTable::new();
        assert_eq!(t.lookup(""), ROOT_INO);
        assert_eq!(t.path_for(ROOT_INO), Some(String::new()));
    }

    #[test]
    fn repeated_lookup_of_same_path_is_stable() {
        let t = InodeTable::new();
        let a = t.lookup("backend/default/conversation/abcd1234");
        let b = t.lookup("backend/default/conversation/abcd1234");
        assert_eq!(a, b);
    }

    #[test]
    fn forget_removes_entry_only_at_zero_refcount() {
        let t = InodeTable::new();
        let ino = t.lookup("backend/default");
        let _ = t.lookup("backend/default");
        assert!(t.path_for(ino).is_some());
        t.forget(ino, 1);
        assert!(t.path_for(ino).is_some());
        t.forget(ino, 1);
        assert!(t.path_for(ino).is_none());
    }

    #[test]
    fn distinct_paths_get_distinct_inodes() {
        let t = InodeTable::new();
        let a = t.lookup("backend/default");
        let b = t.lookup("backend/alt");
        assert_ne!(a, b);
    }
}
