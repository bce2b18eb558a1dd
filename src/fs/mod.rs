//! The node graph: a tree of filesystem node kinds classified
//! from canonical paths (`path`), resolved against the shared lower-layer
//! handles (`shared`, `ops`), with stable inodes (`inode`), kernel
//! cache-directive policy (`attrs`), per-handle state (`handles`), and the
//! lazily-built per-backend client/cache registry (`registry`).
//!
//! `filesystem` is the only module that speaks the `fuser` wire protocol;
//! everything else in this tree is pure node-graph semantics.

pub mod attrs;
pub mod filesystem;
pub mod handles;
pub mod inode;
pub mod ops;
pub mod path;
pub mod registry;
pub mod shared;
