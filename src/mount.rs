//! Mount bootstrap: spawns the background FUSE session at a mountpoint.
//!
//! `fuser`'s synchronous `Filesystem` trait is driven by background threads
//! the crate manages internally (`spawn_mount2`); the node graph underneath
//! it is async, so each [`crate::fs::filesystem::Fs`] carries a borrowed
//! [`tokio::runtime::Handle`] and bridges with `block_on` from whichever of
//! those threads the kernel hands a request to. None of those threads are
//! themselves tokio workers, so the bridge never deadlocks on its own
//! runtime.

use std::sync::Arc;

use anyhow::{Context, Result};
use fuser::MountOption;

use crate::fs::filesystem::Fs;
use crate::fs::shared::FsShared;

/// Mount the node graph at `shared.mountpoint` and return the background
/// session guard. Dropping the guard unmounts.
pub fn mount(shared: Arc<FsShared>, rt: tokio::runtime::Handle) -> Result<fuser::BackgroundSession> {
    let mountpoint = shared.mountpoint.clone();
    std::fs::create_dir_all(&mountpoint).with_context(|| format!("creating mountpoint {}", mountpoint.display()))?;

    let options = vec![
        MountOption::FSName("shelleyfs".to_string()),
        MountOption::RW,
        MountOption::NoExec,
        MountOption::NoAtime,
    ];

    let fs = Fs::new(shared, rt);
    fuser::spawn_mount2(fs, &mountpoint, &options).with_context(|| format!("mounting shelleyfs at {}", mountpoint.display()))
}
