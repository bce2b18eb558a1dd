//! Backend list operations: mkdir/rmdir/rename/symlink/url read-write, all
//! against the state store's backend registry.

use std::sync::Arc;

use crate::error::{FsError, FsResult};
use crate::fs::shared::FsShared;
use crate::state::DEFAULT_BACKEND_NAME;

/// Simple (undotted) backend names derive a URL from a template; qualified
/// (dotted) names start with an empty URL to be written later.
pub fn mkdir(shared: &Arc<FsShared>, name: &str) -> FsResult<()> {
    if name == DEFAULT_BACKEND_NAME {
        return Err(FsError::permission("the name \"default\" is reserved"));
    }
    let url = if name.contains('.') {
        String::new()
    } else {
        format!("https://{name}.example.com")
    };
    shared.state.add_backend(name, &url)
}

pub fn rmdir(shared: &Arc<FsShared>, name: &str) -> FsResult<()> {
    shared.state.remove_backend(name)?;
    shared.backends.forget(name);
    Ok(())
}

/// POSIX same-directory rename only; `default` is never a valid source or
/// target.
pub fn rename(shared: &Arc<FsShared>, old: &str, new: &str) -> FsResult<()> {
    if old == DEFAULT_BACKEND_NAME || new == DEFAULT_BACKEND_NAME {
        return Err(FsError::permission("cannot rename the \"default\" entry"));
    }
    let record = shared.state.get_backend(old).ok_or_else(|| FsError::not_found(format!("backend {old}")))?;
    shared.state.add_backend(new, &record.url)?;
    if record.is_default {
        shared.state.set_default_backend(new)?;
    }
    shared.state.remove_backend(old)?;
    shared.backends.forget(old);
    Ok(())
}

/// Only a symlink named `default` is legal here, and creating it changes the
/// default backend rather than creating a literal symlink entry.
pub fn symlink(shared: &Arc<FsShared>, link_name: &str, target: &str) -> FsResult<()> {
    if link_name != DEFAULT_BACKEND_NAME {
        return Err(FsError::permission(format!("cannot create symlink {link_name} under backend/")));
    }
    let target_name = target.rsplit('/').next().unwrap_or(target);
    shared.state.set_default_backend(target_name)
}

/// `url` write: validate scheme, persist, and invalidate the lazily-built
/// HTTP client so the next call picks up the new URL.
pub fn write_url(shared: &Arc<FsShared>, name: &str, url: &str) -> FsResult<()> {
    let url = url.trim();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(FsError::invalid("backend url must be http:// or https://"));
    }
    shared.state.set_backend_url(name, url)?;
    shared.backends.invalidate_client(name);
    Ok(())
}

/// Best-effort reachability probe for the `connected` presence file: a
/// configured-but-unreachable backend is absent just like an unconfigured
/// one.
pub async fn is_connected(shared: &Arc<FsShared>, name: &str) -> bool {
    let Some(record) = shared.state.get_backend(name) else {
        return false;
    };
    if record.url.is_empty() {
        return false;
    }
    super::models::list_models(shared, name).await.is_ok()
}
