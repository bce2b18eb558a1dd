//! Models directory: entries keyed by display name, `new/clone` +
//! `new/start` workflow.

use std::sync::Arc;

use crate::backend::types::Model;
use crate::cache::{self, CachedValue};
use crate::error::{FsError, FsResult};
use crate::fs::shared::FsShared;

pub async fn list_models(shared: &Arc<FsShared>, backend: &str) -> FsResult<Arc<[Model]>> {
    let entry = shared.backends.entry(backend);
    let client = entry.client(&shared.state)?;
    let value = entry
        .requests
        .get_or_fetch(cache::KEY_MODELS, || async move { client.list_models().await.map(CachedValue::Models) })
        .await
        .map_err(FsError::from)?;
    Ok(value.as_models().expect("KEY_MODELS always stores CachedValue::Models").to_vec().into())
}

pub async fn default_model_name(shared: &Arc<FsShared>, backend: &str) -> FsResult<String> {
    let entry = shared.backends.entry(backend);
    let client = entry.client(&shared.state)?;
    let value = entry
        .requests
        .get_or_fetch(cache::KEY_DEFAULT_MODEL, || async move { client.get_default_model().await.map(CachedValue::DefaultModel) })
        .await
        .map_err(FsError::from)?;
    Ok(value.as_default_model().expect("KEY_DEFAULT_MODEL always stores CachedValue::DefaultModel").to_string())
}

pub async fn find_model(shared: &Arc<FsShared>, backend: &str, display_name: &str) -> FsResult<Model> {
    let models = list_models(shared, backend).await?;
    models
        .iter()
        .find(|m| m.display_name == display_name)
        .cloned()
        .ok_or_else(|| FsError::not_found(format!("model {display_name}")))
}

/// `new/start`'s shell snippet: clones a fresh conversation id, sets its
/// model to `name`, and prints the id — symlink-aware, so it resolves its
/// own real path rather than its invocation path.
pub fn start_snippet(backend: &str, model: &str) -> String {
    format!(
        "#!/bin/sh\nset -e\nself=$(readlink -f \"$0\")\nroot=$(cd \"$(dirname \"$self\")/../../../../..\" && pwd)\nid=$(cat \"$root/backend/{backend}/conversation/new/clone\")\necho \"model={model}\" > \"$root/backend/{backend}/conversation/$id/ctl\"\necho \"$id\"\n"
    )
}
