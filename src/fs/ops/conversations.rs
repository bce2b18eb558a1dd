//! Conversation resolution, ctl/send commit logic, and message rendering.
//!
//! Every function here takes the already-classified alias string as written
//! in the path (local id, backend id, or slug) and resolves it against the
//! state store scoped to the right backend — the node-kind classifier in
//! `fs::path` deliberately does none of this itself.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::types::ConversationFetch;
use crate::cache::{self, CachedValue, ParsedBundle};
use crate::error::{FsError, FsResult};
use crate::fs::shared::FsShared;
use crate::state::Conversation;

/// Resolve `alias` (local id, backend id, or slug) to a tracked conversation
/// within `backend`. Tries state-store keys first; on a miss, fetches the
/// archived list and adopts a newly discovered entry from there.
pub async fn resolve_conversation(shared: &Arc<FsShared>, backend: &str, alias: &str) -> FsResult<Conversation> {
    if let Some(c) = by_alias(shared, backend, alias) {
        return Ok(c);
    }

    let archived = fetch_archived(shared, backend).await?;
    if let Some(meta) = archived.iter().find(|m| m.id == alias || m.slug.as_deref() == Some(alias)) {
        let now = shared.now_rfc3339();
        let local_id = shared.state.adopt(backend, &meta.id, meta.slug.as_deref(), &now)?;
        return shared
            .state
            .get(&local_id)
            .ok_or_else(|| FsError::not_found(format!("conversation {alias}")));
    }

    Err(FsError::not_found(format!("conversation {alias}")))
}

fn by_alias(shared: &Arc<FsShared>, backend: &str, alias: &str) -> Option<Conversation> {
    let candidate = shared
        .state
        .get(alias)
        .or_else(|| shared.state.get_by_backend_id(alias))
        .or_else(|| shared.state.get_by_slug(alias))?;
    (candidate.backend == backend).then_some(candidate)
}

/// Directory names for `/backend/{b}/conversation` readdir: the local id of
/// every created, non-archived conversation already tracked, plus any live
/// backend conversations not yet adopted.
pub async fn list_conversation_names(shared: &Arc<FsShared>, backend: &str) -> FsResult<Vec<String>> {
    let mut names: Vec<String> = shared
        .state
        .list(backend)
        .into_iter()
        .filter(|c| c.created)
        .map(|c| c.local_id)
        .collect();

    let live = fetch_conversations(shared, backend).await?;
    let now = shared.now_rfc3339();
    for meta in live.iter() {
        if shared.state.get_by_backend_id(&meta.id).is_none() {
            let local_id = shared.state.adopt(backend, &meta.id, meta.slug.as_deref(), &now)?;
            names.push(local_id);
        }
    }

    let archived_ids: std::collections::HashSet<String> = fetch_archived(shared, backend)
        .await
        .map(|v| v.iter().map(|m| m.id.clone()).collect())
        .unwrap_or_default();
    names.retain(|local_id| {
        shared
            .state
            .get(local_id)
            .and_then(|c| c.backend_id)
            .map(|bid| !archived_ids.contains(&bid))
            .unwrap_or(true)
    });

    names.sort();
    names.dedup();
    Ok(names)
}

pub async fn fetch_conversations(shared: &Arc<FsShared>, backend: &str) -> FsResult<Arc<[crate::backend::types::ConversationMeta]>> {
    let entry = shared.backends.entry(backend);
    let client = entry.client(&shared.state)?;
    let value = entry
        .requests
        .get_or_fetch(cache::KEY_CONVERSATIONS, || async move {
            client.list_conversations().await.map(CachedValue::Conversations)
        })
        .await
        .map_err(FsError::from)?;
    Ok(value
        .as_conversations()
        .expect("KEY_CONVERSATIONS always stores CachedValue::Conversations")
        .to_vec()
        .into())
}

pub async fn fetch_archived(shared: &Arc<FsShared>, backend: &str) -> FsResult<Arc<[crate::backend::types::ConversationMeta]>> {
    let entry = shared.backends.entry(backend);
    let client = entry.client(&shared.state)?;
    let value = entry
        .requests
        .get_or_fetch(cache::KEY_ARCHIVED_CONVERSATIONS, || async move {
            client.list_archived_conversations().await.map(CachedValue::ArchivedConversations)
        })
        .await
        .map_err(FsError::from)?;
    Ok(value
        .as_archived_conversations()
        .expect("KEY_ARCHIVED_CONVERSATIONS always stores CachedValue::ArchivedConversations")
        .to_vec()
        .into())
}

/// Fetch (through cache) the raw conversation payload for an already-created
/// conversation, returning both the meta and the parsed-and-tool-mapped
/// message bundle.
pub async fn fetch_bundle(shared: &Arc<FsShared>, backend: &str, conv: &Conversation) -> FsResult<(Arc<ConversationFetch>, Arc<ParsedBundle>)> {
    let backend_id = conv
        .backend_id
        .as_deref()
        .ok_or_else(|| FsError::not_found("conversation has no backend id yet"))?
        .to_string();

    let entry = shared.backends.entry(backend);
    let client = entry.client(&shared.state)?;
    let key = cache::key_conversation(&backend_id);
    let id_for_fetch = backend_id.clone();
    let value = entry
        .requests
        .get_or_fetch(&key, || async move { client.get_conversation(&id_for_fetch).await.map(CachedValue::Conversation) })
        .await
        .map_err(FsError::from)?;
    let fetch = value.as_conversation().expect("key_conversation always stores CachedValue::Conversation").clone();
    let fetch = Arc::new(fetch);
    let bundle = shared.parse_cache.get_or_parse(&backend_id, &fetch.messages_raw)?;
    Ok((fetch, bundle))
}

fn invalidate_conversation(shared: &Arc<FsShared>, backend: &str, backend_id: Option<&str>) {
    let entry = shared.backends.entry(backend);
    entry.requests.invalidate(cache::KEY_CONVERSATIONS);
    entry.requests.invalidate(cache::KEY_ARCHIVED_CONVERSATIONS);
    if let Some(id) = backend_id {
        entry.requests.invalidate(&cache::key_conversation(id));
        shared.parse_cache.invalidate_conversation(id);
    }
}

/// Apply accumulated `ctl` writes: newline-separated `key=value` assignments,
/// applied atomically on release. Unknown keys are ignored; an unresolvable
/// `model` value fails the whole write.
pub async fn apply_ctl(shared: &Arc<FsShared>, backend: &str, local_id: &str, buffer: &[u8]) -> FsResult<()> {
    let text = String::from_utf8_lossy(buffer);
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "model" => {
                let models = super::models::list_models(shared, backend).await?;
                if !models.iter().any(|m| m.display_name == value) {
                    return Err(FsError::invalid(format!("unknown model {value}")));
                }
                shared.state.set_model(local_id, value.trim())?;
            }
            "cwd" => {
                shared.state.set_cwd(local_id, value.trim())?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Commit a buffered `send` write exactly once: `start`
/// when the conversation has no `backend_id` yet, `send` otherwise.
pub async fn commit_send(shared: &Arc<FsShared>, backend: &str, local_id: &str, buffer: &[u8]) -> FsResult<()> {
    let text = String::from_utf8_lossy(buffer).trim().to_string();
    let conv = shared.state.get(local_id).ok_or_else(|| FsError::not_found(format!("conversation {local_id}")))?;
    let entry = shared.backends.entry(backend);
    let client = entry.client(&shared.state)?;
    let now = shared.now_rfc3339();

    match &conv.backend_id {
        None => {
            let (backend_id, slug) = client
                .start_conversation(conv.model.as_deref(), conv.cwd.as_deref(), &text)
                .await
                .map_err(FsError::from)?;
            shared.state.mark_created(local_id, &backend_id, slug.as_deref(), &now)?;
            invalidate_conversation(shared, backend, Some(&backend_id));
        }
        Some(backend_id) => {
            client.send_message(backend_id, &text, conv.model.as_deref()).await.map_err(FsError::from)?;
            invalidate_conversation(shared, backend, Some(backend_id));
        }
    }
    Ok(())
}

/// Resolve the conversation field at `/backend/{b}/conversation/{alias}/archived`
/// or `.../waiting_for_input` to a presence boolean by fetching live metadata.
pub async fn conversation_meta(shared: &Arc<FsShared>, backend: &str, conv: &Conversation) -> FsResult<crate::backend::types::ConversationMeta> {
    if let Some(backend_id) = &conv.backend_id {
        let live = fetch_conversations(shared, backend).await.ok();
        let archived = fetch_archived(shared, backend).await.ok();
        let found = live
            .iter()
            .flat_map(|v| v.iter())
            .chain(archived.iter().flat_map(|v| v.iter()))
            .find(|m| &m.id == backend_id)
            .cloned();
        if let Some(meta) = found {
            return Ok(meta);
        }
    }
    Ok(crate::backend::types::ConversationMeta {
        id: conv.backend_id.clone().unwrap_or_default(),
        slug: conv.slug.clone(),
        archived: false,
        waiting_for_input: false,
        model: conv.model.clone(),
        created_at: conv.api_created_at.clone(),
        updated_at: conv.api_updated_at.clone(),
    })
}

/// Resolve a message by 1-based... (sequence id as written in the path) from
/// an already-fetched bundle.
pub fn find_message<'a>(bundle: &'a ParsedBundle, seq: u64) -> Option<&'a crate::backend::types::Message> {
    bundle.messages.iter().find(|m| m.sequence_id == seq)
}

pub fn tool_map(bundle: &ParsedBundle) -> &HashMap<String, String> {
    &bundle.tool_map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackendClient;
    use crate::backend::types::ConversationMeta;
    use crate::fs::shared::FsShared;
    use crate::state::StateStore;
    use std::time::Duration;
    use tempfile::tempdir;

    fn harness() -> (tempfile::TempDir, Arc<FsShared>, Arc<FakeBackendClient>) {
        let dir = tempdir().unwrap();
        let state = StateStore::load(dir.path().join("state.json")).unwrap();
        let shared = FsShared::new(state, Duration::from_secs(60), Duration::from_secs(3600), false, dir.path().join("mnt"));
        let fake = Arc::new(FakeBackendClient::default());
        shared.backends.entry("default").set_client_for_test(fake.clone());
        (dir, shared, fake)
    }

    #[tokio::test]
    async fn resolve_conversation_adopts_from_archived_list() {
        let (_dir, shared, fake) = harness();
        fake.archived.lock().unwrap().push(ConversationMeta {
            id: "backend-99".into(),
            slug: Some("old-chat".into()),
            archived: true,
            waiting_for_input: false,
            model: None,
            created_at: Some("2026-01-01T00:00:00Z".into()),
            updated_at: Some("2026-01-02T00:00:00Z".into()),
        });

        let conv = resolve_conversation(&shared, "default", "old-chat").await.unwrap();
        assert_eq!(conv.backend_id.as_deref(), Some("backend-99"));
        assert_eq!(conv.slug.as_deref(), Some("old-chat"));

        // Second resolution hits the now-tracked state-store entry directly.
        let again = resolve_conversation(&shared, "default", "backend-99").await.unwrap();
        assert_eq!(again.local_id, conv.local_id);
    }

    #[tokio::test]
    async fn resolve_conversation_unknown_alias_fails() {
        let (_dir, shared, _fake) = harness();
        let err = resolve_conversation(&shared, "default", "nope").await.unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[tokio::test]
    async fn apply_ctl_rejects_unknown_model_leaves_state_untouched() {
        let (_dir, shared, fake) = harness();
        fake.models.lock().unwrap().push(crate::backend::types::Model {
            id: "m1".into(),
            display_name: "fast".into(),
            ready: true,
            source: "local".into(),
            max_context_tokens: 1000,
        });
        let local_id = shared.state.clone_conversation("default", "2026-01-01T00:00:00Z").unwrap();

        let err = apply_ctl(&shared, "default", &local_id, b"model=slow\n").await.unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
        assert_eq!(shared.state.get(&local_id).unwrap().model, None);
    }

    #[tokio::test]
    async fn apply_ctl_accepts_known_model_and_cwd() {
        let (_dir, shared, fake) = harness();
        fake.models.lock().unwrap().push(crate::backend::types::Model {
            id: "m1".into(),
            display_name: "fast".into(),
            ready: true,
            source: "local".into(),
            max_context_tokens: 1000,
        });
        let local_id = shared.state.clone_conversation("default", "2026-01-01T00:00:00Z").unwrap();

        apply_ctl(&shared, "default", &local_id, b"model=fast\ncwd=/tmp/work\nunknown=ignored\n")
            .await
            .unwrap();

        let conv = shared.state.get(&local_id).unwrap();
        assert_eq!(conv.model.as_deref(), Some("fast"));
        assert_eq!(conv.cwd.as_deref(), Some("/tmp/work"));
    }

    #[tokio::test]
    async fn commit_send_starts_then_sends_exactly_once_each() {
        let (_dir, shared, fake) = harness();
        let local_id = shared.state.clone_conversation("default", "2026-01-01T00:00:00Z").unwrap();

        commit_send(&shared, "default", &local_id, b"hello world").await.unwrap();
        let conv = shared.state.get(&local_id).unwrap();
        assert!(conv.created);
        assert!(conv.backend_id.is_some());
        assert_eq!(fake.conversations.lock().unwrap().len(), 1);
        assert!(fake.sent.lock().unwrap().is_empty());

        commit_send(&shared, "default", &local_id, b"a follow-up").await.unwrap();
        let sent = fake.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "a follow-up");
    }

    #[tokio::test]
    async fn commit_send_failure_leaves_conversation_uncreated() {
        let (_dir, shared, fake) = harness();
        let local_id = shared.state.clone_conversation("default", "2026-01-01T00:00:00Z").unwrap();
        *fake.fail_next.lock().unwrap() = Some(crate::error::BackendError { status: Some(500), body: "boom".into() });

        let err = commit_send(&shared, "default", &local_id, b"hi").await.unwrap_err();
        assert_eq!(err.errno(), libc::EIO);
        assert!(!shared.state.get(&local_id).unwrap().created);
    }

    #[tokio::test]
    async fn fetch_bundle_parses_messages_and_exposes_tool_map() {
        let (_dir, shared, fake) = harness();
        let local_id = shared.state.clone_conversation("default", "2026-01-01T00:00:00Z").unwrap();
        commit_send(&shared, "default", &local_id, b"hi").await.unwrap();
        let conv = shared.state.get(&local_id).unwrap();
        let backend_id = conv.backend_id.clone().unwrap();

        fake.set_messages(
            &backend_id,
            format!(
                r#"{{"messages":[
                    {{"message_id":"m0","conversation_id":"{backend_id}","sequence_id":0,"type":"user","created_at":"t","content":[{{"type":0,"text":"hi"}}]}},
                    {{"message_id":"m1","conversation_id":"{backend_id}","sequence_id":1,"type":"assistant","created_at":"t","content":[{{"type":5,"id":"tu1","tool_name":"bash","tool_use_id":null}}]}},
                    {{"message_id":"m2","conversation_id":"{backend_id}","sequence_id":2,"type":"user","created_at":"t","content":[{{"type":6,"tool_use_id":"tu1","tool_result":[{{"text":"ok"}}]}}]}}
                ]}}"#
            )
            .into_bytes(),
        );

        let (_fetch, bundle) = fetch_bundle(&shared, "default", &conv).await.unwrap();
        assert_eq!(bundle.messages.len(), 3);
        assert_eq!(bundle.tool_map.get("tu1").map(String::as_str), Some("bash"));
        assert_eq!(find_message(&bundle, 1).unwrap().message_id, "m1");
    }
}
