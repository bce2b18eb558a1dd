//! Node-operation implementations. Given an already-classified
//! [`Node`](crate::fs::path::Node) and the shared lower-layer handles,
//! resolve its kind and cache policy, its directory entries, its file
//! content, or its symlink target. `fs::filesystem` is the only caller of
//! this module — it knows nothing about the fuser wire protocol, only about
//! the node graph's own semantics.

pub mod backends;
pub mod conversations;
pub mod models;
pub mod root;

use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{FsError, FsResult};
use crate::fs::attrs::CacheClass;
use crate::fs::path::{ConvField, ModelField, Node, ProjectedRoot};
use crate::fs::shared::FsShared;
use crate::format;
use crate::projector::{self, ProjectedNode, StringifiedFields};
use crate::state::{Conversation, DEFAULT_BACKEND_NAME};

/// What a node resolves to, independent of the fuser wire format.
pub enum Kind {
    Dir,
    File { size: u64 },
    Symlink { target: String },
}

impl Kind {
    pub fn file_type(&self) -> fuser::FileType {
        match self {
            Kind::Dir => fuser::FileType::Directory,
            Kind::File { .. } => fuser::FileType::RegularFile,
            Kind::Symlink { .. } => fuser::FileType::Symlink,
        }
    }
}

pub struct Resolved {
    pub kind: Kind,
    pub cache: CacheClass,
    /// Overrides `SystemTime::now()` for nodes whose timestamps should track
    /// remote state rather than the moment of the local call (the `archived`
    /// presence file reflects the conversation's own update time).
    pub mtime: Option<SystemTime>,
}

fn dir(cache: CacheClass) -> FsResult<Resolved> {
    Ok(Resolved { kind: Kind::Dir, cache, mtime: None })
}

fn file(size: u64, cache: CacheClass) -> FsResult<Resolved> {
    Ok(Resolved { kind: Kind::File { size }, cache, mtime: None })
}

fn symlink(target: String, cache: CacheClass) -> FsResult<Resolved> {
    Ok(Resolved { kind: Kind::Symlink { target }, cache, mtime: None })
}

fn file_with_mtime(size: u64, cache: CacheClass, mtime: Option<SystemTime>) -> FsResult<Resolved> {
    Ok(Resolved { kind: Kind::File { size }, cache, mtime })
}

/// Parse a backend-supplied RFC3339 timestamp into a [`SystemTime`],
/// discarding it (falling back to "now") on any parse failure rather than
/// failing the whole `getattr`/`lookup` call over a cosmetic field.
fn parse_timestamp(s: &str) -> Option<SystemTime> {
    chrono::DateTime::parse_from_rfc3339(s).ok().map(SystemTime::from)
}

/// Node kinds whose `open()` with write access is legitimate: `ctl`, `send`,
/// and a backend's `url` file. Every other node is read-only: opening it for
/// write is an immutable-path violation (`EPERM`).
pub fn is_writable(node: &Node) -> bool {
    matches!(node, Node::ConversationCtl { .. } | Node::ConversationSend { .. } | Node::BackendUrl { .. })
}

fn stringified_fields() -> StringifiedFields {
    StringifiedFields::new(["llm_data", "usage_data"])
}

fn require_backend(shared: &Arc<FsShared>, backend: &str) -> FsResult<()> {
    if backend == DEFAULT_BACKEND_NAME || shared.state.get_backend(backend).is_some() {
        Ok(())
    } else {
        Err(FsError::not_found(format!("backend {backend}")))
    }
}

fn default_backend_target(shared: &Arc<FsShared>) -> String {
    shared.state.default_backend_name()
}

async fn resolve_conv(shared: &Arc<FsShared>, backend: &str, alias: &str) -> FsResult<Conversation> {
    conversations::resolve_conversation(shared, backend, alias).await
}

/// Parse a message field value's raw JSON string, defaulting to `null` on an
/// absent or unparsable field, then project it.
fn projected_root(message: &crate::backend::types::Message, root: ProjectedRoot) -> ProjectedNode {
    let raw = match root {
        ProjectedRoot::LlmData => message.llm_data.as_deref(),
        ProjectedRoot::UsageData => message.usage_data.as_deref(),
    }
    .unwrap_or("null");
    let value: serde_json::Value = serde_json::from_str(raw).unwrap_or(serde_json::Value::Null);
    projector::project(&value, None, &stringified_fields())
}

fn navigate<'a>(node: &'a ProjectedNode, path: &[String]) -> Option<&'a ProjectedNode> {
    let mut cur = node;
    for seg in path {
        match cur {
            ProjectedNode::Dir(entries) => cur = &entries.iter().find(|e| &e.name == seg)?.node,
            ProjectedNode::File(_) => return None,
        }
    }
    Some(cur)
}

/// Resolve a node's kind and cache policy. Used by both
/// `lookup` and `getattr`.
pub async fn resolve(shared: &Arc<FsShared>, node: &Node) -> FsResult<Resolved> {
    use Node::*;
    match node {
        Root => dir(CacheClass::SemiStable),
        Readme => file(root::README.len() as u64, CacheClass::Immutable),
        CompatSymlink(target) => symlink(root::compat_target(*target, &default_backend_target(shared)), CacheClass::Mutable),

        BackendDir => dir(CacheClass::SemiStable),
        BackendDefaultSymlink => symlink(default_backend_target(shared), CacheClass::Mutable),
        Backend { backend } => {
            require_backend(shared, backend)?;
            dir(CacheClass::SemiStable)
        }
        BackendUrl { backend } => {
            let record = shared.state.get_backend(backend).ok_or_else(|| FsError::not_found(format!("backend {backend}")))?;
            file(record.url.len() as u64 + 1, CacheClass::Mutable)
        }
        BackendConnected { backend } => {
            if backends::is_connected(shared, backend).await {
                file(0, CacheClass::Mutable)
            } else {
                Err(FsError::not_found("backend not connected"))
            }
        }
        BackendNewSymlink { backend } => {
            require_backend(shared, backend)?;
            symlink("model/default/new".to_string(), CacheClass::Immutable)
        }

        ModelDir { backend } => {
            require_backend(shared, backend)?;
            dir(CacheClass::SemiStable)
        }
        ModelDefaultSymlink { backend } => {
            let name = models::default_model_name(shared, backend).await?;
            symlink(name, CacheClass::Mutable)
        }
        Model { backend, name } => {
            models::find_model(shared, backend, name).await?;
            dir(CacheClass::SemiStable)
        }
        ModelFieldNode { backend, name, field } => {
            let model = models::find_model(shared, backend, name).await?;
            match field {
                ModelField::Ready => {
                    if model.ready {
                        file(0, CacheClass::Mutable)
                    } else {
                        Err(FsError::not_found("model not ready"))
                    }
                }
                ModelField::Id => file(model.id.len() as u64 + 1, CacheClass::Immutable),
                ModelField::Source => file(model.source.len() as u64 + 1, CacheClass::Immutable),
                ModelField::MaxContextTokens => file(model.max_context_tokens.to_string().len() as u64 + 1, CacheClass::Immutable),
            }
        }
        ModelNewDir { backend, name } => {
            models::find_model(shared, backend, name).await?;
            dir(CacheClass::SemiStable)
        }
        ModelNewClone { backend, name } => {
            models::find_model(shared, backend, name).await?;
            file(9, CacheClass::Mutable)
        }
        ModelNewStart { backend, name } => {
            models::find_model(shared, backend, name).await?;
            file(models::start_snippet(backend, name).len() as u64, CacheClass::Mutable)
        }

        ConversationDir { backend } => {
            require_backend(shared, backend)?;
            dir(CacheClass::SemiStable)
        }
        ConversationNewDir { backend } => {
            require_backend(shared, backend)?;
            dir(CacheClass::SemiStable)
        }
        ConversationNewClone { backend } => {
            require_backend(shared, backend)?;
            file(9, CacheClass::Mutable)
        }
        Conversation { backend, alias } => {
            resolve_conv(shared, backend, alias).await?;
            dir(CacheClass::SemiStable)
        }
        ConversationCtl { backend, alias } => {
            resolve_conv(shared, backend, alias).await?;
            file(0, CacheClass::Mutable)
        }
        ConversationSend { backend, alias } => {
            resolve_conv(shared, backend, alias).await?;
            file(0, CacheClass::Mutable)
        }
        ConversationField { backend, alias, field } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            match field {
                ConvField::Id => file(conv.local_id.len() as u64 + 1, CacheClass::Immutable),
                ConvField::Slug => file(conv.slug.clone().unwrap_or_default().len() as u64 + 1, CacheClass::SemiStable),
                ConvField::Created => file(if conv.created { 1 } else { 0 }, CacheClass::Negative),
                ConvField::Archived => {
                    let meta = conversations::conversation_meta(shared, backend, &conv).await?;
                    if meta.archived {
                        let mtime = meta.updated_at.as_deref().and_then(parse_timestamp);
                        file_with_mtime(0, CacheClass::Negative, mtime)
                    } else {
                        Err(FsError::not_found("conversation not archived"))
                    }
                }
                ConvField::Waiting => {
                    let meta = conversations::conversation_meta(shared, backend, &conv).await?;
                    if meta.waiting_for_input {
                        file(0, CacheClass::Negative)
                    } else {
                        Err(FsError::not_found("conversation not waiting for input"))
                    }
                }
            }
        }
        ConversationModelSymlink { backend, alias } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let name = conv.model.unwrap_or_else(|| DEFAULT_BACKEND_NAME.to_string());
            symlink(format!("../../model/{name}"), CacheClass::Mutable)
        }
        ConversationCwdSymlink { backend, alias } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            symlink(conv.cwd.unwrap_or_else(|| "/".to_string()), CacheClass::Mutable)
        }

        MessagesDir { backend, alias } => {
            resolve_conv(shared, backend, alias).await?;
            dir(CacheClass::SemiStable)
        }
        MessagesCount { backend, alias } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let count = match conversations::fetch_bundle(shared, backend, &conv).await {
                Ok((_, bundle)) => bundle.messages.len(),
                Err(_) => 0,
            };
            file(count.to_string().len() as u64 + 1, CacheClass::Mutable)
        }
        MessagesAllMd { backend, alias } => {
            let content = render_all_md(shared, backend, alias).await?;
            file(content.len() as u64, CacheClass::SemiStable)
        }
        MessagesAllJson { backend, alias } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let (fetch, _) = conversations::fetch_bundle(shared, backend, &conv).await?;
            file(fetch.messages_raw.len() as u64, CacheClass::SemiStable)
        }
        MessageDir { backend, alias, seq } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let (_, bundle) = conversations::fetch_bundle(shared, backend, &conv).await?;
            conversations::find_message(&bundle, *seq).ok_or_else(|| FsError::not_found(format!("message {seq}")))?;
            dir(CacheClass::Immutable)
        }
        MessageField { backend, alias, seq, field } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let (_, bundle) = conversations::fetch_bundle(shared, backend, &conv).await?;
            let message = conversations::find_message(&bundle, *seq).ok_or_else(|| FsError::not_found(format!("message {seq}")))?;
            let value = message_field_value(message, field);
            file(value.len() as u64 + 1, CacheClass::Immutable)
        }
        MessageContentMd { backend, alias, seq } => {
            let content = render_message_md(shared, backend, alias, *seq).await?;
            file(content.len() as u64, CacheClass::Immutable)
        }
        MessageProjected { backend, alias, seq, root, path } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let (_, bundle) = conversations::fetch_bundle(shared, backend, &conv).await?;
            let message = conversations::find_message(&bundle, *seq).ok_or_else(|| FsError::not_found(format!("message {seq}")))?;
            let tree = projected_root(message, *root);
            let node = navigate(&tree, path).ok_or_else(|| FsError::not_found("projected path"))?;
            match node {
                ProjectedNode::Dir(_) => dir(CacheClass::Immutable),
                ProjectedNode::File(bytes) => file(bytes.len() as u64, CacheClass::Immutable),
            }
        }

        QueryLastDir { backend, alias } => {
            resolve_conv(shared, backend, alias).await?;
            dir(CacheClass::SemiStable)
        }
        QueryLastNDir { backend, alias, .. } => {
            resolve_conv(shared, backend, alias).await?;
            dir(CacheClass::SemiStable)
        }
        QuerySinceDir { backend, alias } => {
            resolve_conv(shared, backend, alias).await?;
            dir(CacheClass::SemiStable)
        }
        QuerySinceSlugDir { backend, alias, .. } => {
            resolve_conv(shared, backend, alias).await?;
            dir(CacheClass::SemiStable)
        }
        QuerySinceSlugNDir { backend, alias, .. } => {
            resolve_conv(shared, backend, alias).await?;
            dir(CacheClass::SemiStable)
        }
        QueryLastEntry { backend, alias, n, index } => {
            let target = last_entry_target(shared, backend, alias, *n, *index).await?;
            symlink(target, CacheClass::SemiStable)
        }
        QuerySinceEntry { backend, alias, slug, n, index } => {
            let target = since_entry_target(shared, backend, alias, slug, *n, *index).await?;
            symlink(target, CacheClass::SemiStable)
        }
    }
}

fn message_field_value(message: &crate::backend::types::Message, field: &str) -> String {
    match field {
        "message_id" => message.message_id.clone(),
        "conversation_id" => message.conversation_id.clone(),
        "sequence_id" => message.sequence_id.to_string(),
        "type" => message.kind.clone(),
        "created_at" => message.created_at.clone(),
        _ => String::new(),
    }
}

async fn render_all_md(shared: &Arc<FsShared>, backend: &str, alias: &str) -> FsResult<String> {
    let conv = resolve_conv(shared, backend, alias).await?;
    let (_, bundle) = conversations::fetch_bundle(shared, backend, &conv).await?;
    Ok(format::render_conversation_markdown(&bundle.messages, &bundle.tool_map))
}

async fn render_message_md(shared: &Arc<FsShared>, backend: &str, alias: &str, seq: u64) -> FsResult<String> {
    let conv = resolve_conv(shared, backend, alias).await?;
    let (_, bundle) = conversations::fetch_bundle(shared, backend, &conv).await?;
    let message = conversations::find_message(&bundle, seq).ok_or_else(|| FsError::not_found(format!("message {seq}")))?;
    let tool_use_by_id = format::build_tool_use_index(&bundle.messages);
    Ok(format::render_message(message, &bundle.tool_map, &tool_use_by_id))
}

async fn last_entry_target(shared: &Arc<FsShared>, backend: &str, alias: &str, n: usize, seq: usize) -> FsResult<String> {
    let conv = resolve_conv(shared, backend, alias).await?;
    let (_, bundle) = conversations::fetch_bundle(shared, backend, &conv).await?;
    let sliced = format::last_n(&bundle.messages, n);
    let message = sliced
        .iter()
        .find(|m| m.sequence_id == seq as u64)
        .ok_or_else(|| FsError::not_found("query result entry"))?;
    let width = format::sequence_width(bundle.max_sequence_id);
    let slug = format::message_slug(message, &bundle.tool_map);
    let name = format::filename_base(message, &slug, width);
    Ok(format!("../../{name}"))
}

async fn since_entry_target(shared: &Arc<FsShared>, backend: &str, alias: &str, slug: &str, n: usize, seq: usize) -> FsResult<String> {
    let conv = resolve_conv(shared, backend, alias).await?;
    let (_, bundle) = conversations::fetch_bundle(shared, backend, &conv).await?;
    let sliced = format::since_slug(&bundle.messages, slug, n, &bundle.tool_map);
    let message = sliced
        .iter()
        .find(|m| m.sequence_id == seq as u64)
        .ok_or_else(|| FsError::not_found("query result entry"))?;
    let width = format::sequence_width(bundle.max_sequence_id);
    let message_slug = format::message_slug(message, &bundle.tool_map);
    let name = format::filename_base(message, &message_slug, width);
    Ok(format!("../../../{name}"))
}

/// Directory entries for `node`, as `(name, child node)` pairs.
pub async fn list_dir(shared: &Arc<FsShared>, node: &Node) -> FsResult<Vec<(String, Node)>> {
    use Node::*;
    match node {
        Root => Ok(vec![
            ("backend".into(), BackendDir),
            ("README.md".into(), Readme),
            ("model".into(), CompatSymlink(crate::fs::path::CompatTarget::Model)),
            ("conversation".into(), CompatSymlink(crate::fs::path::CompatTarget::Conversation)),
            ("send".into(), CompatSymlink(crate::fs::path::CompatTarget::Send)),
        ]),
        BackendDir => {
            let mut entries = vec![("default".into(), BackendDefaultSymlink)];
            for record in shared.state.list_backends() {
                entries.push((record.name.clone(), Backend { backend: record.name }));
            }
            Ok(entries)
        }
        Backend { backend } => {
            require_backend(shared, backend)?;
            Ok(vec![
                ("url".into(), BackendUrl { backend: backend.clone() }),
                ("connected".into(), BackendConnected { backend: backend.clone() }),
                ("model".into(), ModelDir { backend: backend.clone() }),
                ("conversation".into(), ConversationDir { backend: backend.clone() }),
                ("new".into(), BackendNewSymlink { backend: backend.clone() }),
            ])
        }
        ModelDir { backend } => {
            let models = models::list_models(shared, backend).await?;
            let mut entries = vec![("default".into(), ModelDefaultSymlink { backend: backend.clone() })];
            for m in models.iter() {
                entries.push((m.display_name.clone(), Model { backend: backend.clone(), name: m.display_name.clone() }));
            }
            Ok(entries)
        }
        Model { backend, name } => {
            models::find_model(shared, backend, name).await?;
            Ok(vec![
                ("id".into(), ModelFieldNode { backend: backend.clone(), name: name.clone(), field: ModelField::Id }),
                ("ready".into(), ModelFieldNode { backend: backend.clone(), name: name.clone(), field: ModelField::Ready }),
                ("source".into(), ModelFieldNode { backend: backend.clone(), name: name.clone(), field: ModelField::Source }),
                (
                    "max_context_tokens".into(),
                    ModelFieldNode { backend: backend.clone(), name: name.clone(), field: ModelField::MaxContextTokens },
                ),
                ("new".into(), ModelNewDir { backend: backend.clone(), name: name.clone() }),
            ])
        }
        ModelNewDir { backend, name } => Ok(vec![
            ("clone".into(), ModelNewClone { backend: backend.clone(), name: name.clone() }),
            ("start".into(), ModelNewStart { backend: backend.clone(), name: name.clone() }),
        ]),
        ConversationDir { backend } => {
            let mut entries = vec![("new".into(), ConversationNewDir { backend: backend.clone() })];
            for name in conversations::list_conversation_names(shared, backend).await? {
                entries.push((name.clone(), Conversation { backend: backend.clone(), alias: name }));
            }
            Ok(entries)
        }
        ConversationNewDir { backend } => Ok(vec![("clone".into(), ConversationNewClone { backend: backend.clone() })]),
        Conversation { backend, alias } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let meta = conversations::conversation_meta(shared, backend, &conv).await?;
            let mut entries = vec![
                ("ctl".into(), ConversationCtl { backend: backend.clone(), alias: alias.clone() }),
                ("send".into(), ConversationSend { backend: backend.clone(), alias: alias.clone() }),
                ("id".into(), ConversationField { backend: backend.clone(), alias: alias.clone(), field: ConvField::Id }),
                ("slug".into(), ConversationField { backend: backend.clone(), alias: alias.clone(), field: ConvField::Slug }),
                ("created".into(), ConversationField { backend: backend.clone(), alias: alias.clone(), field: ConvField::Created }),
                ("model".into(), ConversationModelSymlink { backend: backend.clone(), alias: alias.clone() }),
                ("cwd".into(), ConversationCwdSymlink { backend: backend.clone(), alias: alias.clone() }),
                ("messages".into(), MessagesDir { backend: backend.clone(), alias: alias.clone() }),
            ];
            if meta.archived {
                entries.push(("archived".into(), ConversationField { backend: backend.clone(), alias: alias.clone(), field: ConvField::Archived }));
            }
            if meta.waiting_for_input {
                entries.push((
                    "waiting_for_input".into(),
                    ConversationField { backend: backend.clone(), alias: alias.clone(), field: ConvField::Waiting },
                ));
            }
            Ok(entries)
        }
        MessagesDir { backend, alias } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let (_, bundle) = conversations::fetch_bundle(shared, backend, &conv).await?;
            let width = format::sequence_width(bundle.max_sequence_id);
            let mut entries = vec![
                ("count".into(), MessagesCount { backend: backend.clone(), alias: alias.clone() }),
                ("all.md".into(), MessagesAllMd { backend: backend.clone(), alias: alias.clone() }),
                ("all.json".into(), MessagesAllJson { backend: backend.clone(), alias: alias.clone() }),
                ("last".into(), QueryLastDir { backend: backend.clone(), alias: alias.clone() }),
                ("since".into(), QuerySinceDir { backend: backend.clone(), alias: alias.clone() }),
            ];
            for m in &bundle.messages {
                let slug = format::message_slug(m, &bundle.tool_map);
                let name = format::filename_base(m, &slug, width);
                entries.push((name, MessageDir { backend: backend.clone(), alias: alias.clone(), seq: m.sequence_id }));
            }
            Ok(entries)
        }
        MessageDir { backend, alias, seq } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let (_, bundle) = conversations::fetch_bundle(shared, backend, &conv).await?;
            conversations::find_message(&bundle, *seq).ok_or_else(|| FsError::not_found(format!("message {seq}")))?;
            Ok(vec![
                ("message_id".into(), MessageField { backend: backend.clone(), alias: alias.clone(), seq: *seq, field: "message_id" }),
                (
                    "conversation_id".into(),
                    MessageField { backend: backend.clone(), alias: alias.clone(), seq: *seq, field: "conversation_id" },
                ),
                (
                    "sequence_id".into(),
                    MessageField { backend: backend.clone(), alias: alias.clone(), seq: *seq, field: "sequence_id" },
                ),
                ("type".into(), MessageField { backend: backend.clone(), alias: alias.clone(), seq: *seq, field: "type" }),
                (
                    "created_at".into(),
                    MessageField { backend: backend.clone(), alias: alias.clone(), seq: *seq, field: "created_at" },
                ),
                ("content.md".into(), MessageContentMd { backend: backend.clone(), alias: alias.clone(), seq: *seq }),
                (
                    "llm_data".into(),
                    MessageProjected { backend: backend.clone(), alias: alias.clone(), seq: *seq, root: ProjectedRoot::LlmData, path: vec![] },
                ),
                (
                    "usage_data".into(),
                    MessageProjected { backend: backend.clone(), alias: alias.clone(), seq: *seq, root: ProjectedRoot::UsageData, path: vec![] },
                ),
            ])
        }
        MessageProjected { backend, alias, seq, root, path } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let (_, bundle) = conversations::fetch_bundle(shared, backend, &conv).await?;
            let message = conversations::find_message(&bundle, *seq).ok_or_else(|| FsError::not_found(format!("message {seq}")))?;
            let tree = projected_root(message, *root);
            let node = navigate(&tree, path).ok_or_else(|| FsError::not_found("projected path"))?;
            match node {
                ProjectedNode::Dir(entries) => Ok(entries
                    .iter()
                    .map(|e| {
                        let mut child_path = path.clone();
                        child_path.push(e.name.clone());
                        (
                            e.name.clone(),
                            MessageProjected { backend: backend.clone(), alias: alias.clone(), seq: *seq, root: *root, path: child_path },
                        )
                    })
                    .collect()),
                ProjectedNode::File(_) => Err(FsError::invalid("not a directory")),
            }
        }
        QueryLastDir { backend, alias } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let (_, bundle) = conversations::fetch_bundle(shared, backend, &conv).await?;
            Ok((1..=bundle.messages.len().max(1))
                .map(|n| (n.to_string(), QueryLastNDir { backend: backend.clone(), alias: alias.clone(), n }))
                .collect())
        }
        QueryLastNDir { backend, alias, n } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let (_, bundle) = conversations::fetch_bundle(shared, backend, &conv).await?;
            let sliced = format::last_n(&bundle.messages, *n);
            let width = format::sequence_width(bundle.max_sequence_id);
            Ok(sliced
                .iter()
                .map(|m| {
                    let slug = format::message_slug(m, &bundle.tool_map);
                    let name = format::filename_base(m, &slug, width);
                    (name, QueryLastEntry { backend: backend.clone(), alias: alias.clone(), n: *n, index: m.sequence_id as usize })
                })
                .collect())
        }
        QuerySinceDir { backend, alias } => {
            resolve_conv(shared, backend, alias).await?;
            Ok(Vec::new())
        }
        QuerySinceSlugDir { backend, alias, slug } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let (_, bundle) = conversations::fetch_bundle(shared, backend, &conv).await?;
            let matches = bundle
                .messages
                .iter()
                .filter(|m| format::message_slug(m, &bundle.tool_map) == *slug)
                .count();
            Ok((1..=matches.max(1))
                .map(|n| (n.to_string(), QuerySinceSlugNDir { backend: backend.clone(), alias: alias.clone(), slug: slug.clone(), n }))
                .collect())
        }
        QuerySinceSlugNDir { backend, alias, slug, n } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let (_, bundle) = conversations::fetch_bundle(shared, backend, &conv).await?;
            let sliced = format::since_slug(&bundle.messages, slug, *n, &bundle.tool_map);
            let width = format::sequence_width(bundle.max_sequence_id);
            Ok(sliced
                .iter()
                .map(|m| {
                    let msg_slug = format::message_slug(m, &bundle.tool_map);
                    let name = format::filename_base(m, &msg_slug, width);
                    (
                        name,
                        QuerySinceEntry { backend: backend.clone(), alias: alias.clone(), slug: slug.clone(), n: *n, index: m.sequence_id as usize },
                    )
                })
                .collect())
        }
        other => Err(FsError::Unsupported("readdir").into_readdir_context(other)),
    }
}

impl FsError {
    /// `readdir` on a node kind with no directory contract falls back to the
    /// default "not supported" response rather than a shape violation.
    fn into_readdir_context(self, _node: &Node) -> FsError {
        self
    }
}

/// Read the full content of a read-only or write-only-but-readback file node
///.
pub async fn read(shared: &Arc<FsShared>, node: &Node) -> FsResult<Vec<u8>> {
    use Node::*;
    match node {
        Readme => Ok(root::README.as_bytes().to_vec()),
        BackendUrl { backend } => {
            let record = shared.state.get_backend(backend).ok_or_else(|| FsError::not_found(format!("backend {backend}")))?;
            Ok(format!("{}\n", record.url).into_bytes())
        }
        BackendConnected { .. } | ConversationCtl { .. } | ConversationSend { .. } => Ok(Vec::new()),
        ModelFieldNode { backend, name, field } => {
            let model = models::find_model(shared, backend, name).await?;
            let text = match field {
                ModelField::Id => model.id,
                ModelField::Ready => String::new(),
                ModelField::Source => model.source,
                ModelField::MaxContextTokens => model.max_context_tokens.to_string(),
            };
            Ok(format!("{text}\n").into_bytes())
        }
        ModelNewClone { backend, name } => {
            models::find_model(shared, backend, name).await?;
            let local_id = shared.state.clone_conversation(backend, &shared.now_rfc3339())?;
            shared.state.set_model(&local_id, name)?;
            Ok(format!("{local_id}\n").into_bytes())
        }
        ModelNewStart { backend, name } => Ok(models::start_snippet(backend, name).into_bytes()),
        ConversationNewClone { backend } => {
            let local_id = shared.state.clone_conversation(backend, &shared.now_rfc3339())?;
            Ok(format!("{local_id}\n").into_bytes())
        }
        ConversationField { backend, alias, field } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let text = match field {
                ConvField::Id => conv.local_id.clone(),
                ConvField::Slug => conv.slug.clone().unwrap_or_default(),
                ConvField::Created => if conv.created { "1" } else { "0" }.to_string(),
                ConvField::Archived | ConvField::Waiting => String::new(),
            };
            Ok(format!("{text}\n").into_bytes())
        }
        MessagesCount { backend, alias } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let count = match conversations::fetch_bundle(shared, backend, &conv).await {
                Ok((_, bundle)) => bundle.messages.len(),
                Err(_) => 0,
            };
            Ok(format!("{count}\n").into_bytes())
        }
        MessagesAllMd { backend, alias } => Ok(render_all_md(shared, backend, alias).await?.into_bytes()),
        MessagesAllJson { backend, alias } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let (fetch, _) = conversations::fetch_bundle(shared, backend, &conv).await?;
            Ok(fetch.messages_raw.clone())
        }
        MessageField { backend, alias, seq, field } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let (_, bundle) = conversations::fetch_bundle(shared, backend, &conv).await?;
            let message = conversations::find_message(&bundle, *seq).ok_or_else(|| FsError::not_found(format!("message {seq}")))?;
            Ok(format!("{}\n", message_field_value(message, field)).into_bytes())
        }
        MessageContentMd { backend, alias, seq } => Ok(render_message_md(shared, backend, alias, *seq).await?.into_bytes()),
        MessageProjected { backend, alias, seq, root, path } => {
            let conv = resolve_conv(shared, backend, alias).await?;
            let (_, bundle) = conversations::fetch_bundle(shared, backend, &conv).await?;
            let message = conversations::find_message(&bundle, *seq).ok_or_else(|| FsError::not_found(format!("message {seq}")))?;
            let tree = projected_root(message, *root);
            match navigate(&tree, path) {
                Some(ProjectedNode::File(bytes)) => Ok(bytes.clone()),
                _ => Err(FsError::invalid("not a file")),
            }
        }
        _ => Err(FsError::Unsupported("read")),
    }
}

/// Resolve the symlink target for `node`.
pub async fn symlink_target(shared: &Arc<FsShared>, node: &Node) -> FsResult<String> {
    resolve(shared, node).await.and_then(|r| match r.kind {
        Kind::Symlink { target } => Ok(target),
        _ => Err(FsError::invalid("not a symlink")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackendClient;
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

    async fn seed_conversation_with_bash_messages(shared: &Arc<FsShared>, fake: &FakeBackendClient, count: usize) -> String {
        let local_id = shared.state.clone_conversation("default", "2026-01-01T00:00:00Z").unwrap();
        conversations::commit_send(shared, "default", &local_id, b"go").await.unwrap();
        let backend_id = shared.state.get(&local_id).unwrap().backend_id.unwrap();

        let mut messages = Vec::new();
        for i in 0..count {
            let seq = i as u64 * 2;
            messages.push(format!(
                r#"{{"message_id":"tu{seq}","conversation_id":"{backend_id}","sequence_id":{seq},"type":"assistant","created_at":"t","content":[{{"type":5,"id":"id{seq}","tool_name":"bash","tool_use_id":null}}]}}"#
            ));
            messages.push(format!(
                r#"{{"message_id":"tr{}","conversation_id":"{backend_id}","sequence_id":{},"type":"user","created_at":"t","content":[{{"type":6,"tool_use_id":"id{seq}","tool_result":[{{"text":"ok"}}]}}]}}"#,
                seq + 1,
                seq + 1
            ));
        }
        fake.set_messages(&backend_id, format!(r#"{{"messages":[{}]}}"#, messages.join(",")).into_bytes());
        local_id
    }

    #[tokio::test]
    async fn since_slug_dir_counts_only_matching_slug() {
        let (_dir, shared, fake) = harness();
        let local_id = seed_conversation_with_bash_messages(&shared, &fake, 3).await;

        let entries = list_dir(&shared, &Node::QuerySinceSlugDir { backend: "default".into(), alias: local_id.clone(), slug: "bash-tool".into() })
            .await
            .unwrap();
        assert_eq!(entries.len(), 3);
        for (_name, node) in &entries {
            match node {
                Node::QuerySinceSlugNDir { slug, .. } => assert_eq!(slug, "bash-tool"),
                _ => panic!("unexpected node"),
            }
        }

        let none = list_dir(&shared, &Node::QuerySinceSlugDir { backend: "default".into(), alias: local_id, slug: "no-such-slug".into() })
            .await
            .unwrap();
        // Zero matches still yields a single placeholder entry ("1"), per the
        // `max(1)` floor shared with `QueryLastDir`.
        assert_eq!(none.len(), 1);
    }

    #[tokio::test]
    async fn since_slug_n_dir_resolves_entries_strictly_after_the_nth_match() {
        let (_dir, shared, fake) = harness();
        let local_id = seed_conversation_with_bash_messages(&shared, &fake, 2).await;

        let entries = list_dir(
            &shared,
            &Node::QuerySinceSlugNDir { backend: "default".into(), alias: local_id, slug: "bash-tool".into(), n: 1 },
        )
        .await
        .unwrap();
        // After the 1st bash-tool match (seq 0), everything from seq 1 onward
        // is included: the paired result (seq 1) and the 2nd round (seq 2, 3).
        assert_eq!(entries.len(), 3);
    }

    #[tokio::test]
    async fn is_writable_matches_spec_surface() {
        assert!(is_writable(&Node::ConversationCtl { backend: "default".into(), alias: "x".into() }));
        assert!(is_writable(&Node::ConversationSend { backend: "default".into(), alias: "x".into() }));
        assert!(is_writable(&Node::BackendUrl { backend: "default".into() }));
        assert!(!is_writable(&Node::Readme));
        assert!(!is_writable(&Node::ConversationField {
            backend: "default".into(),
            alias: "x".into(),
            field: ConvField::Id
        }));
    }

    #[tokio::test]
    async fn resolve_root_is_a_semi_stable_dir() {
        let (_dir, shared, _fake) = harness();
        let r = resolve(&shared, &Node::Root).await.unwrap();
        assert!(matches!(r.kind, Kind::Dir));
        assert_eq!(r.cache, CacheClass::SemiStable);
    }
}

