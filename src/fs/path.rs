//! Closed tagged union of node kinds, plus the pure function that classifies
//! a canonical slash-joined path into one.
//!
//! The node graph has no back-pointers: a node's identity is entirely
//! derived from its path string, so `classify` can run with no shared state
//! and the same path always yields the same [`Node`] (mirrored by the
//! deterministic inode hashing in [`super::inode`]). Conversation-scoped
//! variants carry the raw alias string (local id, backend id, or slug) as
//! written in the path; resolving it to a canonical local id happens in
//! `fs::ops`, which is the layer that actually has access to the state
//! store.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelField {
    Id,
    Ready,
    Source,
    MaxContextTokens,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvField {
    Id,
    Slug,
    Created,
    Archived,
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectedRoot {
    LlmData,
    UsageData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatTarget {
    Model,
    Conversation,
    Send,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Root,
    Readme,
    CompatSymlink(CompatTarget),

    BackendDir,
    BackendDefaultSymlink,
    Backend { backend: String },
    BackendUrl { backend: String },
    BackendConnected { backend: String },
    BackendNewSymlink { backend: String },

    ModelDir { backend: String },
    ModelDefaultSymlink { backend: String },
    Model { backend: String, name: String },
    ModelFieldNode { backend: String, name: String, field: ModelField },
    ModelNewDir { backend: String, name: String },
    ModelNewClone { backend: String, name: String },
    ModelNewStart { backend: String, name: String },

    ConversationDir { backend: String },
    ConversationNewDir { backend: String },
    ConversationNewClone { backend: String },
    Conversation { backend: String, alias: String },
    ConversationCtl { backend: String, alias: String },
    ConversationSend { backend: String, alias: String },
    ConversationField { backend: String, alias: String, field: ConvField },
    ConversationModelSymlink { backend: String, alias: String },
    ConversationCwdSymlink { backend: String, alias: String },

    MessagesDir { backend: String, alias: String },
    MessagesCount { backend: String, alias: String },
    MessagesAllMd { backend: String, alias: String },
    MessagesAllJson { backend: String, alias: String },
    MessageDir { backend: String, alias: String, seq: u64 },
    MessageField { backend: String, alias: String, seq: u64, field: &'static str },
    MessageContentMd { backend: String, alias: String, seq: u64 },
    MessageProjected { backend: String, alias: String, seq: u64, root: ProjectedRoot, path: Vec<String> },

    QueryLastDir { backend: String, alias: String },
    QueryLastNDir { backend: String, alias: String, n: usize },
    QueryLastEntry { backend: String, alias: String, n: usize, index: usize },
    QuerySinceDir { backend: String, alias: String },
    QuerySinceSlugDir { backend: String, alias: String, slug: String },
    QuerySinceSlugNDir { backend: String, alias: String, slug: String, n: usize },
    QuerySinceEntry { backend: String, alias: String, slug: String, n: usize, index: usize },
}

/// Split a canonical path ("" for root) into non-empty segments.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// `"{seq}-{slug}"` -> `(seq, slug)`. Message dirnames and query-result
/// entry names share this shape.
fn parse_numbered_name(name: &str) -> Option<(u64, &str)> {
    let (num, rest) = name.split_once('-')?;
    let n: u64 = num.parse().ok()?;
    Some((n, rest))
}

fn intern_message_field(s: &str) -> &'static str {
    match s {
        "message_id" => "message_id",
        "conversation_id" => "conversation_id",
        "sequence_id" => "sequence_id",
        "type" => "type",
        "created_at" => "created_at",
        _ => unreachable!("caller already matched one of these literals"),
    }
}

pub fn classify(path: &str) -> Option<Node> {
    let segments = split_path(path);
    classify_segments(&segments)
}

fn classify_segments(segments: &[&str]) -> Option<Node> {
    use Node::*;

    match segments {
        [] => Some(Root),
        ["README.md"] => Some(Readme),
        ["model"] => Some(CompatSymlink(CompatTarget::Model)),
        ["conversation"] => Some(CompatSymlink(CompatTarget::Conversation)),
        ["send"] => Some(CompatSymlink(CompatTarget::Send)),

        ["backend"] => Some(BackendDir),
        ["backend", "default"] => Some(BackendDefaultSymlink),
        ["backend", b] => Some(Backend { backend: (*b).into() }),
        ["backend", b, "url"] => Some(BackendUrl { backend: (*b).into() }),
        ["backend", b, "connected"] => Some(BackendConnected { backend: (*b).into() }),
        ["backend", b, "new"] => Some(BackendNewSymlink { backend: (*b).into() }),

        ["backend", b, "model"] => Some(ModelDir { backend: (*b).into() }),
        ["backend", b, "model", "default"] => Some(ModelDefaultSymlink { backend: (*b).into() }),
        ["backend", b, "model", name, "id"] => Some(ModelFieldNode {
            backend: (*b).into(),
            name: (*name).into(),
            field: ModelField::Id,
        }),
        ["backend", b, "model", name, "ready"] => Some(ModelFieldNode {
            backend: (*b).into(),
            name: (*name).into(),
            field: ModelField::Ready,
        }),
        ["backend", b, "model", name, "source"] => Some(ModelFieldNode {
            backend: (*b).into(),
            name: (*name).into(),
            field: ModelField::Source,
        }),
        ["backend", b, "model", name, "max_context_tokens"] => Some(ModelFieldNode {
            backend: (*b).into(),
            name: (*name).into(),
            field: ModelField::MaxContextTokens,
        }),
        ["backend", b, "model", name, "new"] => Some(ModelNewDir {
            backend: (*b).into(),
            name: (*name).into(),
        }),
        ["backend", b, "model", name, "new", "clone"] => Some(ModelNewClone {
            backend: (*b).into(),
            name: (*name).into(),
        }),
        ["backend", b, "model", name, "new", "start"] => Some(ModelNewStart {
            backend: (*b).into(),
            name: (*name).into(),
        }),
        ["backend", b, "model", name] => Some(Model {
            backend: (*b).into(),
            name: (*name).into(),
        }),

        ["backend", b, "conversation"] => Some(ConversationDir { backend: (*b).into() }),
        ["backend", b, "conversation", "new", "clone"] => Some(ConversationNewClone { backend: (*b).into() }),
        ["backend", b, "conversation", "new"] => Some(ConversationNewDir { backend: (*b).into() }),

        ["backend", b, "conversation", alias, "ctl"] => Some(ConversationCtl {
            backend: (*b).into(),
            alias: (*alias).into(),
        }),
        ["backend", b, "conversation", alias, "send"] => Some(ConversationSend {
            backend: (*b).into(),
            alias: (*alias).into(),
        }),
        ["backend", b, "conversation", alias, "id"] => Some(ConversationField {
            backend: (*b).into(),
            alias: (*alias).into(),
            field: ConvField::Id,
        }),
        ["backend", b, "conversation", alias, "slug"] => Some(ConversationField {
            backend: (*b).into(),
            alias: (*alias).into(),
            field: ConvField::Slug,
        }),
        ["backend", b, "conversation", alias, "created"] => Some(ConversationField {
            backend: (*b).into(),
            alias: (*alias).into(),
            field: ConvField::Created,
        }),
        ["backend", b, "conversation", alias, "archived"] => Some(ConversationField {
            backend: (*b).into(),
            alias: (*alias).into(),
            field: ConvField::Archived,
        }),
        ["backend", b, "conversation", alias, "waiting_for_input"] => Some(ConversationField {
            backend: (*b).into(),
            alias: (*alias).into(),
            field: ConvField::Waiting,
        }),
        ["backend", b, "conversation", alias, "model"] => Some(ConversationModelSymlink {
            backend: (*b).into(),
            alias: (*alias).into(),
        }),
        ["backend", b, "conversation", alias, "cwd"] => Some(ConversationCwdSymlink {
            backend: (*b).into(),
            alias: (*alias).into(),
        }),

        ["backend", b, "conversation", alias, "messages", "count"] => Some(MessagesCount {
            backend: (*b).into(),
            alias: (*alias).into(),
        }),
        ["backend", b, "conversation", alias, "messages", "all.md"] => Some(MessagesAllMd {
            backend: (*b).into(),
            alias: (*alias).into(),
        }),
        ["backend", b, "conversation", alias, "messages", "all.json"] => Some(MessagesAllJson {
            backend: (*b).into(),
            alias: (*alias).into(),
        }),
        ["backend", b, "conversation", alias, "messages", "last"] => Some(QueryLastDir {
            backend: (*b).into(),
            alias: (*alias).into(),
        }),
        ["backend", b, "conversation", alias, "messages", "last", n] => {
            let n: usize = n.parse().ok()?;
            Some(QueryLastNDir {
                backend: (*b).into(),
                alias: (*alias).into(),
                n,
            })
        }
        ["backend", b, "conversation", alias, "messages", "last", n, entry] => {
            let n: usize = n.parse().ok()?;
            let (index, _slug) = parse_numbered_name(entry)?;
            Some(QueryLastEntry {
                backend: (*b).into(),
                alias: (*alias).into(),
                n,
                index: index as usize,
            })
        }
        ["backend", b, "conversation", alias, "messages", "since"] => Some(QuerySinceDir {
            backend: (*b).into(),
            alias: (*alias).into(),
        }),
        ["backend", b, "conversation", alias, "messages", "since", slug] => Some(QuerySinceSlugDir {
            backend: (*b).into(),
            alias: (*alias).into(),
            slug: (*slug).into(),
        }),
        ["backend", b, "conversation", alias, "messages", "since", slug, n] => {
            let n: usize = n.parse().ok()?;
            Some(QuerySinceSlugNDir {
                backend: (*b).into(),
                alias: (*alias).into(),
                slug: (*slug).into(),
                n,
            })
        }
        ["backend", b, "conversation", alias, "messages", "since", slug, n, entry] => {
            let n: usize = n.parse().ok()?;
            let (index, _slug2) = parse_numbered_name(entry)?;
            Some(QuerySinceEntry {
                backend: (*b).into(),
                alias: (*alias).into(),
                slug: (*slug).into(),
                n,
                index: index as usize,
            })
        }
        ["backend", b, "conversation", alias, "messages", msgdir, "content.md"] => {
            let (seq, _slug) = parse_numbered_name(msgdir)?;
            Some(MessageContentMd {
                backend: (*b).into(),
                alias: (*alias).into(),
                seq,
            })
        }
        ["backend", b, "conversation", alias, "messages", msgdir, field @ ("message_id" | "conversation_id" | "sequence_id" | "type" | "created_at")] => {
            let (seq, _slug) = parse_numbered_name(msgdir)?;
            Some(MessageField {
                backend: (*b).into(),
                alias: (*alias).into(),
                seq,
                field: intern_message_field(field),
            })
        }
        ["backend", b, "conversation", alias, "messages", msgdir, root @ ("llm_data" | "usage_data"), rest @ ..] => {
            let (seq, _slug) = parse_numbered_name(msgdir)?;
            let root = if *root == "llm_data" {
                ProjectedRoot::LlmData
            } else {
                ProjectedRoot::UsageData
            };
            Some(MessageProjected {
                backend: (*b).into(),
                alias: (*alias).into(),
                seq,
                root,
                path: rest.iter().map(|s| s.to_string()).collect(),
            })
        }
        ["backend", b, "conversation", alias, "messages", msgdir] => {
            let (seq, _slug) = parse_numbered_name(msgdir)?;
            Some(MessageDir {
                backend: (*b).into(),
                alias: (*alias).into(),
                seq,
            })
        }
        ["backend", b, "conversation", alias, "messages"] => Some(MessagesDir {
            backend: (*b).into(),
            alias: (*alias).into(),
        }),

        ["backend", b, "conversation", alias] => Some(Conversation {
            backend: (*b).into(),
            alias: (*alias).into(),
        }),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_and_readme() {
        assert_eq!(classify(""), Some(Node::Root));
        assert_eq!(classify("README.md"), Some(Node::Readme));
    }

    #[test]
    fn backend_compat_symlinks() {
        assert_eq!(classify("model"), Some(Node::CompatSymlink(CompatTarget::Model)));
        assert_eq!(classify("send"), Some(Node::CompatSymlink(CompatTarget::Send)));
    }

    #[test]
    fn backend_default_is_distinct_from_named_backend() {
        assert_eq!(classify("backend/default"), Some(Node::BackendDefaultSymlink));
        assert_eq!(
            classify("backend/alt"),
            Some(Node::Backend { backend: "alt".into() })
        );
    }

    #[test]
    fn conversation_alias_and_fields() {
        assert_eq!(
            classify("backend/default/conversation/abcd1234"),
            Some(Node::Conversation {
                backend: "default".into(),
                alias: "abcd1234".into()
            })
        );
        assert_eq!(
            classify("backend/default/conversation/abcd1234/ctl"),
            Some(Node::ConversationCtl {
                backend: "default".into(),
                alias: "abcd1234".into()
            })
        );
    }

    #[test]
    fn message_dir_parses_sequence_and_ignores_slug_mismatch() {
        assert_eq!(
            classify("backend/default/conversation/abcd1234/messages/007-bash-tool"),
            Some(Node::MessageDir {
                backend: "default".into(),
                alias: "abcd1234".into(),
                seq: 7
            })
        );
    }

    #[test]
    fn message_projected_nested_path() {
        assert_eq!(
            classify("backend/default/conversation/abcd1234/messages/007-user/usage_data/tokens"),
            Some(Node::MessageProjected {
                backend: "default".into(),
                alias: "abcd1234".into(),
                seq: 7,
                root: ProjectedRoot::UsageData,
                path: vec!["tokens".into()]
            })
        );
    }

    #[test]
    fn query_last_n_and_entry() {
        assert_eq!(
            classify("backend/default/conversation/abcd1234/messages/last/3"),
            Some(Node::QueryLastNDir {
                backend: "default".into(),
                alias: "abcd1234".into(),
                n: 3
            })
        );
        assert_eq!(
            classify("backend/default/conversation/abcd1234/messages/last/3/00-user"),
            Some(Node::QueryLastEntry {
                backend: "default".into(),
                alias: "abcd1234".into(),
                n: 3,
                index: 0
            })
        );
    }

    #[test]
    fn query_since_slug_n() {
        assert_eq!(
            classify("backend/default/conversation/abcd1234/messages/since/user/1"),
            Some(Node::QuerySinceSlugNDir {
                backend: "default".into(),
                alias: "abcd1234".into(),
                slug: "user".into(),
                n: 1
            })
        );
    }

    #[test]
    fn model_new_subtree() {
        assert_eq!(
            classify("backend/default/model/fast/new/clone"),
            Some(Node::ModelNewClone {
                backend: "default".into(),
                name: "fast".into()
            })
        );
        assert_eq!(
            classify("backend/default/model/fast/new/start"),
            Some(Node::ModelNewStart {
                backend: "default".into(),
                name: "fast".into()
            })
        );
    }

    #[test]
    fn unrecognized_path_classifies_to_none() {
        assert_eq!(classify("backend/default/conversation/garbage/extra/extra2/extra3"), None);
    }

    #[test]
    fn join_path_handles_root() {
        assert_eq!(join_path("", "backend"), "backend");
        assert_eq!(join_path("backend", "default"), "backend/default");
    }
}
