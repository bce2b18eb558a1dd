//! Caching layer: a TTL+single-flight request cache in
//! front of the backend, and a content-addressed parse cache behind it.

pub mod parse_cache;
pub mod request_cache;

pub use parse_cache::{ParseCache, ParsedBundle};
pub use request_cache::RequestCache;

use crate::backend::types::{ConversationFetch, ConversationMeta, Model};

/// The value union cached by the single top-level `RequestCache` instance.
/// One enum rather than five separate caches because every variant shares
/// TTL/invalidation semantics and a conversation fetch can be
/// invalidated alongside its model list by a single write path.
#[derive(Debug, Clone)]
pub enum CachedValue {
    Conversations(Vec<ConversationMeta>),
    ArchivedConversations(Vec<ConversationMeta>),
    Conversation(ConversationFetch),
    Models(Vec<Model>),
    DefaultModel(String),
}

impl CachedValue {
    pub fn as_conversations(&self) -> Option<&[ConversationMeta]> {
        match self {
            CachedValue::Conversations(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_archived_conversations(&self) -> Option<&[ConversationMeta]> {
        match self {
            CachedValue::ArchivedConversations(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_conversation(&self) -> Option<&ConversationFetch> {
        match self {
            CachedValue::Conversation(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_models(&self) -> Option<&[Model]> {
        match self {
            CachedValue::Models(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_default_model(&self) -> Option<&str> {
        match self {
            CachedValue::DefaultModel(v) => Some(v),
            _ => None,
        }
    }
}

/// Well-known keys for the single `RequestCache<CachedValue>`: one namespace,
/// each key prefixed by the operation it caches.
pub const KEY_CONVERSATIONS: &str = "conversations";
pub const KEY_ARCHIVED_CONVERSATIONS: &str = "archived-conversations";
pub const KEY_MODELS: &str = "models";
pub const KEY_DEFAULT_MODEL: &str = "default-model";

pub fn key_conversation(id: &str) -> String {
    format!("conversation/{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_value_downcasts_match_variant() {
        let v = CachedValue::Models(vec![]);
        assert!(v.as_models().is_some());
        assert!(v.as_conversations().is_none());
    }

    #[test]
    fn conversation_key_is_namespaced() {
        assert_eq!(key_conversation("abc"), "conversation/abc");
    }
}
