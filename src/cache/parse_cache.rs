//! Content-addressed cache of parsed message lists and tool-name maps. Keyed
//! by a 64-bit hash of the raw message-list bytes rather than by
//! conversation id or time, so a parse can never be served against bytes the
//! HTTP cache has already moved past.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use crate::backend::types::{ContentItem, Message, MessageListEnvelope};
use crate::error::FsError;

/// The parse result plus its derived tool-name map, shared via `Arc` so
/// callers observe snapshot consistency: the cache never mutates an entry
/// in place.
pub struct ParsedBundle {
    pub messages: Vec<Message>,
    pub tool_map: HashMap<String, String>,
    pub max_sequence_id: u64,
}

pub struct ParseCache {
    entries: Mutex<HashMap<u64, Arc<ParsedBundle>>>,
    by_conversation: Mutex<HashMap<String, u64>>,
}

impl Default for ParseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ParseCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            by_conversation: Mutex::new(HashMap::new()),
        }
    }

    fn hash_bytes(raw: &[u8]) -> u64 {
        let mut hasher = DefaultHasher::new();
        raw.hash(&mut hasher);
        hasher.finish()
    }

    /// Get the parsed bundle for `raw`, parsing on miss. The lock is taken
    /// only for the lookup and the insert; parsing happens with no lock held,
    /// so two concurrent misses on identical bytes may both parse — the
    /// later insert simply overwrites the earlier one.
    pub fn get_or_parse(
        &self,
        conversation_id: &str,
        raw: &[u8],
    ) -> Result<Arc<ParsedBundle>, FsError> {
        let hash = Self::hash_bytes(raw);

        if let Some(hit) = self.entries.lock().unwrap_or_else(|e| e.into_inner()).get(&hash) {
            return Ok(hit.clone());
        }

        let bundle = Arc::new(parse_messages(raw)?);

        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(hash, bundle.clone());
        self.by_conversation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(conversation_id.to_string(), hash);

        Ok(bundle)
    }

    pub fn invalidate_conversation(&self, conversation_id: &str) {
        let hash = self
            .by_conversation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(conversation_id);
        if let Some(hash) = hash {
            self.entries
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&hash);
        }
    }

    #[cfg(test)]
    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Parse raw message-list bytes into `(messages, tool_map, max_sequence_id)`.
/// The tool map is built in a single linear scan here and cached alongside
/// the parse, so callers never rebuild it per call.
fn parse_messages(raw: &[u8]) -> Result<ParsedBundle, FsError> {
    let envelope: MessageListEnvelope = serde_json::from_slice(raw).map_err(|e| FsError::Backend {
        status: None,
        body: format!("bad message list: {e}"),
    })?;

    let mut tool_map = HashMap::new();
    let mut max_sequence_id = 0u64;
    for message in &envelope.messages {
        max_sequence_id = max_sequence_id.max(message.sequence_id);
        for item in &message.content {
            if item.is_tool_use() {
                if let (Some(id), Some(name)) = (&item.id, &item.tool_name) {
                    tool_map.insert(id.clone(), name.clone());
                }
            }
        }
    }

    Ok(ParsedBundle {
        messages: envelope.messages,
        tool_map,
        max_sequence_id,
    })
}

/// Resolve a tool-result content item's tool name via the tool map, looking
/// up the tool-use whose `id` matches the result's `tool_use_id`.
pub fn resolve_tool_name<'a>(item: &ContentItem, tool_map: &'a HashMap<String, String>) -> Option<&'a str> {
    item.tool_use_id
        .as_ref()
        .and_then(|id| tool_map.get(id))
        .map(|s| s.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raw() -> Vec<u8> {
        br#"{"messages":[
            {"message_id":"m0","conversation_id":"c1","sequence_id":0,"type":"user","created_at":"t0",
             "content":[{"type":0,"text":"hi"}]},
            {"message_id":"m1","conversation_id":"c1","sequence_id":1,"type":"shelley","created_at":"t1",
             "content":[{"type":5,"id":"tu1","tool_name":"bash","tool_input":{"cmd":"ls"}}]},
            {"message_id":"m2","conversation_id":"c1","sequence_id":2,"type":"user","created_at":"t2",
             "content":[{"type":6,"tool_use_id":"tu1","tool_result":[{"text":"file.txt"}]}]}
        ]}"#
        .to_vec()
    }

    #[test]
    fn parses_and_builds_tool_map() {
        let cache = ParseCache::new();
        let bundle = cache.get_or_parse("c1", &sample_raw()).unwrap();
        assert_eq!(bundle.messages.len(), 3);
        assert_eq!(bundle.max_sequence_id, 2);
        assert_eq!(bundle.tool_map.get("tu1").map(String::as_str), Some("bash"));
    }

    #[test]
    fn identical_bytes_hit_same_entry() {
        let cache = ParseCache::new();
        let raw = sample_raw();
        let a = cache.get_or_parse("c1", &raw).unwrap();
        let b = cache.get_or_parse("c1", &raw).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn invalidate_drops_entry() {
        let cache = ParseCache::new();
        let raw = sample_raw();
        cache.get_or_parse("c1", &raw).unwrap();
        assert_eq!(cache.entry_count(), 1);
        cache.invalidate_conversation("c1");
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn resolve_tool_name_via_cross_reference() {
        let cache = ParseCache::new();
        let bundle = cache.get_or_parse("c1", &sample_raw()).unwrap();
        let result_item = &bundle.messages[2].content[0];
        assert_eq!(resolve_tool_name(result_item, &bundle.tool_map), Some("bash"));
    }

    #[test]
    fn invalid_bytes_fail_to_parse() {
        let cache = ParseCache::new();
        let err = cache.get_or_parse("c1", b"not json").unwrap_err();
        assert_eq!(err.errno(), libc::EIO);
    }
}
