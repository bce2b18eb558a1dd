//! Message slug derivation, Markdown rendering, and the `last/N` /
//! `since/{slug}/N` query language.
//!
//! Every function here operates on an already-parsed message list plus the
//! shared tool-name map built once by [`crate::cache::ParseCache`] — slugs
//! are never recomputed by rebuilding the tool map per call.

use std::collections::HashMap;

use crate::backend::types::{ContentItem, Message};

/// Derive a message's slug:
/// - a tool-use content item yields `{tool_name}-tool`
/// - a tool-result content item resolves its tool name via `tool_map` and
///   yields `{tool_name}-result`, or the literal `tool-result` if the
///   cross-reference can't be resolved
/// - otherwise the lowercased message type
pub fn message_slug(message: &Message, tool_map: &HashMap<String, String>) -> String {
    if let Some(item) = message.content.iter().find(|c| c.is_tool_use()) {
        if let Some(name) = &item.tool_name {
            return format!("{name}-tool");
        }
    }
    if let Some(item) = message.content.iter().find(|c| c.is_tool_result()) {
        return match resolve_tool_name(item, tool_map) {
            Some(name) => format!("{name}-result"),
            None => "tool-result".to_string(),
        };
    }
    message.kind.to_lowercase()
}

fn resolve_tool_name<'a>(item: &ContentItem, tool_map: &'a HashMap<String, String>) -> Option<&'a str> {
    item.tool_use_id.as_ref().and_then(|id| tool_map.get(id)).map(String::as_str)
}

/// Width needed to zero-pad `max_sequence_id` so lexicographic sort matches
/// numeric sort.
pub fn sequence_width(max_sequence_id: u64) -> usize {
    max_sequence_id.to_string().len()
}

/// `{zero-padded sequence_id}-{slug}`.
pub fn filename_base(message: &Message, slug: &str, width: usize) -> String {
    format!("{:0width$}-{slug}", message.sequence_id, width = width)
}

/// Cross-reference index from a tool-use's `id` to the content item itself,
/// built once per conversation so every message's rendering (and the
/// per-message `content.md` projection) can resolve `### command: ...`
/// annotations against tool-uses anywhere in the list, not just its own.
pub fn build_tool_use_index(messages: &[Message]) -> HashMap<&str, &ContentItem> {
    let mut idx = HashMap::new();
    for m in messages {
        for item in &m.content {
            if item.is_tool_use() {
                if let Some(id) = &item.id {
                    idx.insert(id.as_str(), item);
                }
            }
        }
    }
    idx
}

/// Render a single message as a `## {slug}` section. Tool-result
/// bodies resolve their `### command: ...` annotation against
/// `tool_use_by_id`, which must be built from the full conversation so
/// cross-message references resolve.
pub fn render_message(message: &Message, tool_map: &HashMap<String, String>, tool_use_by_id: &HashMap<&str, &ContentItem>) -> String {
    let slug = message_slug(message, tool_map);
    let mut out = format!("## {slug}\n\n");
    for item in &message.content {
        if item.is_tool_use() {
            let pretty = item
                .tool_input
                .as_ref()
                .map(|v| serde_json::to_string_pretty(v).unwrap_or_default())
                .unwrap_or_default();
            out.push_str(&pretty);
            out.push('\n');
        } else if item.is_tool_result() {
            if let Some(command) = item
                .tool_use_id
                .as_deref()
                .and_then(|id| tool_use_by_id.get(id))
                .and_then(|tu| tu.tool_input.as_ref())
                .and_then(|v| v.get("command"))
                .and_then(|v| v.as_str())
            {
                out.push_str(&format!("### command: {command}\n"));
            }
            if let Some(results) = &item.tool_result {
                for r in results {
                    if let Some(text) = &r.text {
                        out.push_str(text);
                        out.push('\n');
                    }
                }
            }
        } else if item.is_text() {
            if let Some(text) = &item.text {
                out.push_str(text);
                out.push('\n');
            }
        }
    }
    out
}

/// Render a full conversation's messages as one Markdown document
/// (backs `all.md`).
pub fn render_conversation_markdown(messages: &[Message], tool_map: &HashMap<String, String>) -> String {
    let tool_use_by_id = build_tool_use_index(messages);
    let mut out = String::new();
    for m in messages {
        out.push_str(&render_message(m, tool_map, &tool_use_by_id));
        out.push('\n');
    }
    out
}

/// `last/N`: the last `n` messages in order.
pub fn last_n(messages: &[Message], n: usize) -> &[Message] {
    let start = messages.len().saturating_sub(n);
    &messages[start..]
}

/// `since/{slug}/N`: find the Nth-to-last message whose derived slug equals
/// `slug` (1-indexed from the end), and return all strictly later messages.
/// Tool-calls/results are matched by derived slug, not raw type, so
/// `since/user/1` skips tool-result messages even though their raw type is
/// `"user"`.
pub fn since_slug<'a>(
    messages: &'a [Message],
    slug: &str,
    n: usize,
    tool_map: &HashMap<String, String>,
) -> &'a [Message] {
    if n == 0 {
        return &[];
    }
    let mut remaining = n;
    for (idx, message) in messages.iter().enumerate().rev() {
        if message_slug(message, tool_map) == slug {
            remaining -= 1;
            if remaining == 0 {
                return &messages[idx + 1..];
            }
        }
    }
    &[]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::{ToolResultText};

    fn text_message(seq: u64, kind: &str, text: &str) -> Message {
        Message {
            message_id: format!("m{seq}"),
            conversation_id: "c1".into(),
            sequence_id: seq,
            kind: kind.into(),
            created_at: "t".into(),
            content: vec![ContentItem {
                kind: ContentItem::TYPE_TEXT_A,
                text: Some(text.to_string()),
                id: None,
                tool_name: None,
                tool_input: None,
                tool_use_id: None,
                tool_result: None,
            }],
            user_data: None,
            llm_data: None,
            usage_data: None,
        }
    }

    fn tool_use_message(seq: u64, id: &str, tool_name: &str) -> Message {
        Message {
            message_id: format!("m{seq}"),
            conversation_id: "c1".into(),
            sequence_id: seq,
            kind: "shelley".into(),
            created_at: "t".into(),
            content: vec![ContentItem {
                kind: ContentItem::TYPE_TOOL_USE,
                text: None,
                id: Some(id.to_string()),
                tool_name: Some(tool_name.to_string()),
                tool_input: Some(serde_json::json!({"command": "ls"})),
                tool_use_id: None,
                tool_result: None,
            }],
            user_data: None,
            llm_data: None,
            usage_data: None,
        }
    }

    fn tool_result_message(seq: u64, tool_use_id: &str) -> Message {
        Message {
            message_id: format!("m{seq}"),
            conversation_id: "c1".into(),
            sequence_id: seq,
            kind: "user".into(),
            created_at: "t".into(),
            content: vec![ContentItem {
                kind: ContentItem::TYPE_TOOL_RESULT,
                text: None,
                id: None,
                tool_name: None,
                tool_input: None,
                tool_use_id: Some(tool_use_id.to_string()),
                tool_result: Some(vec![ToolResultText {
                    text: Some("file.txt".into()),
                }]),
            }],
            user_data: None,
            llm_data: None,
            usage_data: None,
        }
    }

    #[test]
    fn slug_for_plain_message_is_lowercased_type() {
        let m = text_message(0, "User", "hi");
        assert_eq!(message_slug(&m, &HashMap::new()), "user");
    }

    #[test]
    fn slug_for_tool_use_appends_tool() {
        let m = tool_use_message(1, "tu1", "bash");
        assert_eq!(message_slug(&m, &HashMap::new()), "bash-tool");
    }

    #[test]
    fn slug_for_tool_result_appends_result_via_cross_reference() {
        let mut map = HashMap::new();
        map.insert("tu1".to_string(), "bash".to_string());
        let m = tool_result_message(2, "tu1");
        assert_eq!(message_slug(&m, &map), "bash-result");
    }

    #[test]
    fn slug_for_unresolved_tool_result_is_literal() {
        let m = tool_result_message(2, "missing");
        assert_eq!(message_slug(&m, &HashMap::new()), "tool-result");
    }

    #[test]
    fn filename_base_zero_pads_to_width() {
        let m = text_message(7, "user", "hi");
        assert_eq!(filename_base(&m, "user", 3), "007-user");
    }

    #[test]
    fn last_n_returns_tail_in_order() {
        let messages = vec![text_message(0, "user", "a"), text_message(1, "user", "b"), text_message(2, "user", "c")];
        let tail = last_n(&messages, 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].sequence_id, 1);
        assert_eq!(tail[1].sequence_id, 2);
    }

    #[test]
    fn last_n_saturates_when_n_exceeds_length() {
        let messages = vec![text_message(0, "user", "a")];
        assert_eq!(last_n(&messages, 50).len(), 1);
    }

    #[test]
    fn since_user_one_skips_tool_result_mistyped_as_user() {
        let messages = vec![
            text_message(0, "user", "start"),
            tool_use_message(1, "tu1", "bash"),
            tool_result_message(2, "tu1"),
            text_message(3, "shelley", "done"),
        ];
        let mut tool_map = HashMap::new();
        tool_map.insert("tu1".to_string(), "bash".to_string());

        let result = since_slug(&messages, "user", 1, &tool_map);
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].sequence_id, 1);
        assert_eq!(result[1].sequence_id, 2);
        assert_eq!(result[2].sequence_id, 3);
    }

    #[test]
    fn since_slug_not_found_yields_empty() {
        let messages = vec![text_message(0, "user", "a")];
        let result = since_slug(&messages, "nonexistent", 1, &HashMap::new());
        assert!(result.is_empty());
    }

    #[test]
    fn render_conversation_markdown_includes_command_annotation() {
        let messages = vec![tool_use_message(0, "tu1", "bash"), tool_result_message(1, "tu1")];
        let mut tool_map = HashMap::new();
        tool_map.insert("tu1".to_string(), "bash".to_string());
        let rendered = render_conversation_markdown(&messages, &tool_map);
        assert!(rendered.contains("## bash-tool"));
        assert!(rendered.contains("### command: ls"));
        assert!(rendered.contains("file.txt"));
    }
}
