//! Wire types for the backend's JSON REST surface.
//!
//! Plain `Deserialize`/`Serialize` structs over the remote JSON shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMeta {
    pub id: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub archived: bool,
    /// Whether the backend is waiting on the user for its next turn
    /// (backs the `waiting_for_input` presence file).
    #[serde(default)]
    pub waiting_for_input: bool,
    #[serde(default)]
    pub model: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Response envelope for `get_conversation`: metadata plus the *raw* message
/// list bytes, kept unparsed so the parsed-message cache can content-address
/// them.
#[derive(Debug, Clone)]
pub struct ConversationFetch {
    pub meta: ConversationMeta,
    pub messages_raw: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub max_context_tokens: u64,
}

/// Domain message type used throughout the node graph and caches. Identical
/// in shape to the wire type — the backend's JSON already matches the
/// parsed form this crate needs.
pub type Message = MessageWire;

/// Raw `{"messages": [...]}` envelope as received over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageListEnvelope {
    pub messages: Vec<MessageWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageWire {
    pub message_id: String,
    pub conversation_id: String,
    pub sequence_id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: String,
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default)]
    pub llm_data: Option<String>,
    #[serde(default)]
    pub usage_data: Option<String>,
}

/// ContentItem is a tagged union by integer `Type`:
/// 0/2 = plain text, 5 = tool-use, 6 = tool-result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub tool_result: Option<Vec<ToolResultText>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultText {
    #[serde(default)]
    pub text: Option<String>,
}

impl ContentItem {
    pub const TYPE_TEXT_A: u8 = 0;
    pub const TYPE_TEXT_B: u8 = 2;
    pub const TYPE_TOOL_USE: u8 = 5;
    pub const TYPE_TOOL_RESULT: u8 = 6;

    pub fn is_text(&self) -> bool {
        self.kind == Self::TYPE_TEXT_A || self.kind == Self::TYPE_TEXT_B
    }

    pub fn is_tool_use(&self) -> bool {
        self.kind == Self::TYPE_TOOL_USE
    }

    pub fn is_tool_result(&self) -> bool {
        self.kind == Self::TYPE_TOOL_RESULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_envelope() {
        let raw = r#"{"messages":[
            {"message_id":"m1","conversation_id":"c1","sequence_id":0,"type":"user","created_at":"t",
             "content":[{"type":0,"text":"hi"}]}
        ]}"#;
        let env: MessageListEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.messages.len(), 1);
        assert!(env.messages[0].content[0].is_text());
    }

    #[test]
    fn content_item_kind_helpers() {
        let tool_use = ContentItem {
            kind: 5,
            text: None,
            id: Some("t1".into()),
            tool_name: Some("bash".into()),
            tool_input: None,
            tool_use_id: None,
            tool_result: None,
        };
        assert!(tool_use.is_tool_use());
        assert!(!tool_use.is_text());
    }
}
