// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed view over the executor's message wire format.
//!
//! Callbacks carry messages as raw JSON tagged with `_type`. The raw
//! value is what gets persisted; [`AgentMessage`] is the typed view the
//! callback pipeline works with. Unknown message or block types fall
//! back to an untagged variant holding the original JSON so that newer
//! executors do not break older backends.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Maximum length of a persisted text preview, in characters.
pub const TEXT_PREVIEW_MAX_CHARS: usize = 500;

/// Role a message is persisted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Message produced by the user.
    User,
    /// Message produced by the agent.
    Assistant,
    /// Runtime/system message.
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
            Self::System => f.write_str("system"),
        }
    }
}

/// One content block inside an agent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "_type")]
pub enum ContentBlock {
    /// Plain text.
    TextBlock {
        /// The text content.
        text: String,
    },
    /// A tool invocation.
    ToolUseBlock {
        /// SDK tool-use id, unique within a session.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input payload.
        #[serde(default)]
        input: Value,
    },
    /// The result of a prior tool invocation.
    ToolResultBlock {
        /// Id of the matching use block.
        tool_use_id: String,
        /// Result payload.
        #[serde(default)]
        content: Option<Value>,
        /// Whether the tool reported an error.
        #[serde(default)]
        is_error: bool,
    },
    /// Any block type this tier does not understand, kept verbatim.
    #[serde(untagged)]
    Unknown(Value),
}

/// Typed view of an executor message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "_type")]
pub enum AgentMessage {
    /// Agent output.
    AssistantMessage {
        /// Ordered content blocks.
        #[serde(default)]
        content: Vec<ContentBlock>,
    },
    /// User input echoed back through the stream.
    UserMessage {
        /// Ordered content blocks.
        #[serde(default)]
        content: Vec<ContentBlock>,
    },
    /// Runtime event, e.g. the SDK init handshake.
    SystemMessage {
        /// Event subtype (`init`, ...).
        #[serde(default)]
        subtype: Option<String>,
        /// Event payload.
        #[serde(default)]
        data: Option<Value>,
    },
    /// End-of-run summary carrying usage accounting.
    ResultMessage {
        /// SDK session id for resuming the conversation.
        #[serde(default)]
        session_id: Option<String>,
        /// Raw usage object.
        #[serde(default)]
        usage: Option<Value>,
        /// Total cost in USD.
        #[serde(default)]
        total_cost_usd: Option<f64>,
        /// Wall-clock duration of the run.
        #[serde(default)]
        duration_ms: Option<i64>,
    },
    /// Any message type this tier does not understand, kept verbatim.
    #[serde(untagged)]
    Unknown(Value),
}

impl AgentMessage {
    /// Parse the typed view from a raw callback value. Never fails: an
    /// unparseable shape lands in [`AgentMessage::Unknown`].
    #[must_use]
    pub fn from_value(raw: &Value) -> Self {
        serde_json::from_value(raw.clone()).unwrap_or_else(|_| Self::Unknown(raw.clone()))
    }

    /// Role this message is persisted under. Unrecognized types match on
    /// the `_type` string and default to `assistant`.
    #[must_use]
    pub fn role(&self) -> MessageRole {
        match self {
            Self::AssistantMessage { .. } | Self::ResultMessage { .. } => MessageRole::Assistant,
            Self::UserMessage { .. } => MessageRole::User,
            Self::SystemMessage { .. } => MessageRole::System,
            Self::Unknown(raw) => {
                let type_name = raw.get("_type").and_then(Value::as_str).unwrap_or("");
                if type_name.contains("User") {
                    MessageRole::User
                } else if type_name.contains("System") {
                    MessageRole::System
                } else {
                    MessageRole::Assistant
                }
            }
        }
    }

    /// Content blocks, empty for block-less message types.
    #[must_use]
    pub fn content(&self) -> &[ContentBlock] {
        match self {
            Self::AssistantMessage { content } | Self::UserMessage { content } => content,
            _ => &[],
        }
    }

    /// First text block, truncated to [`TEXT_PREVIEW_MAX_CHARS`].
    #[must_use]
    pub fn text_preview(&self) -> Option<String> {
        self.content().iter().find_map(|block| match block {
            ContentBlock::TextBlock { text } => {
                Some(text.chars().take(TEXT_PREVIEW_MAX_CHARS).collect())
            }
            _ => None,
        })
    }

    /// SDK session id derivable from this message: `ResultMessage`
    /// carries it directly; a `SystemMessage` with `subtype == "init"`
    /// carries it under `data.session_id`, possibly nested one level.
    #[must_use]
    pub fn sdk_session_id(&self) -> Option<&str> {
        match self {
            Self::ResultMessage { session_id, .. } => session_id.as_deref(),
            Self::SystemMessage { subtype, data } => {
                if subtype.as_deref() != Some("init") {
                    return None;
                }
                let data = data.as_ref()?;
                if let Some(inner) = data.get("data") {
                    if let Some(id) = inner.get("session_id").and_then(Value::as_str) {
                        return Some(id);
                    }
                }
                data.get("session_id").and_then(Value::as_str)
            }
            _ => None,
        }
    }

    /// Usage accounting, for `ResultMessage` values that carry one.
    #[must_use]
    pub fn usage(&self) -> Option<UsageReport<'_>> {
        match self {
            Self::ResultMessage {
                usage: Some(usage),
                total_cost_usd,
                duration_ms,
                ..
            } => Some(UsageReport {
                usage,
                total_cost_usd: *total_cost_usd,
                duration_ms: *duration_ms,
            }),
            _ => None,
        }
    }
}

/// Usage accounting extracted from a `ResultMessage`.
#[derive(Debug, Clone, Copy)]
pub struct UsageReport<'a> {
    /// Raw usage object from the SDK.
    pub usage: &'a Value,
    /// Total cost in USD.
    pub total_cost_usd: Option<f64>,
    /// Wall-clock duration of the run.
    pub duration_ms: Option<i64>,
}

impl UsageReport<'_> {
    /// Inbound token count, when the SDK reports one.
    #[must_use]
    pub fn input_tokens(&self) -> Option<i64> {
        self.usage.get("input_tokens").and_then(Value::as_i64)
    }

    /// Outbound token count, when the SDK reports one.
    #[must_use]
    pub fn output_tokens(&self) -> Option<i64> {
        self.usage.get("output_tokens").and_then(Value::as_i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_assistant_message_with_blocks() {
        let raw = json!({
            "_type": "AssistantMessage",
            "content": [
                {"_type": "TextBlock", "text": "hello"},
                {"_type": "ToolUseBlock", "id": "t1", "name": "Bash", "input": {"cmd": "ls"}}
            ]
        });
        let message = AgentMessage::from_value(&raw);
        assert_eq!(message.role(), MessageRole::Assistant);
        assert_eq!(message.text_preview().as_deref(), Some("hello"));
        assert_eq!(message.content().len(), 2);
    }

    #[test]
    fn unknown_message_keeps_raw_and_guesses_role() {
        let raw = json!({"_type": "StreamingUserMessage", "chunk": "hi"});
        let message = AgentMessage::from_value(&raw);
        assert!(matches!(message, AgentMessage::Unknown(_)));
        assert_eq!(message.role(), MessageRole::User);
    }

    #[test]
    fn unknown_block_survives_inside_known_message() {
        let raw = json!({
            "_type": "AssistantMessage",
            "content": [{"_type": "ThinkingBlock", "thinking": "..."}]
        });
        let message = AgentMessage::from_value(&raw);
        assert!(matches!(message.content()[0], ContentBlock::Unknown(_)));
    }

    #[test]
    fn sdk_session_id_from_result_message() {
        let raw = json!({"_type": "ResultMessage", "session_id": "sdk-1", "usage": {"input_tokens": 5}});
        let message = AgentMessage::from_value(&raw);
        assert_eq!(message.sdk_session_id(), Some("sdk-1"));
        assert_eq!(message.usage().unwrap().input_tokens(), Some(5));
    }

    #[test]
    fn sdk_session_id_from_nested_init_data() {
        let raw = json!({
            "_type": "SystemMessage",
            "subtype": "init",
            "data": {"data": {"session_id": "sdk-2"}}
        });
        assert_eq!(AgentMessage::from_value(&raw).sdk_session_id(), Some("sdk-2"));

        let flat = json!({
            "_type": "SystemMessage",
            "subtype": "init",
            "data": {"session_id": "sdk-3"}
        });
        assert_eq!(AgentMessage::from_value(&flat).sdk_session_id(), Some("sdk-3"));

        let other = json!({"_type": "SystemMessage", "subtype": "status", "data": {"session_id": "x"}});
        assert_eq!(AgentMessage::from_value(&other).sdk_session_id(), None);
    }

    #[test]
    fn text_preview_truncates_on_char_boundary() {
        let text = "é".repeat(600);
        let raw = json!({"_type": "AssistantMessage", "content": [{"_type": "TextBlock", "text": text}]});
        let preview = AgentMessage::from_value(&raw).text_preview().unwrap();
        assert_eq!(preview.chars().count(), TEXT_PREVIEW_MAX_CHARS);
    }
}
