//! Conversation message types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tiller_provider::{ProviderContent, ProviderMessage};

/// Unique message identifier based on ULID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Carrier of exactly one tool result.
    Tool,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A block of content within a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },

    /// Base64-encoded image.
    Image {
        data: String,
        mime_type: String,
    },

    /// Model reasoning. Kept in history but never sent back to the provider.
    Thinking {
        thinking: String,
    },

    /// A tool invocation requested by the assistant.
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// The result of a tool invocation.
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        metadata: serde_json::Value,
    },
}

/// A tool call as emitted by the model, with its raw JSON input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: String,
}

impl ToolCall {
    /// Parsed arguments. Empty input means no arguments; malformed input
    /// becomes `Null` so the tool reports it as invalid parameters.
    pub fn arguments(&self) -> serde_json::Value {
        if self.input.trim().is_empty() {
            return serde_json::Value::Object(Default::default());
        }
        serde_json::from_str(&self.input).unwrap_or(serde_json::Value::Null)
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: Vec<ContentBlock>,
    /// Unix timestamp (seconds since epoch).
    pub timestamp: u64,
    /// Marks the synthetic message that replaced a compacted prefix.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_summary: bool,
}

impl Message {
    fn now_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn with_role(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content,
            timestamp: Self::now_timestamp(),
            is_summary: false,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, vec![ContentBlock::Text { text: text.into() }])
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, vec![ContentBlock::Text { text: text.into() }])
    }

    /// The user-role message standing in for a summarized prefix.
    pub fn summary(text: impl Into<String>) -> Self {
        let mut message = Self::user(text);
        message.is_summary = true;
        message
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::tool_result_with_metadata(tool_call_id, content, is_error, serde_json::Value::Null)
    }

    pub fn tool_result_with_metadata(
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
        metadata: serde_json::Value,
    ) -> Self {
        Self::with_role(
            Role::Tool,
            vec![ContentBlock::ToolResult {
                tool_call_id: tool_call_id.into(),
                content: content.into(),
                is_error,
                metadata,
            }],
        )
    }

    /// Concatenated text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool calls carried by this message, in emission order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolCall {
                    id,
                    name,
                    arguments,
                } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: arguments.to_string(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolCall { .. }))
    }

    /// Id of the call this message answers, for tool messages.
    pub fn tool_result_id(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
    }
}

/// Convert a conversation to provider format. System messages travel in the
/// request's system prompt instead.
pub fn to_provider_messages(messages: &[Message]) -> Vec<ProviderMessage> {
    messages
        .iter()
        .filter(|message| message.role != Role::System)
        .map(|message| ProviderMessage {
            role: message.role.as_str().to_string(),
            content: message
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(ProviderContent::Text { text: text.clone() }),
                    ContentBlock::Image { data, mime_type } => Some(ProviderContent::Image {
                        data: data.clone(),
                        mime_type: mime_type.clone(),
                    }),
                    ContentBlock::Thinking { .. } => None,
                    ContentBlock::ToolCall {
                        id,
                        name,
                        arguments,
                    } => Some(ProviderContent::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: arguments.clone(),
                    }),
                    ContentBlock::ToolResult {
                        tool_call_id,
                        content,
                        is_error,
                        ..
                    } => Some(ProviderContent::ToolResult {
                        tool_call_id: tool_call_id.clone(),
                        content: content.clone(),
                        is_error: *is_error,
                    }),
                })
                .collect(),
        })
        .collect()
}

/// Text of the system messages in a conversation, joined by blank lines.
pub fn system_text(messages: &[Message]) -> Option<String> {
    let parts: Vec<String> = messages
        .iter()
        .filter(|message| message.role == Role::System)
        .map(Message::text)
        .filter(|text| !text.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}
