//! Common types used by the provider trait and implementations.

use serde::{Deserialize, Serialize};

/// A message in provider-native format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMessage {
    /// Message role (user, assistant, tool).
    pub role: String,
    /// Content blocks.
    pub content: Vec<ProviderContent>,
}

impl ProviderMessage {
    /// Plain-text user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: vec![ProviderContent::Text { text: text.into() }],
        }
    }
}

/// Content block in provider-native format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderContent {
    /// Plain text.
    #[serde(rename = "text")]
    Text { text: String },

    /// Tool invocation.
    #[serde(rename = "tool_call")]
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// Tool result.
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },

    /// Image.
    #[serde(rename = "image")]
    Image { data: String, mime_type: String },
}

/// Tool definition for the provider API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// Request to a provider.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Conversation messages.
    pub messages: Vec<ProviderMessage>,
    /// Available tools. Empty for plain completions such as summaries.
    pub tools: Vec<ToolDefinition>,
    /// System prompt.
    pub system: Option<String>,
    /// Maximum tokens in the response.
    pub max_tokens: Option<usize>,
}

/// Non-streaming response from a provider.
#[derive(Debug, Clone)]
pub struct Response {
    /// Content blocks in the response.
    pub content: Vec<ProviderContent>,
    /// Stop reason.
    pub stop_reason: StopReason,
    /// Token usage.
    pub usage: Usage,
}

impl Response {
    /// Concatenated text blocks of the response.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ProviderContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens consumed.
    pub input_tokens: usize,
    /// Output tokens generated.
    pub output_tokens: usize,
}

impl Usage {
    pub fn new(input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Add another usage record into this one.
    pub fn accumulate(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Normal end of response.
    EndTurn,
    /// Model wants to use a tool.
    ToolUse,
    /// Max tokens reached.
    MaxTokens,
}

/// One element of a streamed turn.
///
/// A well-formed stream ends with exactly one `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Chunk {
    /// A chunk of text output.
    Text { delta: String },
    /// A chunk of thinking/reasoning output.
    Thinking { delta: String },
    /// Start of a tool call.
    ToolStart { id: String, name: String },
    /// Incremental JSON arguments for a tool call.
    ToolInput { id: String, delta: String },
    /// Stream completed.
    Done { reason: StopReason, usage: Usage },
    /// Stream failed.
    Error { message: String },
}

impl Chunk {
    /// Whether this chunk terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Chunk::Done { .. } | Chunk::Error { .. })
    }
}

/// Information about a model supported by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier (e.g., "gpt-4o").
    pub id: String,
    /// Human-readable model name.
    pub name: String,
    /// Maximum context window in tokens.
    pub context_window: usize,
    /// Maximum output tokens.
    pub max_output_tokens: usize,
    /// Whether the model supports tool use.
    pub supports_tools: bool,
}

impl ModelInfo {
    pub fn new(id: &str, name: &str, context_window: usize, max_output_tokens: usize) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            context_window,
            max_output_tokens,
            supports_tools: true,
        }
    }
}
