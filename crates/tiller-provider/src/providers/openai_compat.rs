//! Generic OpenAI-compatible provider.
//!
//! Handles the chat completions API format used by OpenAI, z.ai, Ollama,
//! OpenRouter, and many other providers.

use crate::error::ProviderError;
use crate::traits::{ChunkStream, Provider};
use crate::types::{Chunk, ModelInfo, ProviderContent, Request, Response, StopReason, Usage};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, RequestBuilder};
use reqwest_eventsource::{retry, Error as EventSourceError, Event, EventSource};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};

/// Configuration for an OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    pub base_url: String,
    pub api_key: String,
    pub provider_name: String,
    pub default_model: String,
    pub models: Vec<ModelInfo>,
}

/// A provider that speaks the OpenAI chat completions protocol.
pub struct OpenAiCompatProvider {
    config: OpenAiCompatConfig,
    client: Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider bound to `config.default_model`.
    pub fn new(config: OpenAiCompatConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn build_request_body(&self, request: Request, stream: bool) -> Value {
        let messages = convert_messages(&request);

        let mut body = json!({
            "model": self.config.default_model,
            "messages": messages,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = json!({"include_usage": true});
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
        }

        body
    }

    fn request(&self, body: &Value) -> RequestBuilder {
        let url = format!("{}/chat/completions", self.config.base_url);
        let builder = self.client.post(&url).json(body);
        if self.config.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.config.api_key)
        }
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let response = self.request(body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ProviderError::ApiError(format!("HTTP {status}: {body}")));
        }
        Ok(response)
    }
}

/// Convert canonical messages to the chat completions shape.
fn convert_messages(request: &Request) -> Vec<Value> {
    let mut messages = Vec::new();

    if let Some(ref system) = request.system {
        messages.push(json!({"role": "system", "content": system}));
    }

    for msg in &request.messages {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut tool_results = Vec::new();

        for block in &msg.content {
            match block {
                ProviderContent::Text { text: t } => text.push_str(t),
                ProviderContent::ToolCall {
                    id,
                    name,
                    arguments,
                } => tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments.to_string()},
                })),
                ProviderContent::ToolResult {
                    tool_call_id,
                    content,
                    ..
                } => tool_results.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": content,
                })),
                ProviderContent::Image { .. } => {}
            }
        }

        // Tool results go out as one role=tool message each.
        if !tool_results.is_empty() {
            messages.extend(tool_results);
            continue;
        }

        if !tool_calls.is_empty() && msg.role == "assistant" {
            let mut value = json!({"role": "assistant", "tool_calls": tool_calls});
            if !text.is_empty() {
                value["content"] = json!(text);
            }
            messages.push(value);
            continue;
        }

        messages.push(json!({"role": msg.role, "content": text}));
    }

    messages
}

fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "tool_calls" | "function_call" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

/// Decoder from SSE events to canonical chunks.
///
/// Framing (split lines, multi-line `data:` fields) is handled by
/// `reqwest-eventsource`; this only sees whole event payloads. Tool call
/// deltas after the first carry only an index, which is mapped back to the id
/// announced in `ToolStart`. The stop reason arrives with `finish_reason` but
/// `Done` is held back until `[DONE]` so the trailing usage block can be
/// folded into it.
#[derive(Debug, Default)]
pub(crate) struct ChunkDecoder {
    tool_ids: HashMap<usize, String>,
    stop_reason: Option<StopReason>,
    usage: Usage,
    finished: bool,
}

impl ChunkDecoder {
    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode one event. `event` is the SSE event name (`message` when the
    /// server sent none).
    pub(crate) fn decode_event(&mut self, event: &str, data: &str) -> Vec<Chunk> {
        if self.finished {
            return Vec::new();
        }
        if event == "error" {
            self.finished = true;
            let message = serde_json::from_str::<Value>(data)
                .ok()
                .and_then(|v| error_message(&v))
                .unwrap_or_else(|| data.trim().to_string());
            return vec![Chunk::Error { message }];
        }
        self.decode_data(data.trim())
    }

    /// Flush at end of body. Emits `Done` if a finish reason was seen but the
    /// server closed without `[DONE]`.
    pub(crate) fn finish(&mut self) -> Vec<Chunk> {
        if self.finished {
            return Vec::new();
        }
        match self.stop_reason.take() {
            Some(reason) => {
                self.finished = true;
                vec![Chunk::Done {
                    reason,
                    usage: self.usage,
                }]
            }
            None => Vec::new(),
        }
    }

    fn decode_data(&mut self, data: &str) -> Vec<Chunk> {
        if data == "[DONE]" {
            self.finished = true;
            return vec![Chunk::Done {
                reason: self.stop_reason.take().unwrap_or(StopReason::EndTurn),
                usage: self.usage,
            }];
        }

        let event: SseEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "skipping undecodable SSE payload");
                return Vec::new();
            }
        };

        if let Some(error) = event.error {
            self.finished = true;
            let message = error_message(&error).unwrap_or_else(|| error.to_string());
            return vec![Chunk::Error { message }];
        }

        if let Some(usage) = event.usage {
            self.usage = Usage::new(usage.prompt_tokens, usage.completion_tokens);
        }

        let mut chunks = Vec::new();
        for choice in event.choices {
            let delta = choice.delta;

            if let Some(reasoning) = delta.reasoning_content.or(delta.reasoning) {
                if !reasoning.is_empty() {
                    chunks.push(Chunk::Thinking { delta: reasoning });
                }
            }

            if let Some(content) = delta.content {
                if !content.is_empty() {
                    chunks.push(Chunk::Text { delta: content });
                }
            }

            for (position, call) in delta.tool_calls.unwrap_or_default().into_iter().enumerate() {
                let index = call.index.unwrap_or(position);
                let function = call.function.unwrap_or_default();

                if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                    let id = call
                        .id
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(|| format!("call_{index}"));
                    self.tool_ids.insert(index, id.clone());
                    chunks.push(Chunk::ToolStart { id, name });
                }

                if let Some(arguments) = function.arguments.filter(|a| !a.is_empty()) {
                    let Some(id) = self.tool_ids.get(&index).cloned() else {
                        tracing::debug!(index, "argument delta for unannounced tool call");
                        continue;
                    };
                    chunks.push(Chunk::ToolInput {
                        id,
                        delta: arguments,
                    });
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.stop_reason = Some(map_finish_reason(&reason));
            }
        }

        chunks
    }
}

/// `{"message": ...}` or `{"error": {"message": ...}}`.
fn error_message(value: &Value) -> Option<String> {
    value
        .get("message")
        .or_else(|| value.get("error").and_then(|e| e.get("message")))
        .and_then(Value::as_str)
        .map(str::to_string)
}

async fn stream_error(error: reqwest_eventsource::Error) -> ProviderError {
    match error {
        EventSourceError::Transport(e) => ProviderError::Http(e),
        EventSourceError::InvalidStatusCode(status, response) => {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            ProviderError::ApiError(format!("HTTP {status}: {body}"))
        }
        other => ProviderError::StreamError(other.to_string()),
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.provider_name
    }

    fn models(&self) -> Vec<ModelInfo> {
        self.config.models.clone()
    }

    fn current_model(&self) -> &str {
        &self.config.default_model
    }

    async fn stream(&self, request: Request) -> Result<ChunkStream<'_>, ProviderError> {
        let body = self.build_request_body(request, true);
        tracing::debug!(provider = %self.config.provider_name, model = %self.config.default_model, "opening stream");

        let mut source = EventSource::new(self.request(&body))
            .map_err(|e| ProviderError::StreamError(e.to_string()))?;
        // A finished completion must not be replayed by a reconnect.
        source.set_retry_policy(Box::new(retry::Never));

        // Surface connection and status failures from `stream` itself.
        match source.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(_))) => {
                return Err(ProviderError::StreamError(
                    "event received before the stream opened".to_string(),
                ))
            }
            Some(Err(e)) => {
                source.close();
                return Err(stream_error(e).await);
            }
            None => return Err(ProviderError::StreamError("stream closed before opening".to_string())),
        }

        let state = (source, ChunkDecoder::default(), VecDeque::new(), false);
        let chunks = stream::unfold(state, |(mut source, mut decoder, mut queue, mut ended)| async move {
            loop {
                if let Some(item) = queue.pop_front() {
                    return Some((item, (source, decoder, queue, ended)));
                }
                if ended || decoder.is_finished() {
                    source.close();
                    return None;
                }
                match source.next().await {
                    Some(Ok(Event::Open)) => {}
                    Some(Ok(Event::Message(message))) => queue.extend(
                        decoder
                            .decode_event(&message.event, &message.data)
                            .into_iter()
                            .map(Ok),
                    ),
                    Some(Err(EventSourceError::StreamEnded)) | None => {
                        ended = true;
                        queue.extend(decoder.finish().into_iter().map(Ok));
                    }
                    Some(Err(e)) => {
                        ended = true;
                        queue.push_back(Err(stream_error(e).await));
                    }
                }
            }
        });

        Ok(chunks.boxed())
    }

    async fn complete(&self, request: Request) -> Result<Response, ProviderError> {
        let body = self.build_request_body(request, false);
        let response = self.post(&body).await?;
        let resp: CompletionResponse = response.json().await?;

        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::StreamError("No choices in response".to_string()))?;

        let mut content = Vec::new();
        if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
            content.push(ProviderContent::Text { text });
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments));
            content.push(ProviderContent::ToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            });
        }

        let usage = resp
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Response {
            content,
            stop_reason: choice
                .finish_reason
                .as_deref()
                .map(map_finish_reason)
                .unwrap_or(StopReason::EndTurn),
            usage,
        })
    }
}

// Wire types for deserialization.

#[derive(Debug, Deserialize)]
struct SseEvent {
    #[serde(default)]
    choices: Vec<SseChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SseChoice {
    #[serde(default)]
    delta: SseDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SseDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<SseToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct SseToolCallDelta {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<SseFunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct SseFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<CompletionToolCall>>,
}

#[derive(Debug, Deserialize)]
struct CompletionToolCall {
    id: String,
    function: CompletionFunction,
}

#[derive(Debug, Deserialize)]
struct CompletionFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProviderMessage, ToolDefinition};

    fn test_config() -> OpenAiCompatConfig {
        OpenAiCompatConfig {
            base_url: "https://api.example.com/v1".to_string(),
            api_key: "test-key".to_string(),
            provider_name: "test".to_string(),
            default_model: "test-model".to_string(),
            models: vec![ModelInfo::new("test-model", "Test Model", 8192, 4096)],
        }
    }

    fn decode_all(payloads: &[&str]) -> Vec<Chunk> {
        let mut decoder = ChunkDecoder::default();
        let mut chunks = Vec::new();
        for data in payloads {
            chunks.extend(decoder.decode_event("message", data));
        }
        chunks.extend(decoder.finish());
        chunks
    }

    #[test]
    fn test_provider_identity() {
        let p = OpenAiCompatProvider::new(test_config());
        assert_eq!(p.name(), "test");
        assert_eq!(p.current_model(), "test-model");
        assert_eq!(p.models().len(), 1);
    }

    #[test]
    fn test_build_request_body() {
        let p = OpenAiCompatProvider::new(test_config());
        let request = Request {
            messages: vec![ProviderMessage::user("Hello")],
            system: Some("Be helpful".to_string()),
            max_tokens: Some(1024),
            ..Default::default()
        };

        let body = p.build_request_body(request, true);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["max_tokens"], 1024);
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[1]["role"], "user");
        assert_eq!(msgs[1]["content"], "Hello");
    }

    #[test]
    fn test_build_request_with_tools() {
        let p = OpenAiCompatProvider::new(test_config());
        let request = Request {
            tools: vec![ToolDefinition {
                name: "read".to_string(),
                description: "Read a file".to_string(),
                parameters: json!({"type": "object", "properties": {"path": {"type": "string"}}}),
            }],
            ..Default::default()
        };

        let body = p.build_request_body(request, false);
        assert!(body.get("stream_options").is_none());
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["function"]["name"], "read");
    }

    #[test]
    fn test_tool_results_become_tool_messages() {
        let request = Request {
            messages: vec![
                ProviderMessage {
                    role: "assistant".to_string(),
                    content: vec![ProviderContent::ToolCall {
                        id: "call_1".to_string(),
                        name: "read".to_string(),
                        arguments: json!({"path": "a.txt"}),
                    }],
                },
                ProviderMessage {
                    role: "tool".to_string(),
                    content: vec![ProviderContent::ToolResult {
                        tool_call_id: "call_1".to_string(),
                        content: "contents".to_string(),
                        is_error: false,
                    }],
                },
            ],
            ..Default::default()
        };

        let msgs = convert_messages(&request);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0]["tool_calls"][0]["function"]["arguments"], r#"{"path":"a.txt"}"#);
        assert!(msgs[0].get("content").is_none());
        assert_eq!(msgs[1]["role"], "tool");
        assert_eq!(msgs[1]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_decode_text_and_reasoning() {
        let chunks = decode_all(&[
            r#"{"choices":[{"delta":{"reasoning_content":"hmm"},"index":0}]}"#,
            r#"{"choices":[{"delta":{"content":"Hello"},"index":0}]}"#,
            "[DONE]",
        ]);
        assert_eq!(
            chunks,
            vec![
                Chunk::Thinking {
                    delta: "hmm".to_string()
                },
                Chunk::Text {
                    delta: "Hello".to_string()
                },
                Chunk::Done {
                    reason: StopReason::EndTurn,
                    usage: Usage::default()
                },
            ]
        );
    }

    #[test]
    fn test_decode_tool_call_deltas_by_index() {
        let chunks = decode_all(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"read","arguments":""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"glob","arguments":"{\"pat"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\":\"x\"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":7}}"#,
            "[DONE]",
        ]);

        assert_eq!(
            chunks[0],
            Chunk::ToolStart {
                id: "call_a".to_string(),
                name: "read".to_string()
            }
        );
        assert_eq!(
            chunks[2],
            Chunk::ToolInput {
                id: "call_b".to_string(),
                delta: "{\"pat".to_string()
            }
        );
        assert_eq!(
            chunks[3],
            Chunk::ToolInput {
                id: "call_a".to_string(),
                delta: "{\"path\":\"x\"}".to_string()
            }
        );
        assert_eq!(
            chunks.last(),
            Some(&Chunk::Done {
                reason: StopReason::ToolUse,
                usage: Usage::new(12, 7)
            })
        );
    }

    #[test]
    fn test_decode_multiline_data_payload() {
        // Multi-line `data:` fields reach the decoder joined with newlines.
        let chunks = decode_all(&["{\"choices\":[{\"delta\":\n{\"content\":\"héllo\"}}]}", "[DONE]"]);
        assert_eq!(
            chunks[0],
            Chunk::Text {
                delta: "héllo".to_string()
            }
        );
    }

    #[test]
    fn test_named_error_event_terminates() {
        let mut decoder = ChunkDecoder::default();
        let chunks = decoder.decode_event("error", r#"{"error":{"message":"overloaded"}}"#);
        assert_eq!(
            chunks,
            vec![Chunk::Error {
                message: "overloaded".to_string()
            }]
        );
        assert!(decoder.is_finished());
        assert!(decoder.decode_event("message", "[DONE]").is_empty());
    }

    #[test]
    fn test_finish_without_done_marker() {
        let chunks = decode_all(&[r#"{"choices":[{"delta":{"content":"x"},"finish_reason":"length"}]}"#]);
        assert_eq!(
            chunks.last(),
            Some(&Chunk::Done {
                reason: StopReason::MaxTokens,
                usage: Usage::default()
            })
        );
    }

    #[test]
    fn test_truncated_stream_has_no_terminal_chunk() {
        let chunks = decode_all(&[r#"{"choices":[{"delta":{"content":"partial"}}]}"#]);
        assert!(!chunks.iter().any(Chunk::is_terminal));
    }

    #[test]
    fn test_error_payload_terminates() {
        let chunks = decode_all(&[
            r#"{"error":{"message":"rate limited","code":429}}"#,
            r#"{"choices":[{"delta":{"content":"ignored"}}]}"#,
        ]);
        assert_eq!(
            chunks,
            vec![Chunk::Error {
                message: "rate limited".to_string()
            }]
        );
    }
}
