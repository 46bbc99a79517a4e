//! Accumulation of one streamed turn.
//!
//! The same primitive serves live forwarding and plain collection: every
//! chunk goes to the observer before it is folded into the [`TurnResult`].

use crate::error::TurnError;
use crate::message::{ContentBlock, Message, ToolCall};
use futures::StreamExt;
use tiller_provider::{Chunk, ChunkStream, ProviderError, StopReason, Usage};
use tokio_util::sync::CancellationToken;

/// Everything the model produced in one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    pub content: String,
    pub thinking: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

impl TurnResult {
    /// The assistant message recording this turn.
    pub fn to_message(&self) -> Message {
        let mut blocks = Vec::new();
        if !self.thinking.is_empty() {
            blocks.push(ContentBlock::Thinking {
                thinking: self.thinking.clone(),
            });
        }
        if !self.content.is_empty() {
            blocks.push(ContentBlock::Text {
                text: self.content.clone(),
            });
        }
        for call in &self.tool_calls {
            blocks.push(ContentBlock::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments(),
            });
        }
        Message::assistant(blocks)
    }

    /// Whether the loop should dispatch tools for this turn.
    pub fn wants_tools(&self) -> bool {
        self.stop_reason == StopReason::ToolUse && !self.tool_calls.is_empty()
    }
}

/// Drain `stream` into a [`TurnResult`], forwarding each chunk to `observe`.
///
/// Every await on the stream is raced against `cancel`.
pub async fn collect_turn<F>(
    mut stream: ChunkStream<'_>,
    cancel: &CancellationToken,
    mut observe: F,
) -> Result<TurnResult, TurnError>
where
    F: FnMut(&Chunk),
{
    let mut content = String::new();
    let mut thinking = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TurnError::Cancelled),
            next = stream.next() => next,
        };

        let chunk = match next {
            Some(chunk) => chunk?,
            None => return Err(TurnError::Truncated),
        };
        observe(&chunk);

        match chunk {
            Chunk::Text { delta } => content.push_str(&delta),
            Chunk::Thinking { delta } => thinking.push_str(&delta),
            Chunk::ToolStart { id, name } => tool_calls.push(ToolCall {
                id,
                name,
                input: String::new(),
            }),
            Chunk::ToolInput { id, delta } => {
                let target = match tool_calls.iter().rposition(|call| call.id == id) {
                    Some(pos) => tool_calls.get_mut(pos),
                    None => tool_calls.last_mut(),
                };
                match target {
                    Some(call) => call.input.push_str(&delta),
                    None => tracing::warn!(%id, "tool input for unknown call dropped"),
                }
            }
            Chunk::Done { reason, usage } => {
                return Ok(TurnResult {
                    content,
                    thinking,
                    tool_calls,
                    stop_reason: reason,
                    usage,
                });
            }
            Chunk::Error { message } => {
                return Err(TurnError::Provider(ProviderError::StreamError(message)));
            }
        }
    }
}
