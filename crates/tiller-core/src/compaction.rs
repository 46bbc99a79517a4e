//! Token budget monitoring and conversation compaction.
//!
//! Compaction runs in two layers. Old tool outputs are pruned first, since
//! that is free. Only when pruning cannot bring usage back under the
//! threshold is the older part of the conversation summarized by the model
//! and replaced with a single summary message.

use crate::config::CompactionSettings;
use crate::error::CompactionError;
use crate::message::{ContentBlock, Message, Role};
use std::fmt::Write;
use std::sync::Arc;
use tiller_provider::{Provider, ProviderMessage, Request};

/// Usage percentage of the input limit at which compaction starts.
pub const COMPACTION_THRESHOLD_PERCENT: usize = 95;

const CHARS_PER_TOKEN: usize = 4;
const MESSAGE_OVERHEAD: usize = 4;
const TOOL_CALL_OVERHEAD: usize = 20;
const TOOL_RESULT_OVERHEAD: usize = 10;
const SUMMARY_RESULT_CHARS: usize = 500;
const SUMMARY_MAX_TOKENS: usize = 2_000;

const PRUNED_OUTPUT: &str = "[tool output pruned to save context]";
const SUMMARY_HEADER: &str = "[Summary of the earlier conversation]";
const SUMMARIZER_SYSTEM: &str = "You are a precise summarizer. Write a concise but complete \
summary of the conversation that keeps every technical detail needed to continue the work.";

/// Whether `input_tokens` has reached the compaction threshold of
/// `input_limit`. Unknown limits and empty usage never trigger.
pub fn needs_compaction(input_tokens: usize, input_limit: usize) -> bool {
    if input_tokens == 0 || input_limit == 0 {
        return false;
    }
    (input_tokens as u128) * 100 >= (input_limit as u128) * COMPACTION_THRESHOLD_PERCENT as u128
}

fn estimate_text(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Rough token count of one message, at about four characters per token.
pub fn estimate_message(message: &Message) -> usize {
    let content: usize = message
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => estimate_text(text),
            ContentBlock::Thinking { thinking } => estimate_text(thinking),
            ContentBlock::Image { .. } => 0,
            ContentBlock::ToolCall {
                name, arguments, ..
            } => estimate_text(name) + estimate_text(&arguments.to_string()) + TOOL_CALL_OVERHEAD,
            ContentBlock::ToolResult { content, .. } => {
                estimate_text(content) + TOOL_RESULT_OVERHEAD
            }
        })
        .sum();
    content + MESSAGE_OVERHEAD
}

pub fn estimate_history(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message).sum()
}

/// What a compaction cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Nothing outside the protected suffix could be reduced.
    Skipped,
    /// Old tool outputs were replaced by a placeholder.
    Pruned { outputs: usize, tokens_saved: usize },
    /// A prefix of `covered` messages was replaced by one summary message.
    Summarized { covered: usize },
}

/// Summarizes conversations through a plain completion request.
#[derive(Clone)]
pub struct Compactor {
    provider: Arc<dyn Provider>,
    settings: CompactionSettings,
}

impl Compactor {
    pub fn new(provider: Arc<dyn Provider>, settings: CompactionSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &CompactionSettings {
        &self.settings
    }

    /// Ask the model for a summary of `messages`.
    ///
    /// Returns the response text verbatim and the number of messages it
    /// covers. An empty conversation still issues the request.
    pub async fn summarize(
        &self,
        messages: &[Message],
        focus: Option<&str>,
    ) -> Result<(String, usize), CompactionError> {
        let prompt = build_summary_prompt(&format_for_summary(messages), focus);
        let request = Request {
            messages: vec![ProviderMessage::user(prompt)],
            tools: Vec::new(),
            system: Some(SUMMARIZER_SYSTEM.to_string()),
            max_tokens: Some(SUMMARY_MAX_TOKENS),
        };

        let response = self.provider.complete(request).await?;
        Ok((response.text(), messages.len()))
    }

    /// Bring `messages` back under the threshold.
    ///
    /// `messages` is only replaced once a layer has fully succeeded; on error
    /// it is exactly as it was.
    pub async fn compact_history(
        &self,
        messages: &mut Vec<Message>,
        input_tokens: usize,
        input_limit: usize,
        focus: Option<&str>,
    ) -> Result<CompactionOutcome, CompactionError> {
        let protected_from = protected_suffix_start(messages, self.settings.protect_tokens);
        if protected_from == 0 {
            return Ok(CompactionOutcome::Skipped);
        }

        let mut pruned = messages.clone();
        let (outputs, tokens_saved) = prune_tool_outputs(&mut pruned[..protected_from]);
        if outputs > 0
            && tokens_saved >= self.settings.prune_minimum_tokens
            && !needs_compaction(input_tokens.saturating_sub(tokens_saved), input_limit)
        {
            tracing::info!(outputs, tokens_saved, "pruned old tool outputs");
            *messages = pruned;
            return Ok(CompactionOutcome::Pruned {
                outputs,
                tokens_saved,
            });
        }

        let (system, prefix): (Vec<Message>, Vec<Message>) = messages[..protected_from]
            .iter()
            .cloned()
            .partition(|message| message.role == Role::System);
        if prefix.is_empty() {
            return Ok(CompactionOutcome::Skipped);
        }

        let (summary, covered) = self.summarize(&prefix, focus).await?;
        if summary.trim().is_empty() {
            return Err(CompactionError::EmptySummary);
        }

        let mut compacted = system;
        compacted.push(Message::summary(format!("{SUMMARY_HEADER}\n\n{summary}")));
        compacted.extend_from_slice(&messages[protected_from..]);
        tracing::info!(
            covered,
            before = messages.len(),
            after = compacted.len(),
            "summarized conversation prefix"
        );
        *messages = compacted;
        Ok(CompactionOutcome::Summarized { covered })
    }
}

/// Index of the first message of the protected suffix: the most recent
/// messages fitting in `budget` tokens, always at least the last one. The
/// boundary never separates a tool call from its results.
fn protected_suffix_start(messages: &[Message], budget: usize) -> usize {
    let mut start = messages.len();
    let mut used = 0;
    while start > 0 {
        let cost = estimate_message(&messages[start - 1]);
        if start < messages.len() && used + cost > budget {
            break;
        }
        used += cost;
        start -= 1;
    }
    while start > 0 && start < messages.len() && messages[start].role == Role::Tool {
        start -= 1;
    }
    start
}

/// Replace tool result bodies with a placeholder. Returns how many were
/// pruned and the estimated tokens freed.
fn prune_tool_outputs(messages: &mut [Message]) -> (usize, usize) {
    let placeholder_cost = estimate_text(PRUNED_OUTPUT);
    let mut outputs = 0;
    let mut saved = 0;
    for message in messages.iter_mut().filter(|m| m.role == Role::Tool) {
        for block in &mut message.content {
            if let ContentBlock::ToolResult { content, .. } = block {
                let cost = estimate_text(content);
                if cost <= placeholder_cost {
                    continue;
                }
                saved += cost - placeholder_cost;
                outputs += 1;
                *content = PRUNED_OUTPUT.to_string();
            }
        }
    }
    (outputs, saved)
}

fn format_for_summary(messages: &[Message]) -> String {
    let mut output = String::new();
    for message in messages {
        let role = if message.is_summary {
            "Earlier summary"
        } else {
            match message.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
                Role::System => "System",
            }
        };
        let _ = write!(output, "{role}: ");
        for block in &message.content {
            match block {
                ContentBlock::Text { text } => {
                    let _ = writeln!(output, "{text}");
                }
                ContentBlock::Thinking { thinking } => {
                    let _ = writeln!(output, "[Thinking: {thinking}]");
                }
                ContentBlock::Image { mime_type, .. } => {
                    let _ = writeln!(output, "[Image: {mime_type}]");
                }
                ContentBlock::ToolCall {
                    name, arguments, ..
                } => {
                    let _ = writeln!(output, "[Called tool: {name} with input: {arguments}]");
                }
                ContentBlock::ToolResult {
                    content, is_error, ..
                } => {
                    let status = if *is_error { "error" } else { "success" };
                    let body = if content.chars().count() > SUMMARY_RESULT_CHARS {
                        let prefix: String = content.chars().take(SUMMARY_RESULT_CHARS).collect();
                        format!("{prefix}... (truncated)")
                    } else {
                        content.clone()
                    };
                    let _ = writeln!(output, "[Tool result ({status}): {body}]");
                }
            }
        }
        output.push('\n');
    }
    output
}

fn build_summary_prompt(conversation: &str, focus: Option<&str>) -> String {
    let mut prompt = String::from(
        "Summarize this conversation concisely, preserving:\n\
         - Key decisions and conclusions reached\n\
         - Important file paths, code changes, and technical details\n\
         - Current task context and what has been accomplished\n\
         - Pending items, errors encountered, and next steps\n",
    );
    if let Some(focus) = focus.filter(|f| !f.trim().is_empty()) {
        let _ = write!(prompt, "\nPay particular attention to: {focus}\n");
    }
    let _ = write!(prompt, "\nConversation:\n{conversation}\nSummary:");
    prompt
}
