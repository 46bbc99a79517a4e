//! Deterministic scripted provider for tests and local runs.
//!
//! Turns are queued up front and replayed in order, one per `stream` call.
//! No transport logic is involved. Every request is recorded so tests can
//! assert on what the engine actually sent.

use crate::error::ProviderError;
use crate::traits::{ChunkStream, Provider, ProviderFactory};
use crate::types::{Chunk, ModelInfo, ProviderContent, Request, Response, StopReason, Usage};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Stable provider name reported by [`MockProvider`].
pub const MOCK_PROVIDER_NAME: &str = "mock";

/// One scripted `stream` call.
#[derive(Debug, Clone)]
pub enum MockTurn {
    /// Emit these chunks, then end the stream.
    Chunks(Vec<Chunk>),
    /// Emit these chunks, then stay pending forever.
    Hang(Vec<Chunk>),
    /// Fail the `stream` call itself.
    Fail(String),
}

/// Scripted provider. Cheap to share behind `Arc`.
#[derive(Debug)]
pub struct MockProvider {
    model: String,
    context_window: usize,
    turns: Mutex<VecDeque<MockTurn>>,
    completions: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<Request>>,
    stream_calls: Mutex<usize>,
    complete_calls: Mutex<usize>,
}

impl MockProvider {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            context_window: 128_000,
            turns: Mutex::new(VecDeque::new()),
            completions: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            stream_calls: Mutex::new(0),
            complete_calls: Mutex::new(0),
        }
    }

    /// Override the context window reported through [`Provider::models`].
    #[must_use]
    pub fn with_context_window(mut self, context_window: usize) -> Self {
        self.context_window = context_window;
        self
    }

    pub fn push_turn(&self, turn: MockTurn) -> &Self {
        lock_unpoisoned(&self.turns).push_back(turn);
        self
    }

    /// Queue a plain text answer ending the turn.
    pub fn push_text(&self, text: &str, usage: Usage) -> &Self {
        self.push_turn(MockTurn::Chunks(vec![
            Chunk::Text {
                delta: text.to_string(),
            },
            Chunk::Done {
                reason: StopReason::EndTurn,
                usage,
            },
        ]))
    }

    /// Queue a turn requesting the given tool calls as `(id, name, json args)`.
    pub fn push_tool_calls(&self, calls: &[(&str, &str, &str)], usage: Usage) -> &Self {
        let mut chunks = Vec::new();
        for (id, name, args) in calls {
            chunks.push(Chunk::ToolStart {
                id: id.to_string(),
                name: name.to_string(),
            });
            chunks.push(Chunk::ToolInput {
                id: id.to_string(),
                delta: args.to_string(),
            });
        }
        chunks.push(Chunk::Done {
            reason: StopReason::ToolUse,
            usage,
        });
        self.push_turn(MockTurn::Chunks(chunks))
    }

    /// Queue the answer of the next `complete` call.
    pub fn push_completion(&self, text: &str) -> &Self {
        lock_unpoisoned(&self.completions).push_back(Ok(text.to_string()));
        self
    }

    /// Queue a failure for the next `complete` call.
    pub fn push_completion_error(&self, message: &str) -> &Self {
        lock_unpoisoned(&self.completions).push_back(Err(message.to_string()));
        self
    }

    pub fn stream_calls(&self) -> usize {
        *lock_unpoisoned(&self.stream_calls)
    }

    pub fn complete_calls(&self) -> usize {
        *lock_unpoisoned(&self.complete_calls)
    }

    /// Total provider calls of either kind.
    pub fn calls(&self) -> usize {
        self.stream_calls() + self.complete_calls()
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        lock_unpoisoned(&self.requests).clone()
    }

    /// Scripted turns not consumed yet.
    pub fn remaining_turns(&self) -> usize {
        lock_unpoisoned(&self.turns).len()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        MOCK_PROVIDER_NAME
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo::new(&self.model, "Mock", self.context_window, 4_096)]
    }

    fn current_model(&self) -> &str {
        &self.model
    }

    async fn stream(&self, request: Request) -> Result<ChunkStream<'_>, ProviderError> {
        *lock_unpoisoned(&self.stream_calls) += 1;
        lock_unpoisoned(&self.requests).push(request);

        let turn = lock_unpoisoned(&self.turns).pop_front().ok_or_else(|| {
            ProviderError::StreamError("mock provider has no scripted turns left".to_string())
        })?;

        match turn {
            MockTurn::Chunks(chunks) => Ok(stream::iter(chunks.into_iter().map(Ok)).boxed()),
            MockTurn::Hang(chunks) => Ok(stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            MockTurn::Fail(message) => Err(ProviderError::ApiError(message)),
        }
    }

    async fn complete(&self, request: Request) -> Result<Response, ProviderError> {
        *lock_unpoisoned(&self.complete_calls) += 1;
        lock_unpoisoned(&self.requests).push(request);

        let next = lock_unpoisoned(&self.completions).pop_front().ok_or_else(|| {
            ProviderError::ApiError("mock provider has no scripted completions left".to_string())
        })?;

        let text = next.map_err(ProviderError::ApiError)?;
        Ok(Response {
            content: vec![ProviderContent::Text { text }],
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        })
    }
}

/// Factory handing out one shared [`MockProvider`] for any model, recording
/// which models were requested.
pub struct MockProviderFactory {
    provider: Arc<MockProvider>,
    default_model: String,
    created: Mutex<Vec<String>>,
}

impl MockProviderFactory {
    pub fn new(provider: Arc<MockProvider>) -> Self {
        let default_model = provider.current_model().to_string();
        Self {
            provider,
            default_model,
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn provider(&self) -> &Arc<MockProvider> {
        &self.provider
    }

    /// Models passed to `create`, in call order.
    pub fn created_models(&self) -> Vec<String> {
        lock_unpoisoned(&self.created).clone()
    }
}

impl ProviderFactory for MockProviderFactory {
    fn create(&self, model: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        lock_unpoisoned(&self.created).push(model.to_string());
        Ok(self.provider.clone())
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
