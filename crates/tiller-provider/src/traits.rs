//! Provider trait definition.

use crate::error::ProviderError;
use crate::types::{Chunk, ModelInfo, Request, Response};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Stream of chunks for one turn.
pub type ChunkStream<'a> = BoxStream<'a, Result<Chunk, ProviderError>>;

/// Trait for LLM provider implementations.
///
/// Providers handle communication with one LLM API and normalize its
/// responses into the canonical [`Chunk`] stream. Retry policy belongs to the
/// provider, not to the caller.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name (e.g., "openai").
    fn name(&self) -> &str;

    /// List of models supported by this provider.
    fn models(&self) -> Vec<ModelInfo>;

    /// Currently selected model identifier.
    fn current_model(&self) -> &str;

    /// Send a streaming request for one turn.
    async fn stream(&self, request: Request) -> Result<ChunkStream<'_>, ProviderError>;

    /// Send a non-streaming request and collect the full response.
    async fn complete(&self, request: Request) -> Result<Response, ProviderError>;
}

/// Builds a provider bound to a model.
///
/// Subagents and background tasks resolve their own model, so they need a
/// factory rather than a single provider instance.
pub trait ProviderFactory: Send + Sync {
    /// Create a provider serving `model`.
    fn create(&self, model: &str) -> Result<Arc<dyn Provider>, ProviderError>;

    /// Model used when nothing more specific is requested.
    fn default_model(&self) -> &str;
}

// Compile-time check: Provider must be object-safe
const _: () = {
    fn _assert_object_safe(_: &dyn Provider, _: &dyn ProviderFactory) {}
};
