//! tiller-provider: LLM provider abstraction, catalog, and implementations.

pub mod catalog;
mod error;
pub mod mock;
pub mod providers;
pub mod traits;
pub mod types;

pub use catalog::{ModelCache, ProviderCatalog, ProviderKind};
pub use error::ProviderError;
pub use traits::{ChunkStream, Provider, ProviderFactory};
pub use types::{
    Chunk, ModelInfo, ProviderContent, ProviderMessage, Request, Response, StopReason,
    ToolDefinition, Usage,
};
