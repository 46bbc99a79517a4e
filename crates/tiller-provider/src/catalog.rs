//! Static provider catalog and the shared model metadata cache.
//!
//! Every provider tiller can talk to is a variant of [`ProviderKind`]. The
//! table of endpoints and models is a constant built into the binary, so
//! there is no registration step at startup and no global mutable registry.

use crate::error::ProviderError;
use crate::providers::openai_compat::{OpenAiCompatConfig, OpenAiCompatProvider};
use crate::traits::{Provider, ProviderFactory};
use crate::types::ModelInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

/// The closed set of supported providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Zai,
    OpenRouter,
    Ollama,
}

struct ModelSpec {
    id: &'static str,
    name: &'static str,
    context_window: usize,
    max_output_tokens: usize,
}

/// One row of the catalog.
pub struct CatalogEntry {
    pub kind: ProviderKind,
    pub name: &'static str,
    pub base_url: &'static str,
    /// Environment variable holding the API key, if the endpoint needs one.
    pub api_key_env: Option<&'static str>,
    pub default_model: &'static str,
    /// Whether model ids outside `models` are passed through unchecked.
    pub open_models: bool,
    models: &'static [ModelSpec],
}

impl CatalogEntry {
    /// Known models of this provider.
    pub fn models(&self) -> Vec<ModelInfo> {
        self.models
            .iter()
            .map(|m| ModelInfo::new(m.id, m.name, m.context_window, m.max_output_tokens))
            .collect()
    }

    fn knows(&self, model: &str) -> bool {
        self.models.iter().any(|m| m.id == model)
    }
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        kind: ProviderKind::OpenAi,
        name: "openai",
        base_url: "https://api.openai.com/v1",
        api_key_env: Some("OPENAI_API_KEY"),
        default_model: "gpt-4o",
        open_models: false,
        models: &[
            ModelSpec {
                id: "gpt-4o",
                name: "GPT-4o",
                context_window: 128_000,
                max_output_tokens: 16_384,
            },
            ModelSpec {
                id: "gpt-4o-mini",
                name: "GPT-4o mini",
                context_window: 128_000,
                max_output_tokens: 16_384,
            },
            ModelSpec {
                id: "gpt-4.1",
                name: "GPT-4.1",
                context_window: 1_047_576,
                max_output_tokens: 32_768,
            },
        ],
    },
    CatalogEntry {
        kind: ProviderKind::Zai,
        name: "zai",
        base_url: "https://api.z.ai/api/coding/paas/v4",
        api_key_env: Some("ZAI_API_KEY"),
        default_model: "glm-5",
        open_models: false,
        models: &[
            ModelSpec {
                id: "glm-5",
                name: "GLM-5",
                context_window: 128_000,
                max_output_tokens: 16_384,
            },
            ModelSpec {
                id: "glm-4.7",
                name: "GLM-4.7",
                context_window: 128_000,
                max_output_tokens: 8_192,
            },
        ],
    },
    CatalogEntry {
        kind: ProviderKind::OpenRouter,
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        api_key_env: Some("OPENROUTER_API_KEY"),
        default_model: "anthropic/claude-sonnet-4",
        open_models: true,
        models: &[ModelSpec {
            id: "anthropic/claude-sonnet-4",
            name: "Claude Sonnet 4 (OpenRouter)",
            context_window: 200_000,
            max_output_tokens: 64_000,
        }],
    },
    CatalogEntry {
        kind: ProviderKind::Ollama,
        name: "ollama",
        base_url: "http://localhost:11434/v1",
        api_key_env: None,
        default_model: "qwen2.5-coder",
        open_models: true,
        models: &[ModelSpec {
            id: "qwen2.5-coder",
            name: "Qwen2.5 Coder (local)",
            context_window: 32_768,
            max_output_tokens: 8_192,
        }],
    },
];

impl ProviderKind {
    /// All catalog rows.
    pub fn all() -> &'static [CatalogEntry] {
        CATALOG
    }

    /// The catalog row for this provider.
    pub fn entry(self) -> &'static CatalogEntry {
        CATALOG
            .iter()
            .find(|entry| entry.kind == self)
            .unwrap_or(&CATALOG[0])
    }

    pub fn as_str(self) -> &'static str {
        self.entry().name
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CATALOG
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(s))
            .map(|entry| entry.kind)
            .ok_or_else(|| {
                let available = CATALOG
                    .iter()
                    .map(|entry| entry.name)
                    .collect::<Vec<_>>()
                    .join(", ");
                ProviderError::UnknownProvider(format!("{s}. Available: {available}"))
            })
    }
}

/// Shared, read-mostly model metadata keyed by model id.
#[derive(Clone, Default)]
pub struct ModelCache {
    inner: Arc<RwLock<HashMap<String, ModelInfo>>>,
}

impl ModelCache {
    /// Cache pre-filled with every catalog model.
    pub fn from_catalog() -> Self {
        let cache = Self::default();
        for entry in CATALOG {
            cache.extend(entry.models());
        }
        cache
    }

    pub fn insert(&self, info: ModelInfo) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info.id.clone(), info);
    }

    pub fn extend(&self, models: impl IntoIterator<Item = ModelInfo>) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for info in models {
            guard.insert(info.id.clone(), info);
        }
    }

    pub fn get(&self, model: &str) -> Option<ModelInfo> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
            .cloned()
    }

    /// Context window of `model`, or 0 when unknown (which disables compaction).
    pub fn context_window(&self, model: &str) -> usize {
        self.get(model).map(|info| info.context_window).unwrap_or(0)
    }
}

/// Provider factory over the static catalog, bound to one configured provider.
pub struct ProviderCatalog {
    kind: ProviderKind,
    api_key: Option<String>,
    default_model: String,
    cache: ModelCache,
}

impl ProviderCatalog {
    /// Build the factory for `kind`. `api_key` falls back to the entry's
    /// environment variable.
    pub fn new(
        kind: ProviderKind,
        api_key: Option<String>,
        default_model: Option<String>,
        cache: ModelCache,
    ) -> Self {
        let entry = kind.entry();
        let api_key = api_key
            .filter(|key| !key.is_empty())
            .or_else(|| entry.api_key_env.and_then(|var| std::env::var(var).ok()));
        Self {
            kind,
            api_key,
            default_model: default_model.unwrap_or_else(|| entry.default_model.to_string()),
            cache,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }
}

impl ProviderFactory for ProviderCatalog {
    fn create(&self, model: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        let entry = self.kind.entry();
        if !entry.open_models && !entry.knows(model) {
            return Err(ProviderError::InvalidModel(format!(
                "{model} is not served by {}",
                entry.name
            )));
        }

        let api_key = match (entry.api_key_env, &self.api_key) {
            (None, _) => String::new(),
            (Some(_), Some(key)) => key.clone(),
            (Some(var), None) => {
                return Err(ProviderError::Auth(format!(
                    "{var} not set. Set it with:\n  export {var}=your-key-here"
                )))
            }
        };

        let mut models = entry.models();
        if !entry.knows(model) {
            let info = self
                .cache
                .get(model)
                .unwrap_or_else(|| ModelInfo::new(model, model, 0, 4_096));
            models.push(info);
        }

        let provider = OpenAiCompatProvider::new(OpenAiCompatConfig {
            base_url: entry.base_url.to_string(),
            api_key,
            provider_name: entry.name.to_string(),
            default_model: model.to_string(),
            models,
        });
        Ok(Arc::new(provider))
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}
