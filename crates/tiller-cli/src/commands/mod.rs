//! Command implementations and the runtime they share.

pub mod agents;
pub mod exec;
pub mod task;
pub mod tools;

use std::sync::Arc;
use tiller_core::{Config, RuntimeContext};
use tiller_provider::{ModelCache, ProviderCatalog, ProviderKind};
use tiller_store::TaskStore;

/// Provider and model chosen on the command line, if any.
#[derive(Debug, Clone, Default)]
pub struct ProviderArgs {
    pub provider: Option<String>,
    pub model: Option<String>,
}

impl ProviderArgs {
    /// Arguments to hand a worker process so it talks to the same provider.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(provider) = &self.provider {
            args.extend(["--provider".to_string(), provider.clone()]);
        }
        if let Some(model) = &self.model {
            args.extend(["--model".to_string(), model.clone()]);
        }
        args
    }
}

/// Build the process-wide runtime from the config and the command line.
pub fn build_runtime(config: Config, args: &ProviderArgs) -> anyhow::Result<Arc<RuntimeContext>> {
    let provider_name = args.provider.as_deref().unwrap_or(&config.provider);
    let kind: ProviderKind = provider_name.parse()?;

    // The configured model belongs to the configured provider; switching
    // providers on the command line falls back to that provider's default.
    let model = match (&args.model, &args.provider) {
        (Some(model), _) => Some(model.clone()),
        (None, None) if !config.model.is_empty() => Some(config.model.clone()),
        _ => None,
    };

    let models = ModelCache::from_catalog();
    let api_key = config.api_keys.get(kind.as_str()).cloned();
    let catalog = ProviderCatalog::new(kind, api_key, model, models.clone());

    let runtime = RuntimeContext::new(
        config,
        Arc::new(catalog),
        TaskStore::new(),
        std::env::current_dir()?,
    )
    .with_models(models);
    tracing::debug!(provider = %kind, "runtime ready");
    Ok(Arc::new(runtime))
}
