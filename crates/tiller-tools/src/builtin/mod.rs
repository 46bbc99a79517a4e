//! Built-in tool implementations.

pub mod bash;
pub mod glob;
pub mod grep;
pub mod read;
pub mod task;

use crate::ToolRegistry;
use std::sync::Arc;

/// Register all built-in tools into a registry.
pub fn register_all(registry: &mut ToolRegistry) {
    registry.register(Arc::new(read::ReadTool));
    registry.register(Arc::new(glob::GlobTool));
    registry.register(Arc::new(grep::GrepTool));
    registry.register(Arc::new(bash::BashTool));
    registry.register(Arc::new(task::TaskTool));
}

/// Registry holding every built-in tool.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_all(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_concurrency_classes() {
        let registry = builtin_registry();
        assert_eq!(registry.names(), vec!["bash", "glob", "grep", "read", "task"]);
        for safe in ["read", "glob", "grep", "task"] {
            assert!(registry.is_concurrency_safe(safe), "{safe} should be concurrency-safe");
        }
        assert!(!registry.is_concurrency_safe("bash"));
    }
}
