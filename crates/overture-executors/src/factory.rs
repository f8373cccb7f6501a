//! Executor factory and registry assembly

use std::sync::Arc;

use thiserror::Error;

use overture_config::{ToolSpec, ToolsConfig};
use overture_core::tool::{ToolExecutor, ToolRegistry};

use crate::builtin::build_builtin_executor;

/// Executor factory errors
#[derive(Debug, Error)]
pub enum ExecutorBuildError {
    #[error("unknown tool kind: {0}")]
    UnknownKind(String),
}

/// Executor factory trait
pub trait ExecutorFactory: Send + Sync {
    fn build(&self, spec: &ToolSpec) -> Result<Arc<dyn ToolExecutor>, ExecutorBuildError>;
}

/// Default factory for built-in executors
pub struct DefaultExecutorFactory;

impl DefaultExecutorFactory {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DefaultExecutorFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorFactory for DefaultExecutorFactory {
    fn build(&self, spec: &ToolSpec) -> Result<Arc<dyn ToolExecutor>, ExecutorBuildError> {
        match build_builtin_executor(spec) {
            Some(executor) => Ok(Arc::from(executor)),
            None => Err(ExecutorBuildError::UnknownKind(spec.kind.clone())),
        }
    }
}

/// Build a registry from a tools config through a factory.
pub fn build_registry(
    config: &ToolsConfig,
    factory: &dyn ExecutorFactory,
) -> Result<ToolRegistry, ExecutorBuildError> {
    let mut registry = ToolRegistry::new();
    for spec in &config.tools {
        registry.register(factory.build(spec)?);
    }
    Ok(registry)
}

/// Registry holding the stock tool set with default configuration.
pub fn default_registry() -> ToolRegistry {
    // The default tools config only names built-in kinds, so this cannot
    // fail; an empty registry would be a config bug worth surfacing loudly.
    build_registry(&ToolsConfig::default(), &DefaultExecutorFactory::new())
        .unwrap_or_else(|_| ToolRegistry::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_holds_the_stock_tool_set() {
        let registry = default_registry();
        let mut names = registry.names();
        names.sort();
        assert_eq!(
            names,
            vec!["edit", "format", "read", "search", "test_runner", "typecheck"]
        );
    }

    #[test]
    fn test_factory_rejects_unknown_kind() {
        let spec = ToolSpec::new("profiler", "profiler");
        let err = DefaultExecutorFactory::new()
            .build(&spec)
            .expect_err("unknown kind");
        assert!(matches!(err, ExecutorBuildError::UnknownKind(kind) if kind == "profiler"));
    }

    #[test]
    fn test_registry_respects_config_overrides() {
        let config = ToolsConfig {
            tools: vec![ToolSpec {
                description: Some("TS checker".to_string()),
                config: serde_json::json!({ "command": "tsc", "args": ["--noEmit"] }),
                ..ToolSpec::new("typecheck", "typecheck")
            }],
        };
        let registry =
            build_registry(&config, &DefaultExecutorFactory::new()).expect("build registry");
        let executor = registry.get("typecheck").expect("typecheck registered");
        assert_eq!(executor.description(), "TS checker");
    }
}
