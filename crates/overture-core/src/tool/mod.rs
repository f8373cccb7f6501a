//! Tool executor abstraction
//!
//! This module defines the ToolExecutor trait and related types:
//! - ToolExecutor: the pluggable unit of work behind each tool node
//! - ToolRegistry: explicit name -> executor registry
//! - ExecutionContext: per-run environment handed to executors
//! - ExecutionResult / ToolData / ResultSet: execution outcomes

mod context;
mod result;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub use context::ExecutionContext;
pub use result::{ExecutionResult, FileContent, ResultSet, SearchMatch, ToolData};

// Re-export CancellationToken for convenience
pub use tokio_util::sync::CancellationToken;

use crate::types::PlanNode;

/// Registry lookup errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
}

/// ToolExecutor trait - the pluggable unit of work behind each tool node
///
/// Executors are black boxes to the scheduler. They can:
/// - perform side effects (within the dry-run contract)
/// - return typed outputs
/// - fail with retry semantics
/// - undo their own effects through `rollback`
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tool name (must be unique within a registry)
    fn name(&self) -> &str;

    /// Short description (for planning and diagnostics)
    fn description(&self) -> &str;

    /// Execute a node
    async fn execute(&self, node: &PlanNode, ctx: &ExecutionContext) -> ExecutionResult;

    /// Whether a failed result may be retried by the scheduler.
    ///
    /// Default: follow the result's own `retryable` flag.
    fn can_retry(&self, result: &ExecutionResult) -> bool {
        result.retryable
    }

    /// Undo the side effects of a prior execution using its
    /// `rollback_data`. Returns true when the effects were undone.
    ///
    /// Default: nothing to undo.
    async fn rollback(&self, _result: &ExecutionResult) -> bool {
        true
    }
}

/// Tool registry for looking up executors by name
///
/// Registration is explicit; unknown-tool lookups return a typed error
/// rather than a silent miss.
pub struct ToolRegistry {
    executors: HashMap<String, Arc<dyn ToolExecutor>>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor under its own name
    pub fn register(&mut self, executor: Arc<dyn ToolExecutor>) {
        self.executors.insert(executor.name().to_string(), executor);
    }

    /// Get an executor by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.executors.get(name).cloned()
    }

    /// Get an executor by name, with a typed error for misses
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ToolExecutor>, RegistryError> {
        self.get(name)
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    /// All registered tool names
    pub fn names(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }

    /// Number of registered executors
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlanNode;

    struct NoopExecutor;

    #[async_trait]
    impl ToolExecutor for NoopExecutor {
        fn name(&self) -> &str {
            "noop"
        }

        fn description(&self) -> &str {
            "does nothing"
        }

        async fn execute(&self, _node: &PlanNode, _ctx: &ExecutionContext) -> ExecutionResult {
            ExecutionResult::ok_empty()
        }
    }

    #[test]
    fn test_registry_resolves_registered_executor() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NoopExecutor));
        assert!(registry.resolve("noop").is_ok());
        assert_eq!(registry.names(), vec!["noop".to_string()]);
    }

    #[test]
    fn test_registry_returns_typed_error_for_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.resolve("profiler").expect_err("should miss");
        assert!(matches!(err, RegistryError::UnknownTool(name) if name == "profiler"));
    }
}
