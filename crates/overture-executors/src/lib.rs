//! # Overture Executors
//!
//! Official tool executor collection for Overture.
//!
//! This crate provides:
//! - built-in executors (search, read, edit, typecheck, format, test_runner)
//! - a factory for building executors from config specs
//! - registry assembly helpers

mod builtin;
mod factory;

// Re-export core executor traits
pub use overture_core::tool::{
    ExecutionContext, ExecutionResult, ToolData, ToolExecutor, ToolRegistry,
};

pub use builtin::{build_builtin_executor, CommandExecutor, EditExecutor, ReadExecutor, SearchExecutor};
pub use factory::{build_registry, default_registry, DefaultExecutorFactory, ExecutorBuildError, ExecutorFactory};
