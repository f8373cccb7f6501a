//! # Overture Core
//!
//! Core abstractions and deterministic logic for the Overture pipeline.
//!
//! This crate contains:
//! - ClassifiedIntent / PlanNode / PlanEdge / PlanGraph definitions
//! - the plan graph builder (planner)
//! - the plan validator
//! - the execution scheduler and the tool-executor abstraction
//! - the patch data model shared across the workspace
//!
//! This crate does NOT care about:
//! - how intents are classified
//! - how individual tools do their work (see `overture-executors`)
//! - how patch sets are applied to disk (see `overture-patch`)
//! - how any of this is presented to a user

pub mod patch;
pub mod planner;
pub mod scheduler;
pub mod tool;
pub mod types;
pub mod validator;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::patch::{
        ChangeKind, FilePatch, ImpactEstimator, ImpactLevel, PatchChange, PatchError,
        PatchMetadata, PatchSet, PatchSetMetadata, RollbackPlan,
    };
    pub use crate::planner::{GraphPlanner, PlanError, PlanOptions};
    pub use crate::scheduler::{ExecOptions, ExecutionReport, NodeState, ScheduleError, Scheduler};
    pub use crate::tool::{
        CancellationToken, ExecutionContext, ExecutionResult, FileContent, RegistryError,
        ResultSet, SearchMatch, ToolData, ToolExecutor, ToolRegistry,
    };
    pub use crate::types::{
        ClassifiedIntent, Complexity, EdgeKind, EditSpec, IntentLabel, NodeId, NodeKind, PlanEdge,
        PlanGraph, PlanNode, RiskAssessment, RiskLevel, ToolParams,
    };
    pub use crate::validator::{PlanValidator, ValidationIssue, ValidationReport};
}

// Re-export key types at crate root
pub use patch::{FilePatch, PatchError, PatchSet, RollbackPlan};
pub use planner::{GraphPlanner, PlanError, PlanOptions};
pub use scheduler::{ExecOptions, ExecutionReport, ScheduleError, Scheduler};
pub use tool::{ExecutionContext, ExecutionResult, ToolData, ToolExecutor, ToolRegistry};
pub use types::{ClassifiedIntent, IntentLabel, NodeId, PlanGraph, PlanNode};
pub use validator::{PlanValidator, ValidationReport};
