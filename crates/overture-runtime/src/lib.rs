//! # Overture Runtime
//!
//! Wires the pipeline together: classified intent -> plan graph builder ->
//! plan validator -> execution scheduler -> patch-set manager. Each stage is
//! the crate that owns it; this crate only composes them and carries
//! configuration into their options.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use overture_config::OvertureConfig;
use overture_core::patch::{PatchError, PatchSet};
use overture_core::planner::{GraphPlanner, PlanError, PlanOptions};
use overture_core::scheduler::{ExecOptions, ExecutionReport, Scheduler};
use overture_core::tool::{ExecutionContext, ToolRegistry};
use overture_core::types::{ClassifiedIntent, EditSpec, PlanGraph, ToolParams};
use overture_core::validator::{PlanValidator, ValidationReport};
use overture_executors::{build_registry, DefaultExecutorFactory, ExecutorBuildError};
use overture_patch::{ConflictPolicy, CreateOptions, PatchSetManager};

/// Pipeline-level errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("Plan graph failed validation: {issues:?}")]
    Validation { issues: Vec<String> },

    #[error("Executor setup failed: {0}")]
    ExecutorBuild(#[from] ExecutorBuildError),

    #[error("Patch handling failed: {0}")]
    Patch(#[from] PatchError),
}

/// Everything one pipeline run produced
#[derive(Debug)]
pub struct PipelineReport {
    pub graph: PlanGraph,
    pub validation: ValidationReport,
    pub execution: ExecutionReport,
    /// The managed patch set (registered with the patch manager) when the
    /// run produced edits
    pub patch_set: Option<PatchSet>,
}

/// The Overture pipeline
pub struct Pipeline {
    planner: GraphPlanner,
    validator: PlanValidator,
    scheduler: Scheduler,
    patch_manager: Arc<PatchSetManager>,
    project_root: PathBuf,
    plan_options: PlanOptions,
    exec_options: ExecOptions,
}

impl Pipeline {
    /// Assemble a pipeline from a registry and a project root, with default
    /// options everywhere else.
    pub fn new(registry: Arc<ToolRegistry>, project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            planner: GraphPlanner::new(),
            validator: PlanValidator::new(),
            scheduler: Scheduler::new(registry),
            patch_manager: Arc::new(PatchSetManager::new(project_root.clone())),
            project_root,
            plan_options: PlanOptions::default(),
            exec_options: ExecOptions::default(),
        }
    }

    /// Assemble a pipeline from a unified config file's schema.
    pub fn from_config(
        config: &OvertureConfig,
        project_root: impl Into<PathBuf>,
    ) -> Result<Self, PipelineError> {
        let project_root = project_root.into();
        let registry = build_registry(&config.tools, &DefaultExecutorFactory::new())?;

        let plan_options = PlanOptions {
            include_rollback: config.planner.include_rollback,
            optimize_for_safety: config.planner.optimize_for_safety,
            optimize_for_time: config.planner.optimize_for_time,
            max_parallelism: config.planner.max_parallelism,
            include_verification: config.planner.include_verification,
        };

        let exec_options = ExecOptions {
            max_retries: config.scheduler.max_retry_attempts,
            enable_parallelism: config.scheduler.enable_parallelism,
            dry_run: false,
            timeout: config.scheduler.run_timeout_ms.map(Duration::from_millis),
        };

        let scheduler = Scheduler::new(Arc::new(registry)).with_retry_policy(
            Duration::from_millis(config.scheduler.retry_base_delay_ms),
            Duration::from_millis(config.scheduler.retry_max_delay_ms),
        );

        let patch_manager = PatchSetManager::new(project_root.clone())
            .with_backup_dir(project_root.join(&config.patches.backup_dir))
            .with_conflict_policy(parse_conflict_policy(&config.patches.conflict_policy));

        Ok(Self {
            planner: GraphPlanner::new(),
            validator: PlanValidator::new(),
            scheduler,
            patch_manager: Arc::new(patch_manager),
            project_root,
            plan_options,
            exec_options,
        })
    }

    /// Override plan options
    pub fn with_plan_options(mut self, options: PlanOptions) -> Self {
        self.plan_options = options;
        self
    }

    /// Override execution options
    pub fn with_exec_options(mut self, options: ExecOptions) -> Self {
        self.exec_options = options;
        self
    }

    /// The patch manager this pipeline registers patch sets with
    pub fn patch_manager(&self) -> Arc<PatchSetManager> {
        self.patch_manager.clone()
    }

    /// Plan, validate, and execute one classified intent.
    pub async fn run(
        &self,
        intent: &ClassifiedIntent,
        context_text: &str,
    ) -> Result<PipelineReport, PipelineError> {
        let graph = self
            .planner
            .generate_plan(intent, context_text, &self.plan_options)?;
        self.run_graph(graph).await
    }

    /// Like `run`, but seeds the plan's edit nodes with explicit edit
    /// payloads. The change-content layer (out of scope here) normally
    /// fills these in; tests and deterministic callers use this entry.
    pub async fn run_with_edits(
        &self,
        intent: &ClassifiedIntent,
        context_text: &str,
        edits: Vec<EditSpec>,
    ) -> Result<PipelineReport, PipelineError> {
        let mut graph = self
            .planner
            .generate_plan(intent, context_text, &self.plan_options)?;
        for node in &mut graph.nodes {
            if node.tool.as_deref() == Some("edit") {
                node.params = ToolParams::Edit {
                    edits: edits.clone(),
                    backup: self.plan_options.include_rollback,
                };
            }
        }
        self.run_graph(graph).await
    }

    /// Validate and execute an already-built graph.
    ///
    /// A graph failing validation never reaches the scheduler.
    pub async fn run_graph(&self, graph: PlanGraph) -> Result<PipelineReport, PipelineError> {
        let validation = self.validator.validate(&graph);
        if !validation.is_valid {
            return Err(PipelineError::Validation {
                issues: validation.issues,
            });
        }

        let ctx = ExecutionContext::new(self.project_root.clone());
        let execution = self
            .scheduler
            .execute(&graph, ctx, self.exec_options.clone())
            .await;

        // Re-register the scheduler's assembled patches through the manager
        // so apply/rollback by ID works and a rollback plan exists.
        let patch_set = match &execution.patch_set {
            Some(assembled) if !assembled.patches.is_empty() => Some(
                self.patch_manager
                    .create_patch_set(
                        assembled.name.clone(),
                        assembled.description.clone(),
                        assembled.patches.clone(),
                        CreateOptions::default(),
                    )
                    .await?,
            ),
            _ => None,
        };

        tracing::info!(
            graph_id = %graph.id,
            success = execution.success,
            patch_set = patch_set.as_ref().map(|p| p.id.clone()).unwrap_or_default(),
            "pipeline run finished"
        );

        Ok(PipelineReport {
            graph,
            validation,
            execution,
            patch_set,
        })
    }
}

fn parse_conflict_policy(raw: &str) -> ConflictPolicy {
    match raw {
        "prefer_ours" => ConflictPolicy::PreferOurs,
        "prefer_theirs" => ConflictPolicy::PreferTheirs,
        "manual" => ConflictPolicy::Manual,
        _ => ConflictPolicy::Abort,
    }
}
