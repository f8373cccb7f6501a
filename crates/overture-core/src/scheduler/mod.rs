//! Execution scheduler
//!
//! The scheduler walks a validated `PlanGraph`:
//! - dependency-level ordering (a node never starts before its dependencies
//!   reach a terminal state)
//! - parallel dispatch of ready nodes, bounded by the graph's parallelism
//! - per-node retry with exponential backoff
//! - fail-fast propagation to dependents, with optional failure-edge routing
//!   to recovery nodes
//! - assembly of every edit node's patches into one `PatchSet`

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use futures_util::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;

use crate::patch::{FilePatch, PatchSet};
use crate::tool::{ExecutionContext, ExecutionResult, ToolRegistry};
use crate::types::{EdgeKind, NodeId, NodeKind, PlanGraph, PlanNode};

const MAX_LOG_TEXT_CHARS: usize = 2_000;
const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}

/// Scheduler-level errors
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Graph is not schedulable: {0}")]
    InvalidGraph(String),
}

/// Node state during one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Not yet ready to execute
    Pending,
    /// Ready to execute (all dependencies reached a usable terminal state)
    Ready,
    /// Currently executing
    Running,
    /// Execution completed successfully
    Completed,
    /// Terminally failed (retry budget exhausted or non-retryable)
    Failed,
    /// Not executed because an upstream node failed, or because its
    /// failure-edge trigger never fired
    Skipped,
}

impl NodeState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Runtime bookkeeping for one plan node
#[derive(Debug, Clone)]
struct RunNode {
    node: PlanNode,
    state: NodeState,
    dependents: Vec<NodeId>,
}

/// Execution state derived from a validated plan graph
struct RunDag {
    nodes: HashMap<NodeId, RunNode>,
    /// Order nodes were planned in, for deterministic batch picking
    order: Vec<NodeId>,
    /// from -> recovery targets wired by failure edges
    failure_routes: HashMap<NodeId, Vec<NodeId>>,
    /// Nodes that only run when one of their failure sources fails
    gated: HashSet<NodeId>,
}

impl RunDag {
    fn from_graph(graph: &PlanGraph) -> Result<Self, ScheduleError> {
        let mut nodes: HashMap<NodeId, RunNode> = HashMap::new();
        let mut order = Vec::with_capacity(graph.nodes.len());
        for node in &graph.nodes {
            order.push(node.id.clone());
            nodes.insert(
                node.id.clone(),
                RunNode {
                    node: node.clone(),
                    state: NodeState::Pending,
                    dependents: Vec::new(),
                },
            );
        }

        for node in &graph.nodes {
            for dep in &node.depends_on {
                let Some(dep_node) = nodes.get_mut(dep) else {
                    return Err(ScheduleError::InvalidGraph(format!(
                        "dependency '{}' not found",
                        dep
                    )));
                };
                dep_node.dependents.push(node.id.clone());
            }
        }

        let mut failure_routes: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut gated: HashSet<NodeId> = HashSet::new();
        for edge in &graph.edges {
            if edge.kind == EdgeKind::Failure {
                failure_routes
                    .entry(edge.from.clone())
                    .or_default()
                    .push(edge.to.clone());
                gated.insert(edge.to.clone());
            }
        }

        Ok(Self {
            nodes,
            order,
            failure_routes,
            gated,
        })
    }

    fn state(&self, id: &NodeId) -> Option<NodeState> {
        self.nodes.get(id).map(|n| n.state)
    }

    fn set_state(&mut self, id: &NodeId, state: NodeState) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.state = state;
        }
    }

    /// Ready nodes in planning order.
    ///
    /// A plain node is ready when every dependency completed. A gated node
    /// (failure-edge target) additionally needs one of its failure sources
    /// to have terminally failed; when every source succeeded it is skipped
    /// instead.
    fn ready_nodes(&mut self) -> Vec<NodeId> {
        // Resolve gated nodes whose trigger can no longer fire.
        let to_skip: Vec<NodeId> = self
            .gated
            .iter()
            .filter(|id| self.state(id) == Some(NodeState::Pending))
            .filter(|id| {
                let sources = self.failure_sources(id);
                !sources.is_empty()
                    && sources.iter().all(|s| {
                        matches!(
                            self.state(s),
                            Some(NodeState::Completed) | Some(NodeState::Skipped)
                        )
                    })
            })
            .cloned()
            .collect();
        for id in to_skip {
            self.set_state(&id, NodeState::Skipped);
        }

        let ready: Vec<NodeId> = self
            .order
            .iter()
            .filter(|id| {
                matches!(
                    self.state(id),
                    Some(NodeState::Pending) | Some(NodeState::Ready)
                )
            })
            .filter(|id| self.dependencies_satisfied(id))
            .filter(|id| !self.gated.contains(*id) || self.failure_triggered(id))
            .cloned()
            .collect();

        for id in &ready {
            if self.state(id) == Some(NodeState::Pending) {
                self.set_state(id, NodeState::Ready);
            }
        }
        ready
    }

    fn dependencies_satisfied(&self, id: &NodeId) -> bool {
        let Some(run_node) = self.nodes.get(id) else {
            return false;
        };
        run_node.node.depends_on.iter().all(|dep| {
            self.nodes
                .get(dep)
                .map(|n| n.state == NodeState::Completed)
                .unwrap_or(false)
        })
    }

    fn failure_sources(&self, target: &NodeId) -> Vec<NodeId> {
        self.failure_routes
            .iter()
            .filter(|(_, targets)| targets.contains(target))
            .map(|(source, _)| source.clone())
            .collect()
    }

    fn failure_triggered(&self, target: &NodeId) -> bool {
        self.failure_sources(target)
            .iter()
            .any(|s| self.state(s) == Some(NodeState::Failed))
    }

    /// Mark a node failed and skip its transitive dependents. Gated nodes
    /// are left alone; their trigger just fired.
    fn mark_failed(&mut self, id: &NodeId) {
        self.set_state(id, NodeState::Failed);
        let mut stack: Vec<NodeId> = self
            .nodes
            .get(id)
            .map(|n| n.dependents.clone())
            .unwrap_or_default();
        while let Some(dependent) = stack.pop() {
            if self.gated.contains(&dependent) {
                continue;
            }
            if let Some(run_node) = self.nodes.get_mut(&dependent) {
                if !run_node.state.is_terminal() {
                    run_node.state = NodeState::Skipped;
                    stack.extend(run_node.dependents.clone());
                }
            }
        }
    }

    fn all_terminal(&self) -> bool {
        self.nodes.values().all(|n| n.state.is_terminal())
    }

    fn failed_nodes(&self) -> Vec<&NodeId> {
        self.order
            .iter()
            .filter(|id| self.state(id) == Some(NodeState::Failed))
            .collect()
    }

    fn skipped_nodes(&self) -> Vec<&NodeId> {
        self.order
            .iter()
            .filter(|id| self.state(id) == Some(NodeState::Skipped))
            .collect()
    }
}

/// Options for one scheduler run
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Retry budget per node, excluding the initial attempt
    pub max_retries: u32,
    /// When false, nodes run strictly one at a time
    pub enable_parallelism: bool,
    /// Executors must not perform irreversible side effects
    pub dry_run: bool,
    /// Wall-clock bound for the whole run
    pub timeout: Option<Duration>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRY_ATTEMPTS,
            enable_parallelism: true,
            dry_run: false,
            timeout: None,
        }
    }
}

/// Outcome of one scheduler run
#[derive(Debug)]
pub struct ExecutionReport {
    /// True iff every node required for the plan's exit points completed
    pub success: bool,
    /// Terminal result of every executed node
    pub results: HashMap<NodeId, ExecutionResult>,
    /// Failure descriptions, in planning order
    pub errors: Vec<String>,
    /// Non-fatal notes (skipped nodes, retries exhausted, dry-run notices)
    pub warnings: Vec<String>,
    /// Patches produced by edit nodes, assembled into one reviewable set
    pub patch_set: Option<PatchSet>,
}

/// The scheduler - drives tool executors over a validated plan graph
pub struct Scheduler {
    registry: Arc<ToolRegistry>,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
}

impl Scheduler {
    /// Create a scheduler over a registry
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
        }
    }

    /// Configure backoff for retryable failures.
    ///
    /// Backoff is exponential: base delay doubling per retry, capped at the
    /// max delay.
    pub fn with_retry_policy(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.retry_base_delay = base_delay;
        self.retry_max_delay = max_delay.max(base_delay);
        self
    }

    /// Execute a validated plan graph.
    ///
    /// The graph must have passed `PlanValidator::validate`; structural
    /// defects surface here as `InvalidGraph` errors in the report rather
    /// than panics, but diagnostics are the validator's job.
    pub async fn execute(
        &self,
        graph: &PlanGraph,
        ctx: ExecutionContext,
        options: ExecOptions,
    ) -> ExecutionReport {
        let ctx = ctx.with_dry_run(options.dry_run);
        let mut dag = match RunDag::from_graph(graph) {
            Ok(dag) => dag,
            Err(err) => {
                return ExecutionReport {
                    success: false,
                    results: HashMap::new(),
                    errors: vec![err.to_string()],
                    warnings: Vec::new(),
                    patch_set: None,
                }
            }
        };

        let max_parallel = if options.enable_parallelism {
            graph.max_parallelism.max(1)
        } else {
            1
        };

        tracing::info!(
            graph_id = %graph.id,
            nodes = graph.node_count(),
            max_parallel,
            dry_run = options.dry_run,
            "plan execution started"
        );

        match options.timeout {
            Some(limit) => {
                let run = self.run_loop(graph, &mut dag, &ctx, &options, max_parallel);
                tokio::pin!(run);
                tokio::select! {
                    report = &mut run => report,
                    _ = sleep(limit) => {
                        ctx.cancellation_token.cancel();
                        tracing::error!(graph_id = %graph.id, timeout_ms = limit.as_millis() as u64, "plan execution timed out");
                        let results = ctx.previous_results.read().await.snapshot();
                        ExecutionReport {
                            success: false,
                            results,
                            errors: vec![ScheduleError::Timeout(limit).to_string()],
                            warnings: vec!["in-flight node executions were abandoned".to_string()],
                            patch_set: None,
                        }
                    }
                }
            }
            None => self.run_loop(graph, &mut dag, &ctx, &options, max_parallel).await,
        }
    }

    async fn run_loop(
        &self,
        graph: &PlanGraph,
        dag: &mut RunDag,
        ctx: &ExecutionContext,
        options: &ExecOptions,
        max_parallel: usize,
    ) -> ExecutionReport {
        let mut errors: Vec<String> = Vec::new();

        loop {
            let ready = dag.ready_nodes();
            if ready.is_empty() {
                break;
            }

            // Internal nodes (checkpoint, verification) are handled by the
            // scheduler itself, before tool dispatch, so their results are
            // visible to the batch that follows.
            let internal: Vec<NodeId> = ready
                .iter()
                .filter(|id| self.is_internal(dag, id))
                .cloned()
                .collect();
            if !internal.is_empty() {
                for id in internal {
                    self.run_internal_node(dag, &id, ctx).await;
                }
                continue;
            }

            let batch = pick_batch(dag, ready, max_parallel);
            let mut in_flight = FuturesUnordered::new();
            for id in batch {
                let Some(node) = dag.nodes.get(&id).map(|n| n.node.clone()) else {
                    continue;
                };
                dag.set_state(&id, NodeState::Running);
                tracing::info!(
                    graph_id = %graph.id,
                    node_id = %id,
                    tool = node.tool.as_deref().unwrap_or("-"),
                    "node execution started"
                );
                let task_ctx = ctx.clone();
                let max_retries = options.max_retries;
                in_flight.push(async move {
                    let result = self
                        .execute_node_with_retry(&node, &task_ctx, max_retries)
                        .await;
                    (id, node, result)
                });
            }

            while let Some((id, node, result)) = in_flight.next().await {
                if result.success {
                    tracing::info!(
                        graph_id = %graph.id,
                        node_id = %id,
                        elapsed_ms = result.execution_time.as_millis() as u64,
                        "node execution completed"
                    );
                    dag.set_state(&id, NodeState::Completed);
                } else {
                    let message = result.error.clone().unwrap_or_else(|| "unknown error".to_string());
                    tracing::error!(
                        graph_id = %graph.id,
                        node_id = %id,
                        tool = node.tool.as_deref().unwrap_or("-"),
                        error = %truncate_for_log(&message, MAX_LOG_TEXT_CHARS),
                        "node execution failed"
                    );
                    errors.push(format!("node '{}' failed: {}", id, message));
                    dag.mark_failed(&id);
                }
                let mut results = ctx.previous_results.write().await;
                if !results.insert(id.clone(), result) {
                    tracing::warn!(node_id = %id, "duplicate result write ignored");
                }
            }
        }

        self.finish(graph, dag, ctx, options, errors).await
    }

    fn is_internal(&self, dag: &RunDag, id: &NodeId) -> bool {
        dag.nodes
            .get(id)
            .map(|n| n.node.kind != NodeKind::Tool || n.node.tool.is_none())
            .unwrap_or(false)
    }

    /// Checkpoint and verification nodes don't dispatch to the registry.
    /// A checkpoint records a marker result carrying its position; a
    /// verification node confirms every dependency produced a successful
    /// result.
    async fn run_internal_node(&self, dag: &mut RunDag, id: &NodeId, ctx: &ExecutionContext) {
        let Some(run_node) = dag.nodes.get(id) else {
            return;
        };
        let node = run_node.node.clone();
        let result = match node.kind {
            NodeKind::Checkpoint => ExecutionResult::ok_empty().with_rollback_data(
                serde_json::json!({ "checkpoint": node.id.as_str() }),
            ),
            NodeKind::Verification => {
                let results = ctx.previous_results.read().await;
                let failed_dep = node
                    .depends_on
                    .iter()
                    .find(|dep| !results.get(dep).map(|r| r.success).unwrap_or(false));
                match failed_dep {
                    Some(dep) => {
                        ExecutionResult::failed(format!("dependency '{}' did not succeed", dep))
                    }
                    None => ExecutionResult::ok_empty(),
                }
            }
            // Tool nodes with no tool name cannot be dispatched.
            NodeKind::Tool => ExecutionResult::failed(format!(
                "node '{}' has no tool to dispatch",
                node.id
            )),
        };

        if result.success {
            dag.set_state(id, NodeState::Completed);
        } else {
            dag.mark_failed(id);
        }
        let mut results = ctx.previous_results.write().await;
        results.insert(id.clone(), result);
    }

    async fn execute_node_with_retry(
        &self,
        node: &PlanNode,
        ctx: &ExecutionContext,
        max_retries: u32,
    ) -> ExecutionResult {
        let Some(tool) = node.tool.as_deref() else {
            return ExecutionResult::failed(format!("node '{}' has no tool", node.id));
        };
        let executor = match self.registry.resolve(tool) {
            Ok(executor) => executor,
            // Unknown tools fail immediately and are never retryable.
            Err(err) => return ExecutionResult::failed(err.to_string()),
        };

        let mut retries_used: u32 = 0;
        loop {
            let started = Instant::now();
            let result = executor.execute(node, ctx).await;
            let result = result.with_execution_time(started.elapsed());

            if result.success
                || !node.retryable
                || !executor.can_retry(&result)
                || retries_used >= max_retries
            {
                let mut result = result;
                if !result.success && retries_used > 0 {
                    let attempts = retries_used.saturating_add(1);
                    result.error = result.error.map(|e| {
                        format!("{} (retry exhausted after {} attempt(s))", e, attempts)
                    });
                }
                return result;
            }

            let delay = self.compute_retry_backoff(retries_used);
            retries_used = retries_used.saturating_add(1);
            tracing::warn!(
                node_id = %node.id,
                tool,
                retry_attempt = retries_used,
                retry_in_ms = delay.as_millis() as u64,
                error = %truncate_for_log(result.error.as_deref().unwrap_or(""), MAX_LOG_TEXT_CHARS),
                "retrying node after retryable failure"
            );
            if !delay.is_zero() {
                sleep(delay).await;
            }
        }
    }

    fn compute_retry_backoff(&self, retries_used: u32) -> Duration {
        let base_ms = self.retry_base_delay.as_millis();
        if base_ms == 0 {
            return Duration::from_millis(0);
        }
        let max_ms = self.retry_max_delay.as_millis().max(base_ms);
        let shift = retries_used.min(20);
        let multiplier = 1u128 << shift;
        let backoff_ms = base_ms.saturating_mul(multiplier).min(max_ms);
        Duration::from_millis(u64::try_from(backoff_ms).unwrap_or(u64::MAX))
    }

    async fn finish(
        &self,
        graph: &PlanGraph,
        dag: &RunDag,
        ctx: &ExecutionContext,
        options: &ExecOptions,
        errors: Vec<String>,
    ) -> ExecutionReport {
        let mut warnings: Vec<String> = Vec::new();
        for id in dag.skipped_nodes() {
            warnings.push(format!("node '{}' skipped", id));
        }
        if options.dry_run {
            warnings.push("dry run: no irreversible side effects were performed".to_string());
        }

        // Success means every exit point completed; gated recovery nodes
        // that never triggered count as satisfied.
        let success = dag.all_terminal()
            && graph.exit_points.iter().all(|id| match dag.state(id) {
                Some(NodeState::Completed) => true,
                Some(NodeState::Skipped) => dag.gated.contains(id),
                _ => false,
            })
            && dag.failed_nodes().is_empty();

        let results = ctx.previous_results.read().await.snapshot();
        let patch_set = assemble_patch_set(graph, &results);

        tracing::info!(
            graph_id = %graph.id,
            success,
            executed = results.len(),
            failed = dag.failed_nodes().len(),
            skipped = dag.skipped_nodes().len(),
            "plan execution finished"
        );

        ExecutionReport {
            success,
            results,
            errors,
            warnings,
            patch_set,
        }
    }
}

/// Pick up to `max_parallel` ready nodes, never co-scheduling two edit
/// nodes whose target files overlap. The planner should not generate such
/// graphs, but the scheduler defends against them anyway.
fn pick_batch(dag: &RunDag, ready: Vec<NodeId>, max_parallel: usize) -> Vec<NodeId> {
    let mut batch: Vec<NodeId> = Vec::new();
    let mut claimed_files: HashSet<String> = HashSet::new();
    for id in ready {
        if batch.len() >= max_parallel {
            break;
        }
        let Some(run_node) = dag.nodes.get(&id) else {
            continue;
        };
        let targets: Vec<String> = run_node
            .node
            .params
            .edit_targets()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        if targets.iter().any(|t| claimed_files.contains(t)) {
            // Deferred to a later round; mutual exclusion per file path.
            continue;
        }
        claimed_files.extend(targets);
        batch.push(id);
    }
    batch
}

/// Collect the patches from every edit node's output, in planning order,
/// into one reviewable patch set.
fn assemble_patch_set(
    graph: &PlanGraph,
    results: &HashMap<NodeId, ExecutionResult>,
) -> Option<PatchSet> {
    let mut patches: Vec<FilePatch> = Vec::new();
    for node in &graph.nodes {
        if let Some(result) = results.get(&node.id) {
            if let Some(data) = &result.data {
                patches.extend(data.patches().iter().cloned());
            }
        }
    }
    if patches.is_empty() {
        return None;
    }
    Some(PatchSet::assemble(
        format!("plan-{}", graph.id),
        format!("changes produced by {} plan", graph.intent_label),
        patches,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolData, ToolExecutor};
    use crate::types::{EditSpec, IntentLabel, PlanEdge, ToolParams};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    struct OkExecutor {
        tool: &'static str,
    }

    #[async_trait]
    impl ToolExecutor for OkExecutor {
        fn name(&self) -> &str {
            self.tool
        }

        fn description(&self) -> &str {
            "always succeeds"
        }

        async fn execute(&self, _node: &PlanNode, _ctx: &ExecutionContext) -> ExecutionResult {
            ExecutionResult::ok_empty()
        }
    }

    struct FailExecutor {
        tool: &'static str,
        retryable: bool,
    }

    #[async_trait]
    impl ToolExecutor for FailExecutor {
        fn name(&self) -> &str {
            self.tool
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _node: &PlanNode, _ctx: &ExecutionContext) -> ExecutionResult {
            if self.retryable {
                ExecutionResult::failed_retryable("transient failure")
            } else {
                ExecutionResult::failed("hard failure")
            }
        }
    }

    struct FlakyExecutor {
        tool: &'static str,
        attempts: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl ToolExecutor for FlakyExecutor {
        fn name(&self) -> &str {
            self.tool
        }

        fn description(&self) -> &str {
            "fails a few times, then succeeds"
        }

        async fn execute(&self, _node: &PlanNode, _ctx: &ExecutionContext) -> ExecutionResult {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_times {
                ExecutionResult::failed_retryable("not yet")
            } else {
                ExecutionResult::ok_empty()
            }
        }
    }

    /// Tracks peak concurrency across all executions of this tool.
    struct ConcurrencyProbe {
        tool: &'static str,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ToolExecutor for ConcurrencyProbe {
        fn name(&self) -> &str {
            self.tool
        }

        fn description(&self) -> &str {
            "records concurrent executions"
        }

        async fn execute(&self, _node: &PlanNode, _ctx: &ExecutionContext) -> ExecutionResult {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            ExecutionResult::ok_empty()
        }
    }

    struct PatchingExecutor;

    #[async_trait]
    impl ToolExecutor for PatchingExecutor {
        fn name(&self) -> &str {
            "edit"
        }

        fn description(&self) -> &str {
            "emits a patch"
        }

        async fn execute(&self, node: &PlanNode, _ctx: &ExecutionContext) -> ExecutionResult {
            let patches = node
                .params
                .edit_targets()
                .iter()
                .map(|path| {
                    FilePatch::from_contents(*path, "before\n", "after\n", "test edit")
                })
                .collect();
            ExecutionResult::ok(ToolData::Edit { patches })
        }
    }

    fn graph_of(nodes: Vec<PlanNode>, edges: Vec<PlanEdge>, max_parallelism: usize) -> PlanGraph {
        let entry = nodes[0].id.clone();
        PlanGraph::new(IntentLabel::Edit, nodes, edges, entry, max_parallelism)
    }

    fn registry_with(executors: Vec<Arc<dyn ToolExecutor>>) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        for executor in executors {
            registry.register(executor);
        }
        Arc::new(registry)
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(std::env::temp_dir())
    }

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        let scheduler = Scheduler::new(Arc::new(ToolRegistry::new())).with_retry_policy(
            Duration::from_millis(200),
            Duration::from_secs(5),
        );
        assert_eq!(scheduler.compute_retry_backoff(0), Duration::from_millis(200));
        assert_eq!(scheduler.compute_retry_backoff(1), Duration::from_millis(400));
        assert_eq!(scheduler.compute_retry_backoff(2), Duration::from_millis(800));
        // Far past the cap, the delay stays pinned at the max.
        assert_eq!(scheduler.compute_retry_backoff(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_linear_graph_executes_in_dependency_order() {
        let registry = registry_with(vec![
            Arc::new(OkExecutor { tool: "search" }),
            Arc::new(OkExecutor { tool: "read" }),
        ]);
        let graph = graph_of(
            vec![
                PlanNode::tool("a", "search", "search"),
                PlanNode::tool("b", "read", "read").with_depends_on(vec!["a".into()]),
            ],
            vec![PlanEdge::success("a", "b")],
            1,
        );

        let report = Scheduler::new(registry)
            .execute(&graph, ctx(), ExecOptions::default())
            .await;

        assert!(report.success, "errors: {:?}", report.errors);
        assert_eq!(report.results.len(), 2);
        assert!(report.results.get(&"b".into()).expect("b").success);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_immediately() {
        let registry = registry_with(vec![]);
        let graph = graph_of(vec![PlanNode::tool("a", "mystery", "profiler")], vec![], 1);

        let report = Scheduler::new(registry)
            .execute(&graph, ctx(), ExecOptions::default())
            .await;

        assert!(!report.success);
        assert!(report.errors[0].contains("unknown tool 'profiler'"));
        let result = report.results.get(&"a".into()).expect("result");
        assert!(!result.retryable);
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried_until_success() {
        let registry = registry_with(vec![Arc::new(FlakyExecutor {
            tool: "search",
            attempts: AtomicU32::new(0),
            fail_times: 2,
        })]);
        let graph = graph_of(
            vec![PlanNode::tool("a", "search", "search").with_retryable(true)],
            vec![],
            1,
        );

        let scheduler = Scheduler::new(registry)
            .with_retry_policy(Duration::from_millis(1), Duration::from_millis(4));
        let report = scheduler
            .execute(&graph, ctx(), ExecOptions::default())
            .await;

        assert!(report.success, "errors: {:?}", report.errors);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_is_terminal() {
        let registry = registry_with(vec![Arc::new(FailExecutor {
            tool: "search",
            retryable: true,
        })]);
        let graph = graph_of(
            vec![PlanNode::tool("a", "search", "search").with_retryable(true)],
            vec![],
            1,
        );

        let scheduler = Scheduler::new(registry)
            .with_retry_policy(Duration::from_millis(1), Duration::from_millis(2));
        let report = scheduler
            .execute(
                &graph,
                ctx(),
                ExecOptions {
                    max_retries: 2,
                    ..ExecOptions::default()
                },
            )
            .await;

        assert!(!report.success);
        assert!(report.errors[0].contains("retry exhausted"));
    }

    #[tokio::test]
    async fn test_failed_node_skips_dependents_but_not_independent_branches() {
        let registry = registry_with(vec![
            Arc::new(FailExecutor {
                tool: "edit",
                retryable: false,
            }),
            Arc::new(OkExecutor { tool: "search" }),
            Arc::new(OkExecutor { tool: "read" }),
        ]);
        let graph = graph_of(
            vec![
                PlanNode::tool("root", "search", "search"),
                PlanNode::tool("bad", "edit", "edit").with_depends_on(vec!["root".into()]),
                PlanNode::tool("child", "read", "read").with_depends_on(vec!["bad".into()]),
                PlanNode::tool("other", "read", "read").with_depends_on(vec!["root".into()]),
            ],
            vec![
                PlanEdge::success("root", "bad"),
                PlanEdge::success("bad", "child"),
                PlanEdge::success("root", "other"),
            ],
            2,
        );

        let report = Scheduler::new(registry)
            .execute(&graph, ctx(), ExecOptions::default())
            .await;

        assert!(!report.success);
        assert!(report.results.get(&"other".into()).expect("other").success);
        assert!(report.results.get(&"child".into()).is_none());
        assert!(report.warnings.iter().any(|w| w.contains("child")));
    }

    #[tokio::test]
    async fn test_failure_edge_routes_to_recovery_node() {
        let registry = registry_with(vec![
            Arc::new(FailExecutor {
                tool: "edit",
                retryable: false,
            }),
            Arc::new(OkExecutor { tool: "read" }),
        ]);
        let mut nodes = vec![
            PlanNode::tool("work", "edit", "edit"),
            PlanNode::tool("next", "read", "read").with_depends_on(vec!["work".into()]),
            PlanNode::tool("cleanup", "read", "read"),
        ];
        nodes[2].description = "restore state after failed edit".to_string();
        let graph = graph_of(
            nodes,
            vec![
                PlanEdge::success("work", "next"),
                PlanEdge::failure("work", "cleanup"),
            ],
            1,
        );

        let report = Scheduler::new(registry)
            .execute(&graph, ctx(), ExecOptions::default())
            .await;

        // The plain dependent is skipped, the recovery node runs.
        assert!(!report.success);
        assert!(report.results.get(&"next".into()).is_none());
        assert!(report.results.get(&"cleanup".into()).expect("cleanup").success);
    }

    #[tokio::test]
    async fn test_recovery_node_is_skipped_when_nothing_fails() {
        let registry = registry_with(vec![Arc::new(OkExecutor { tool: "read" })]);
        let graph = graph_of(
            vec![
                PlanNode::tool("work", "read", "read"),
                PlanNode::tool("cleanup", "read", "read"),
            ],
            vec![PlanEdge::failure("work", "cleanup")],
            1,
        );

        let report = Scheduler::new(registry)
            .execute(&graph, ctx(), ExecOptions::default())
            .await;

        assert!(report.success, "errors: {:?}", report.errors);
        assert!(report.results.get(&"cleanup".into()).is_none());
    }

    #[tokio::test]
    async fn test_parallelism_bound_is_respected() {
        let probe = Arc::new(ConcurrencyProbe {
            tool: "search",
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let registry = registry_with(vec![probe.clone() as Arc<dyn ToolExecutor>]);
        let nodes: Vec<PlanNode> = (0..4)
            .map(|i| PlanNode::tool(format!("n{}", i), "search", "search"))
            .collect();
        let graph = graph_of(nodes, vec![], 2);

        let report = Scheduler::new(registry)
            .execute(&graph, ctx(), ExecOptions::default())
            .await;

        assert!(report.success);
        assert!(probe.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_same_file_edit_nodes_are_not_co_scheduled() {
        let probe = Arc::new(ConcurrencyProbe {
            tool: "edit",
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let registry = registry_with(vec![probe.clone() as Arc<dyn ToolExecutor>]);
        let params = ToolParams::Edit {
            edits: vec![EditSpec {
                path: "src/shared.rs".to_string(),
                new_content: String::new(),
            }],
            backup: false,
        };
        let graph = graph_of(
            vec![
                PlanNode::tool("e1", "edit", "edit").with_params(params.clone()),
                PlanNode::tool("e2", "edit", "edit").with_params(params),
            ],
            vec![],
            2,
        );

        let report = Scheduler::new(registry)
            .execute(&graph, ctx(), ExecOptions::default())
            .await;

        assert!(report.success);
        assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_aborts_run_with_structured_error() {
        struct SlowExecutor;

        #[async_trait]
        impl ToolExecutor for SlowExecutor {
            fn name(&self) -> &str {
                "search"
            }

            fn description(&self) -> &str {
                "sleeps"
            }

            async fn execute(&self, _node: &PlanNode, _ctx: &ExecutionContext) -> ExecutionResult {
                sleep(Duration::from_secs(30)).await;
                ExecutionResult::ok_empty()
            }
        }

        let registry = registry_with(vec![Arc::new(SlowExecutor)]);
        let graph = graph_of(vec![PlanNode::tool("a", "search", "search")], vec![], 1);

        let report = Scheduler::new(registry)
            .execute(
                &graph,
                ctx(),
                ExecOptions {
                    timeout: Some(Duration::from_millis(50)),
                    ..ExecOptions::default()
                },
            )
            .await;

        assert!(!report.success);
        assert!(report.errors[0].contains("timed out"));
    }

    #[tokio::test]
    async fn test_edit_output_is_assembled_into_patch_set() {
        let registry = registry_with(vec![Arc::new(PatchingExecutor)]);
        let graph = graph_of(
            vec![PlanNode::tool("e1", "edit", "edit").with_params(ToolParams::Edit {
                edits: vec![EditSpec {
                    path: "src/a.rs".to_string(),
                    new_content: "after\n".to_string(),
                }],
                backup: false,
            })],
            vec![],
            1,
        );

        let report = Scheduler::new(registry)
            .execute(&graph, ctx(), ExecOptions::default())
            .await;

        assert!(report.success);
        let patch_set = report.patch_set.expect("patch set");
        assert_eq!(patch_set.metadata.files_affected, 1);
        assert_eq!(patch_set.patches[0].file_path, "src/a.rs");
    }

    #[tokio::test]
    async fn test_previous_results_visible_to_dependents() {
        struct ReadbackExecutor;

        #[async_trait]
        impl ToolExecutor for ReadbackExecutor {
            fn name(&self) -> &str {
                "read"
            }

            fn description(&self) -> &str {
                "asserts upstream results are visible"
            }

            async fn execute(&self, node: &PlanNode, ctx: &ExecutionContext) -> ExecutionResult {
                let results = ctx.previous_results.read().await;
                for dep in &node.depends_on {
                    if results.get(dep).is_none() {
                        return ExecutionResult::failed(format!(
                            "upstream result '{}' missing",
                            dep
                        ));
                    }
                }
                ExecutionResult::ok_empty()
            }
        }

        let registry = registry_with(vec![
            Arc::new(OkExecutor { tool: "search" }),
            Arc::new(ReadbackExecutor),
        ]);
        let graph = graph_of(
            vec![
                PlanNode::tool("a", "search", "search"),
                PlanNode::tool("b", "read", "read").with_depends_on(vec!["a".into()]),
            ],
            vec![PlanEdge::success("a", "b")],
            1,
        );

        let report = Scheduler::new(registry)
            .execute(&graph, ctx(), ExecOptions::default())
            .await;

        assert!(report.success, "errors: {:?}", report.errors);
    }

    #[tokio::test]
    async fn test_verification_node_checks_dependency_results() {
        let registry = registry_with(vec![Arc::new(OkExecutor { tool: "read" })]);
        let graph = graph_of(
            vec![
                PlanNode::tool("a", "read", "read"),
                PlanNode::verification("v", "verify").with_depends_on(vec!["a".into()]),
            ],
            vec![PlanEdge::success("a", "v")],
            1,
        );

        let report = Scheduler::new(registry)
            .execute(&graph, ctx(), ExecOptions::default())
            .await;

        assert!(report.success);
        assert!(report.results.get(&"v".into()).expect("verify").success);
    }
}
