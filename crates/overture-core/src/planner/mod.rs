//! Plan graph builder
//!
//! The planner compiles a classified intent into a `PlanGraph`:
//! - selects a stage template for the intent label
//! - expands stages into nodes wired by dependencies in stage order
//! - derives per-node time estimates from the tool and complexity tier
//! - computes the graph's risk assessment and parallelism bound
//!
//! The planner does NOT handle:
//! - intent classification (consumed read-only)
//! - execution ordering at runtime (scheduler concern)
//! - patch application (patch manager concern)

use thiserror::Error;

use crate::types::{
    ClassifiedIntent, Complexity, IntentLabel, NodeId, PlanEdge, PlanGraph, PlanNode,
    RiskAssessment, RiskLevel, ToolParams,
};

/// Planner errors
///
/// Unknown intent labels are NOT an error: they fall back to a generic
/// read -> edit template so the pipeline degrades gracefully.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Planning produced an empty template for intent '{0}'")]
    EmptyTemplate(String),

    #[error("Internal planning error: {0}")]
    Internal(String),
}

/// Options controlling plan generation
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Record rollback points and plan a checkpoint before the first edit
    pub include_rollback: bool,
    /// Serialize execution and route edit failures to a recovery node
    pub optimize_for_safety: bool,
    /// Prefer wider parallelism over conservative ordering
    pub optimize_for_time: bool,
    /// Cap on concurrent nodes; defaults to the widest dependency level
    pub max_parallelism: Option<usize>,
    /// Append verification nodes after the terminal work nodes
    pub include_verification: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            include_rollback: true,
            optimize_for_safety: false,
            optimize_for_time: false,
            max_parallelism: None,
            include_verification: true,
        }
    }
}

/// Per-tool base estimate in minutes, before the complexity multiplier
fn base_minutes(tool: &str) -> u32 {
    match tool {
        "search" => 2,
        "read" => 3,
        "edit" => 10,
        "typecheck" => 5,
        "format" => 2,
        "test_runner" => 8,
        _ => 5,
    }
}

/// Per-tool risk tier, before intent-level adjustments
fn base_risk(tool: &str) -> RiskLevel {
    match tool {
        "edit" => RiskLevel::Medium,
        "search" | "read" | "typecheck" | "format" => RiskLevel::Low,
        "test_runner" => RiskLevel::Low,
        _ => RiskLevel::Medium,
    }
}

/// Whether a tool's work can be redone safely after a transient failure
fn tool_retryable(tool: &str) -> bool {
    !matches!(tool, "edit")
}

/// Stage template for an intent label, in dependency order
fn stage_template(label: IntentLabel) -> Vec<&'static str> {
    match label {
        IntentLabel::Refactor => vec!["search", "read", "edit", "typecheck", "format"],
        IntentLabel::Edit => vec!["read", "edit", "typecheck"],
        IntentLabel::TestGen => vec!["search", "read", "edit", "test_runner"],
        IntentLabel::Migration => vec!["search", "read", "edit", "typecheck", "test_runner"],
        IntentLabel::Optimize => vec!["search", "read", "edit", "test_runner"],
        IntentLabel::Debug => vec!["search", "read", "typecheck", "edit", "test_runner"],
        IntentLabel::Analyze => vec!["search", "read"],
        IntentLabel::DocGen => vec!["read", "edit", "format"],
        // Graceful fallback: never fail planning on an unknown label.
        IntentLabel::Unknown => vec!["read", "edit"],
    }
}

/// The plan graph builder
pub struct GraphPlanner;

impl GraphPlanner {
    /// Create a new planner
    pub fn new() -> Self {
        Self
    }

    /// Compile a classified intent into a plan graph.
    ///
    /// The free-text context is carried into node descriptions so executors
    /// and reviewers see what the run is about; it does not change the
    /// template selection.
    pub fn generate_plan(
        &self,
        intent: &ClassifiedIntent,
        context_text: &str,
        options: &PlanOptions,
    ) -> Result<PlanGraph, PlanError> {
        let stages = stage_template(intent.label);
        if stages.is_empty() {
            return Err(PlanError::EmptyTemplate(intent.label.to_string()));
        }

        let multiplier = intent.complexity.time_multiplier();
        let mut nodes: Vec<PlanNode> = Vec::new();
        let mut edges: Vec<PlanEdge> = Vec::new();

        // Expand the template into one node per stage, wired linearly.
        let mut seq = 0usize;
        let mut previous: Vec<NodeId> = Vec::new();
        for stage in &stages {
            seq += 1;
            let id = NodeId::new(format!("{}-{}", stage, seq));
            let mut node = PlanNode::tool(id.clone(), *stage, *stage)
                .with_description(describe_stage(stage, intent, context_text))
                .with_estimated_minutes(base_minutes(stage) * multiplier)
                .with_risk(stage_risk(stage, intent))
                .with_retryable(tool_retryable(stage))
                .with_depends_on(previous.clone());
            if node.risk >= RiskLevel::High {
                node.description
                    .push_str(" (high risk: review before applying)");
            }
            for prev in &previous {
                edges.push(PlanEdge::success(prev.clone(), id.clone()));
            }
            previous = vec![id];
            nodes.push(node);
        }

        // Required tools the template does not already cover become extra
        // nodes fanned out after the terminal work stage. They are mutually
        // independent, which is where parallelism width comes from.
        let covered: Vec<&str> = stages.clone();
        let extra_tools: Vec<&String> = intent
            .required_tools
            .iter()
            .filter(|t| !covered.contains(&t.as_str()))
            .collect();
        if !extra_tools.is_empty() {
            let anchor = previous.clone();
            let mut fanned: Vec<NodeId> = Vec::new();
            for tool in extra_tools {
                seq += 1;
                let id = NodeId::new(format!("{}-{}", tool, seq));
                nodes.push(
                    PlanNode::tool(id.clone(), tool.clone(), tool.clone())
                        .with_description(format!("{} pass requested by the classifier", tool))
                        .with_params(ToolParams::Custom {
                            name: tool.clone(),
                            params: serde_json::Value::Null,
                        })
                        .with_estimated_minutes(base_minutes(tool) * multiplier)
                        .with_risk(base_risk(tool))
                        .with_retryable(tool_retryable(tool))
                        .with_depends_on(anchor.clone()),
                );
                for prev in &anchor {
                    edges.push(PlanEdge::success(prev.clone(), id.clone()));
                }
                fanned.push(id);
            }
            previous = fanned;
        }

        // Checkpoint before the first edit so there is a safe point to roll
        // back to; the edit node picks up the extra dependency.
        if options.include_rollback {
            if let Some(edit_pos) = nodes.iter().position(|n| n.tool.as_deref() == Some("edit")) {
                seq += 1;
                let checkpoint_id = NodeId::new(format!("checkpoint-{}", seq));
                let edit_id = nodes[edit_pos].id.clone();
                let checkpoint = PlanNode::checkpoint(checkpoint_id.clone(), "pre-edit checkpoint")
                    .with_description("capture restorable state before irreversible edits")
                    .with_depends_on(nodes[edit_pos].depends_on.clone())
                    .with_estimated_minutes(multiplier);
                for dep in &checkpoint.depends_on {
                    edges.push(PlanEdge::success(dep.clone(), checkpoint_id.clone()));
                }
                edges.push(PlanEdge::success(checkpoint_id.clone(), edit_id.clone()));
                nodes[edit_pos].depends_on.push(checkpoint_id.clone());
                nodes.insert(edit_pos, checkpoint);
            }
        }

        // Verification nodes are dependents of the terminal work nodes.
        if options.include_verification {
            seq += 1;
            let id = NodeId::new(format!("verify-{}", seq));
            nodes.push(
                PlanNode::verification(id.clone(), "verify outcome")
                    .with_description("confirm the produced changes satisfy the request")
                    .with_estimated_minutes(3 * multiplier)
                    .with_depends_on(previous.clone()),
            );
            for prev in &previous {
                edges.push(PlanEdge::success(prev.clone(), id.clone()));
            }
        }

        // Safety routing: edit failures branch to a recovery node that
        // restores checkpointed state instead of plain fail-fast.
        if options.optimize_for_safety && options.include_rollback {
            let edit_ids: Vec<NodeId> = nodes
                .iter()
                .filter(|n| n.tool.as_deref() == Some("edit"))
                .map(|n| n.id.clone())
                .collect();
            if !edit_ids.is_empty() {
                seq += 1;
                let recovery_id = NodeId::new(format!("recover-{}", seq));
                nodes.push(
                    PlanNode::checkpoint(recovery_id.clone(), "restore checkpoint")
                        .with_description("restore pre-edit state after a failed edit")
                        .with_estimated_minutes(multiplier),
                );
                for edit_id in edit_ids {
                    edges.push(PlanEdge::failure(edit_id, recovery_id.clone()));
                }
            }
        }

        let entry_point = nodes
            .first()
            .map(|n| n.id.clone())
            .ok_or_else(|| PlanError::Internal("template expanded to zero nodes".to_string()))?;

        let max_parallelism = self.compute_max_parallelism(&nodes, options);
        let risk = self.assess_risk(&nodes, intent, options);

        let graph = PlanGraph::new(intent.label, nodes, edges, entry_point, max_parallelism)
            .with_risk(risk);
        tracing::debug!(
            graph_id = %graph.id,
            intent = %intent.label,
            nodes = graph.node_count(),
            total_minutes = graph.estimated_total_minutes,
            max_parallelism = graph.max_parallelism,
            "plan graph generated"
        );
        Ok(graph)
    }

    /// Widest dependency level, capped by options and the node count.
    fn compute_max_parallelism(&self, nodes: &[PlanNode], options: &PlanOptions) -> usize {
        let widest = widest_level(nodes).max(1);
        let mut parallelism = if options.optimize_for_safety {
            1
        } else {
            widest
        };
        if let Some(cap) = options.max_parallelism {
            parallelism = parallelism.min(cap.max(1));
        }
        parallelism.clamp(1, nodes.len().max(1))
    }

    fn assess_risk(
        &self,
        nodes: &[PlanNode],
        intent: &ClassifiedIntent,
        options: &PlanOptions,
    ) -> RiskAssessment {
        let node_risk = nodes
            .iter()
            .map(|n| n.risk)
            .max()
            .unwrap_or(RiskLevel::Low);
        let mut overall = intent.risk.max(node_risk);
        if intent.label == IntentLabel::Migration {
            overall = overall.max(match intent.complexity {
                Complexity::High => RiskLevel::High,
                _ => RiskLevel::Medium,
            });
        }

        let rollback_points = if options.include_rollback {
            nodes
                .iter()
                .filter(|n| n.tool.as_deref() == Some("edit"))
                .map(|n| n.id.clone())
                .collect()
        } else {
            Vec::new()
        };

        RiskAssessment {
            overall,
            critical_path: critical_path(nodes),
            rollback_points,
        }
    }
}

impl Default for GraphPlanner {
    fn default() -> Self {
        Self::new()
    }
}

fn describe_stage(stage: &str, intent: &ClassifiedIntent, context_text: &str) -> String {
    let goal = if context_text.trim().is_empty() {
        intent.label.to_string()
    } else {
        context_text.trim().to_string()
    };
    match stage {
        "search" => format!("locate code relevant to: {}", goal),
        "read" => format!("read the files involved in: {}", goal),
        "edit" => format!("apply the change: {}", goal),
        "typecheck" => "run the project type checker over the changed files".to_string(),
        "format" => "format the changed files".to_string(),
        "test_runner" => "run the test suite covering the change".to_string(),
        other => format!("{} stage for: {}", other, goal),
    }
}

fn stage_risk(stage: &str, intent: &ClassifiedIntent) -> RiskLevel {
    let mut risk = base_risk(stage);
    if stage == "edit" && intent.risk >= RiskLevel::High {
        risk = intent.risk;
    }
    risk
}

/// Width of the widest dependency level; 0 when the relation is not
/// well-founded (the validator reports that case properly).
fn widest_level(nodes: &[PlanNode]) -> usize {
    use std::collections::HashSet;

    let mut placed: HashSet<&NodeId> = HashSet::new();
    let mut widest = 0usize;
    loop {
        let ready: Vec<&NodeId> = nodes
            .iter()
            .filter(|n| !placed.contains(&n.id))
            .filter(|n| n.depends_on.iter().all(|d| placed.contains(d)))
            .map(|n| &n.id)
            .collect();
        if ready.is_empty() {
            return widest;
        }
        widest = widest.max(ready.len());
        placed.extend(ready);
        if placed.len() == nodes.len() {
            return widest;
        }
    }
}

/// Longest path by estimated minutes, entry to exit, over `depends_on`.
fn critical_path(nodes: &[PlanNode]) -> Vec<NodeId> {
    use std::collections::HashMap;

    // best[id] = (accumulated minutes, predecessor)
    let mut best: HashMap<&NodeId, (u64, Option<&NodeId>)> = HashMap::new();
    let mut remaining: Vec<&PlanNode> = nodes.iter().collect();
    while !remaining.is_empty() {
        let ready: Vec<&PlanNode> = remaining
            .iter()
            .filter(|n| n.depends_on.iter().all(|d| best.contains_key(d)))
            .copied()
            .collect();
        if ready.is_empty() {
            return Vec::new();
        }
        for node in &ready {
            let (cost, predecessor) = node
                .depends_on
                .iter()
                .filter_map(|d| best.get(d).map(|(c, _)| (*c, d)))
                .max_by_key(|(c, _)| *c)
                .map(|(c, d)| (c, Some(d)))
                .unwrap_or((0, None));
            best.insert(&node.id, (cost + u64::from(node.estimated_minutes), predecessor));
        }
        remaining.retain(|n| !best.contains_key(&n.id));
    }

    let Some((&end, _)) = best.iter().max_by_key(|(_, (cost, _))| *cost) else {
        return Vec::new();
    };
    let mut path = vec![end.clone()];
    let mut cursor = end;
    while let Some((_, Some(prev))) = best.get(cursor) {
        path.push((*prev).clone());
        cursor = *prev;
    }
    path.reverse();
    path
}
