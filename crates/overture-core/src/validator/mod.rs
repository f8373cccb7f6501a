//! Plan validator
//!
//! The validator proves a `PlanGraph` is well-formed before anything runs:
//! no cycles, every node reachable from the entry point, every dependency
//! and edge endpoint resolvable. A graph failing any check must not be
//! handed to the scheduler.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::types::{EdgeKind, NodeId, PlanGraph, RiskLevel};

/// Structural defects found in a plan graph
#[derive(Debug, Error)]
pub enum ValidationIssue {
    #[error("Dependency cycle involving node '{0}'")]
    CycleDetected(NodeId),

    #[error("Node '{0}' is unreachable from the entry point")]
    Unreachable(NodeId),

    #[error("Missing dependencies on node '{node}': {missing:?}")]
    MissingDependencies { node: NodeId, missing: Vec<NodeId> },

    #[error("Edge references unknown node '{0}'")]
    DanglingEdge(NodeId),

    #[error("Duplicate node ID '{0}'")]
    DuplicateNodeId(NodeId),

    #[error("Entry point '{0}' is not a node in the graph")]
    UnknownEntryPoint(NodeId),

    #[error("Entry point '{0}' has unmet dependencies")]
    EntryPointHasDependencies(NodeId),

    #[error("max_parallelism {actual} outside [1, {nodes}]")]
    ParallelismOutOfBounds { actual: usize, nodes: usize },

    #[error("Plan graph has no nodes")]
    EmptyGraph,
}

/// Result of validating one plan graph
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// True when no structural issue was found
    pub is_valid: bool,
    /// Human-readable issue descriptions; empty when valid
    pub issues: Vec<String>,
    /// Advisory hints; never affect validity
    pub suggestions: Vec<String>,
}

/// The plan validator
pub struct PlanValidator;

impl PlanValidator {
    /// Create a new validator
    pub fn new() -> Self {
        Self
    }

    /// Run every structural check and collect the findings.
    pub fn validate(&self, graph: &PlanGraph) -> ValidationReport {
        let mut issues: Vec<ValidationIssue> = Vec::new();

        if graph.nodes.is_empty() {
            issues.push(ValidationIssue::EmptyGraph);
            return finish(graph, issues);
        }

        self.check_duplicates(graph, &mut issues);
        self.check_dependencies(graph, &mut issues);
        self.check_edges(graph, &mut issues);
        self.check_entry_point(graph, &mut issues);
        self.check_parallelism(graph, &mut issues);

        // Cycle and reachability walks need a resolvable dependency
        // relation; run them on whatever subset resolves.
        self.check_cycles(graph, &mut issues);
        self.check_reachability(graph, &mut issues);

        finish(graph, issues)
    }

    fn check_duplicates(&self, graph: &PlanGraph, issues: &mut Vec<ValidationIssue>) {
        let mut seen = HashSet::new();
        for node in &graph.nodes {
            if !seen.insert(&node.id) {
                issues.push(ValidationIssue::DuplicateNodeId(node.id.clone()));
            }
        }
    }

    fn check_dependencies(&self, graph: &PlanGraph, issues: &mut Vec<ValidationIssue>) {
        for node in &graph.nodes {
            let missing: Vec<NodeId> = node
                .depends_on
                .iter()
                .filter(|dep| !graph.contains(dep))
                .cloned()
                .collect();
            if !missing.is_empty() {
                issues.push(ValidationIssue::MissingDependencies {
                    node: node.id.clone(),
                    missing,
                });
            }
        }
    }

    fn check_edges(&self, graph: &PlanGraph, issues: &mut Vec<ValidationIssue>) {
        for edge in &graph.edges {
            if !graph.contains(&edge.from) {
                issues.push(ValidationIssue::DanglingEdge(edge.from.clone()));
            }
            if !graph.contains(&edge.to) {
                issues.push(ValidationIssue::DanglingEdge(edge.to.clone()));
            }
        }
    }

    fn check_entry_point(&self, graph: &PlanGraph, issues: &mut Vec<ValidationIssue>) {
        match graph.get_node(&graph.entry_point) {
            None => issues.push(ValidationIssue::UnknownEntryPoint(graph.entry_point.clone())),
            Some(entry) => {
                if !entry.depends_on.is_empty() {
                    issues.push(ValidationIssue::EntryPointHasDependencies(
                        graph.entry_point.clone(),
                    ));
                }
            }
        }
    }

    fn check_parallelism(&self, graph: &PlanGraph, issues: &mut Vec<ValidationIssue>) {
        let nodes = graph.node_count();
        if graph.max_parallelism < 1 || graph.max_parallelism > nodes {
            issues.push(ValidationIssue::ParallelismOutOfBounds {
                actual: graph.max_parallelism,
                nodes,
            });
        }
    }

    /// DFS with a visiting set over the `depends_on` relation; any node
    /// revisited while still on the current path sits on a cycle.
    fn check_cycles(&self, graph: &PlanGraph, issues: &mut Vec<ValidationIssue>) {
        let adjacency: HashMap<&NodeId, Vec<&NodeId>> = graph
            .nodes
            .iter()
            .map(|n| (&n.id, n.depends_on.iter().filter(|d| graph.contains(d)).collect()))
            .collect();

        let mut visited: HashSet<&NodeId> = HashSet::new();
        let mut visiting: HashSet<&NodeId> = HashSet::new();

        fn dfs<'a>(
            node: &'a NodeId,
            adjacency: &HashMap<&'a NodeId, Vec<&'a NodeId>>,
            visited: &mut HashSet<&'a NodeId>,
            visiting: &mut HashSet<&'a NodeId>,
        ) -> Option<&'a NodeId> {
            if visiting.contains(node) {
                return Some(node);
            }
            if visited.contains(node) {
                return None;
            }
            visiting.insert(node);
            if let Some(neighbors) = adjacency.get(node) {
                for neighbor in neighbors {
                    if let Some(cycle_node) = dfs(neighbor, adjacency, visited, visiting) {
                        return Some(cycle_node);
                    }
                }
            }
            visiting.remove(node);
            visited.insert(node);
            None
        }

        let mut reported: HashSet<&NodeId> = HashSet::new();
        for node in &graph.nodes {
            if !visited.contains(&node.id) {
                if let Some(cycle_node) = dfs(&node.id, &adjacency, &mut visited, &mut visiting) {
                    if reported.insert(cycle_node) {
                        issues.push(ValidationIssue::CycleDetected(cycle_node.clone()));
                    }
                    visiting.clear();
                }
            }
        }
    }

    /// Every non-entry node must reach the entry point by following
    /// `depends_on` transitively.
    fn check_reachability(&self, graph: &PlanGraph, issues: &mut Vec<ValidationIssue>) {
        if graph.get_node(&graph.entry_point).is_none() {
            // Already reported as UnknownEntryPoint; reachability would
            // flag every node, which is noise.
            return;
        }

        for node in &graph.nodes {
            if node.id == graph.entry_point {
                continue;
            }
            if !reaches_entry(graph, &node.id) {
                issues.push(ValidationIssue::Unreachable(node.id.clone()));
            }
        }
    }
}

impl Default for PlanValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk backwards over `depends_on`, plus failure-edge sources: a recovery
/// node wired only by failure edges is still anchored to the graph.
fn reaches_entry(graph: &PlanGraph, start: &NodeId) -> bool {
    let mut visited: HashSet<&NodeId> = HashSet::new();
    let mut stack: Vec<&NodeId> = vec![start];
    while let Some(current) = stack.pop() {
        if current == &graph.entry_point {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(node) = graph.get_node(current) {
            for dep in &node.depends_on {
                stack.push(dep);
            }
        }
        for edge in &graph.edges {
            if edge.kind == EdgeKind::Failure && &edge.to == current {
                stack.push(&edge.from);
            }
        }
    }
    false
}

fn finish(graph: &PlanGraph, issues: Vec<ValidationIssue>) -> ValidationReport {
    let mut suggestions = Vec::new();
    if graph.risk.overall >= RiskLevel::High && graph.max_parallelism > 1 {
        suggestions.push(format!(
            "graph risk is {}; consider max_parallelism=1 for easier review",
            graph.risk.overall
        ));
    }
    if graph.risk.rollback_points.is_empty()
        && graph.nodes.iter().any(|n| n.tool.as_deref() == Some("edit"))
    {
        suggestions
            .push("plan contains edits but no rollback points; enable include_rollback".to_string());
    }

    let report = ValidationReport {
        is_valid: issues.is_empty(),
        issues: issues.iter().map(|i| i.to_string()).collect(),
        suggestions,
    };
    if !report.is_valid {
        tracing::warn!(
            graph_id = %graph.id,
            issue_count = report.issues.len(),
            "plan graph failed validation"
        );
    }
    report
}
