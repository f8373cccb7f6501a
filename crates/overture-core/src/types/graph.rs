//! Plan graph type definitions
//!
//! A `PlanGraph` is the DAG of work generated for one classified intent.
//! The graph is built once by the planner, proven well-formed by the
//! validator, and read-only during execution.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::intent::IntentLabel;
use super::node::{NodeId, PlanNode, RiskLevel};

/// Edge type - `Success` is the normal ordering relation; `Failure` is the
/// optional branching extension routing a failed node to a recovery node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    #[default]
    Success,
    Failure,
}

/// A directed relation between two plan nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEdge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default)]
    pub kind: EdgeKind,
    /// Weight used by risk/parallelism heuristics
    #[serde(default)]
    pub weight: u32,
}

impl PlanEdge {
    /// Create a success edge
    pub fn success(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: EdgeKind::Success,
            weight: 1,
        }
    }

    /// Create a failure edge routing to a recovery node
    pub fn failure(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: EdgeKind::Failure,
            weight: 1,
        }
    }

    /// Set the heuristic weight
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

/// Overall risk picture for one plan graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Highest risk tier across the graph and its intent
    pub overall: RiskLevel,
    /// Longest path by estimated minutes, entry to exit
    #[serde(default)]
    pub critical_path: Vec<NodeId>,
    /// Nodes whose effects are irreversible without an explicit checkpoint
    #[serde(default)]
    pub rollback_points: Vec<NodeId>,
}

/// The DAG of work to perform for one intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanGraph {
    /// Unique identifier for this graph
    pub id: String,
    /// The intent label this graph was planned for
    pub intent_label: IntentLabel,
    /// All nodes, in planning order
    pub nodes: Vec<PlanNode>,
    /// All edges; both endpoints must exist in `nodes`
    pub edges: Vec<PlanEdge>,
    /// Node with no unmet dependencies where execution starts
    pub entry_point: NodeId,
    /// Nodes with no outgoing success edges
    pub exit_points: Vec<NodeId>,
    /// Invariant: sum of all node `estimated_minutes`
    pub estimated_total_minutes: u32,
    /// Concurrency bound; 1 <= max_parallelism <= |nodes|
    pub max_parallelism: usize,
    /// Risk picture computed at planning time
    #[serde(default)]
    pub risk: RiskAssessment,
}

impl PlanGraph {
    /// Assemble a graph from parts, computing the derived fields
    /// (`exit_points`, `estimated_total_minutes`).
    pub fn new(
        intent_label: IntentLabel,
        nodes: Vec<PlanNode>,
        edges: Vec<PlanEdge>,
        entry_point: NodeId,
        max_parallelism: usize,
    ) -> Self {
        let estimated_total_minutes = nodes.iter().map(|n| n.estimated_minutes).sum();
        let exit_points = compute_exit_points(&nodes, &edges);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            intent_label,
            nodes,
            edges,
            entry_point,
            exit_points,
            estimated_total_minutes,
            max_parallelism,
            risk: RiskAssessment::default(),
        }
    }

    /// Attach a risk assessment
    pub fn with_risk(mut self, risk: RiskAssessment) -> Self {
        self.risk = risk;
        self
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Look up a node by ID
    pub fn get_node(&self, id: &NodeId) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// All node IDs, in planning order
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> + '_ {
        self.nodes.iter().map(|n| &n.id)
    }

    /// Whether a node ID exists in the graph
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|n| &n.id == id)
    }

    /// Map of node ID -> IDs that list it in `depends_on`
    pub fn dependents_map(&self) -> HashMap<&NodeId, Vec<&NodeId>> {
        let mut map: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
        for node in &self.nodes {
            map.entry(&node.id).or_default();
            for dep in &node.depends_on {
                map.entry(dep).or_default().push(&node.id);
            }
        }
        map
    }

    /// Failure-edge targets for a node, if any were planned
    pub fn failure_routes(&self, from: &NodeId) -> Vec<&NodeId> {
        self.edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Failure && &e.from == from)
            .map(|e| &e.to)
            .collect()
    }

    /// Group nodes into dependency levels: level 0 has no dependencies,
    /// level n+1 depends only on levels <= n. Returns None when the
    /// dependency relation is not well-founded (cycle or dangling ID);
    /// the validator reports those cases with proper diagnostics.
    pub fn dependency_levels(&self) -> Option<Vec<Vec<&NodeId>>> {
        let mut level_of: HashMap<&NodeId, usize> = HashMap::new();
        let mut remaining: Vec<&PlanNode> = self.nodes.iter().collect();

        let mut current = 0usize;
        while !remaining.is_empty() {
            let ready: Vec<&PlanNode> = remaining
                .iter()
                .filter(|n| n.depends_on.iter().all(|d| level_of.contains_key(d)))
                .copied()
                .collect();
            if ready.is_empty() {
                return None;
            }
            for node in &ready {
                level_of.insert(&node.id, current);
            }
            remaining.retain(|n| !level_of.contains_key(&n.id));
            current += 1;
        }

        let mut levels: Vec<Vec<&NodeId>> = vec![Vec::new(); current];
        for node in &self.nodes {
            if let Some(&level) = level_of.get(&node.id) {
                levels[level].push(&node.id);
            }
        }
        Some(levels)
    }
}

fn compute_exit_points(nodes: &[PlanNode], edges: &[PlanEdge]) -> Vec<NodeId> {
    nodes
        .iter()
        .filter(|n| {
            !edges
                .iter()
                .any(|e| e.kind == EdgeKind::Success && e.from == n.id)
        })
        .map(|n| n.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_graph() -> PlanGraph {
        let nodes = vec![
            PlanNode::tool("a", "search", "search").with_estimated_minutes(2),
            PlanNode::tool("b", "edit", "edit")
                .with_depends_on(vec!["a".into()])
                .with_estimated_minutes(6),
        ];
        let edges = vec![PlanEdge::success("a", "b")];
        PlanGraph::new(IntentLabel::Edit, nodes, edges, "a".into(), 1)
    }

    #[test]
    fn test_total_minutes_is_sum_of_node_estimates() {
        let graph = linear_graph();
        assert_eq!(graph.estimated_total_minutes, 8);
    }

    #[test]
    fn test_exit_points_are_nodes_without_outgoing_success_edges() {
        let graph = linear_graph();
        assert_eq!(graph.exit_points, vec![NodeId::from("b")]);
    }

    #[test]
    fn test_dependency_levels_layer_by_dependencies() {
        let graph = linear_graph();
        let levels = graph.dependency_levels().expect("levels");
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0], vec![&NodeId::from("a")]);
        assert_eq!(levels[1], vec![&NodeId::from("b")]);
    }

    #[test]
    fn test_dependency_levels_detect_unsatisfiable_graph() {
        let mut graph = linear_graph();
        graph.nodes[0].depends_on = vec!["b".into()];
        assert!(graph.dependency_levels().is_none());
    }
}
