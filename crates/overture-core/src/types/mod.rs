//! Core type definitions for Overture
//!
//! This module contains the fundamental types used throughout the system:
//! - ClassifiedIntent: classifier output driving template selection
//! - PlanNode / PlanEdge / PlanGraph: the DAG of work for one intent
//! - ToolParams: typed per-tool parameter payloads

mod graph;
mod intent;
mod node;

pub use graph::{EdgeKind, PlanEdge, PlanGraph, RiskAssessment};
pub use intent::{ClassifiedIntent, Complexity, IntentLabel};
pub use node::{EditSpec, NodeId, NodeKind, PlanNode, RiskLevel, ToolParams};
