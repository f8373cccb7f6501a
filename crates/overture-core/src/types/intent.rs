//! Classified intent type definitions
//!
//! A `ClassifiedIntent` is the output of the intent-classification layer and
//! the first-class input of the plan graph builder. Overture does not classify
//! intents itself; it consumes the classification read-only.

use serde::{Deserialize, Serialize};

use super::node::RiskLevel;

/// High-level goal category driving template selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    Refactor,
    Edit,
    TestGen,
    Migration,
    Optimize,
    Debug,
    Analyze,
    DocGen,
    /// Anything the classifier could not place into a known category.
    /// Planning must still succeed for this label (generic fallback).
    #[serde(other)]
    Unknown,
}

impl IntentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refactor => "refactor",
            Self::Edit => "edit",
            Self::TestGen => "test_gen",
            Self::Migration => "migration",
            Self::Optimize => "optimize",
            Self::Debug => "debug",
            Self::Analyze => "analyze",
            Self::DocGen => "doc_gen",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complexity tier assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    /// Multiplier applied to per-tool base estimates. Monotonic in tier.
    pub fn time_multiplier(&self) -> u32 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 4,
        }
    }
}

/// Classified intent - read-only input to the plan graph builder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedIntent {
    /// Intent category
    pub label: IntentLabel,
    /// Classifier confidence in [0, 1]
    pub confidence: f32,
    /// Human-readable classifier rationale
    #[serde(default)]
    pub reasoning: String,
    /// Complexity tier
    #[serde(default)]
    pub complexity: Complexity,
    /// Classifier's own end-to-end time estimate, in minutes
    #[serde(default)]
    pub estimated_minutes: u32,
    /// Tool names the classifier believes the change requires
    #[serde(default)]
    pub required_tools: Vec<String>,
    /// Risk tier assigned by the classifier
    #[serde(default)]
    pub risk: RiskLevel,
}

impl ClassifiedIntent {
    /// Create a minimal intent for a label, defaults everywhere else
    pub fn new(label: IntentLabel) -> Self {
        Self {
            label,
            confidence: 1.0,
            reasoning: String::new(),
            complexity: Complexity::default(),
            estimated_minutes: 0,
            required_tools: Vec::new(),
            risk: RiskLevel::default(),
        }
    }

    /// Set the complexity tier
    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    /// Set the risk tier
    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }

    /// Set the required tool list
    pub fn with_required_tools(mut self, tools: Vec<String>) -> Self {
        self.required_tools = tools;
        self
    }
}
