//! Tool executor configuration

use serde::Deserialize;
use serde_json::Value;

/// Tools config root
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_tool_specs")]
    pub tools: Vec<ToolSpec>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            tools: default_tool_specs(),
        }
    }
}

impl ToolsConfig {
    /// Look up a spec by tool name
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// Single tool executor definition from config
#[derive(Debug, Clone, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            description: None,
            config: Value::Null,
        }
    }

    pub fn description_or(&self, fallback: &str) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// The stock tool set: search/read/edit plus cargo-backed check commands.
fn default_tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new("search", "search"),
        ToolSpec::new("read", "read"),
        ToolSpec::new("edit", "edit"),
        ToolSpec {
            config: serde_json::json!({ "command": "cargo", "args": ["check"] }),
            ..ToolSpec::new("typecheck", "typecheck")
        },
        ToolSpec {
            config: serde_json::json!({ "command": "cargo", "args": ["fmt"] }),
            ..ToolSpec::new("format", "format")
        },
        ToolSpec {
            config: serde_json::json!({ "command": "cargo", "args": ["test"] }),
            ..ToolSpec::new("test_runner", "test_runner")
        },
    ]
}
