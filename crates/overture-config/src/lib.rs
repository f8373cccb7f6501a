//! # Overture Config
//!
//! Unified single-file configuration management for Overture.
//! A single `overture.yaml` can configure the planner, scheduler, patch
//! handling, tool executors, and observability settings.

mod loader;
mod tools;

pub use loader::{load_config, load_tools_config, ConfigError};
pub use tools::{ToolSpec, ToolsConfig};

use serde::Deserialize;

/// Top-level configuration schema for Overture.
#[derive(Debug, Clone, Deserialize)]
pub struct OvertureConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub patches: PatchConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for OvertureConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            planner: PlannerConfig::default(),
            scheduler: SchedulerConfig::default(),
            patches: PatchConfig::default(),
            observability: ObservabilityConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl OvertureConfig {
    pub fn tools(&self) -> &ToolsConfig {
        &self.tools
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_env(),
        }
    }
}

fn default_app_name() -> String {
    "overture".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_true")]
    pub include_verification: bool,
    #[serde(default = "default_true")]
    pub include_rollback: bool,
    #[serde(default)]
    pub optimize_for_safety: bool,
    #[serde(default)]
    pub optimize_for_time: bool,
    /// Optional cap on plan-level parallelism.
    #[serde(default)]
    pub max_parallelism: Option<usize>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            include_verification: true,
            include_rollback: true,
            optimize_for_safety: false,
            optimize_for_time: false,
            max_parallelism: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_retries")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_true")]
    pub enable_parallelism: bool,
    /// Wall-clock bound for one run, in milliseconds. None means unbounded.
    #[serde(default)]
    pub run_timeout_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retries(),
            retry_base_delay_ms: default_retry_base_ms(),
            retry_max_delay_ms: default_retry_max_ms(),
            enable_parallelism: true,
            run_timeout_ms: None,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    200
}

fn default_retry_max_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatchConfig {
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,
    /// abort | prefer_ours | prefer_theirs | manual
    #[serde(default = "default_conflict_policy")]
    pub conflict_policy: String,
    #[serde(default = "default_true")]
    pub backup_on_apply: bool,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            backup_dir: default_backup_dir(),
            conflict_policy: default_conflict_policy(),
            backup_on_apply: true,
        }
    }
}

fn default_backup_dir() -> String {
    ".overture/backups".to_string()
}

fn default_conflict_policy() -> String {
    "abort".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
