//! Configuration loading and validation.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::{OvertureConfig, ToolsConfig};

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load full Overture configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<OvertureConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: OvertureConfig = serde_yaml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load only the tools section from a unified config file.
pub fn load_tools_config(path: &Path) -> Result<ToolsConfig, ConfigError> {
    let config = load_config(path)?;
    Ok(config.tools)
}

fn validate_config(config: &OvertureConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }

    if config.app.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.name must not be empty".to_string(),
        ));
    }

    if let Some(0) = config.planner.max_parallelism {
        return Err(ConfigError::Invalid(
            "planner.max_parallelism must be > 0 when set".to_string(),
        ));
    }

    if config.scheduler.retry_max_delay_ms < config.scheduler.retry_base_delay_ms {
        return Err(ConfigError::Invalid(
            "scheduler.retry_max_delay_ms must be >= retry_base_delay_ms".to_string(),
        ));
    }

    if !matches!(
        config.patches.conflict_policy.as_str(),
        "abort" | "prefer_ours" | "prefer_theirs" | "manual"
    ) {
        return Err(ConfigError::Invalid(format!(
            "patches.conflict_policy '{}' is not one of abort/prefer_ours/prefer_theirs/manual",
            config.patches.conflict_policy
        )));
    }

    for tool in &config.tools.tools {
        if tool.name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "tools.tools[].name must not be empty".to_string(),
            ));
        }
        if tool.kind.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "tools.tools[{}].kind must not be empty",
                tool.name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn write_temp_config(label: &str, content: &str) -> PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("overture-{}-{}.yaml", label, suffix));
        fs::write(&path, content).expect("write config");
        path
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let path = write_temp_config("defaults", "{}\n");
        let config = load_config(&path).expect("load");
        assert_eq!(config.version, 1);
        assert_eq!(config.app.name, "overture");
        assert_eq!(config.scheduler.max_retry_attempts, 3);
        assert_eq!(config.patches.conflict_policy, "abort");
        assert!(config.tools.get("edit").is_some());
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_zero_version_is_rejected() {
        let path = write_temp_config("version", "version: 0\n");
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::Invalid(_))
        ));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_empty_app_name_is_rejected() {
        let path = write_temp_config("appname", "app:\n  name: \"\"\n");
        assert!(matches!(load_config(&path), Err(ConfigError::Invalid(_))));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_unknown_conflict_policy_is_rejected() {
        let path = write_temp_config("policy", "patches:\n  conflict_policy: yolo\n");
        let err = load_config(&path).expect_err("should reject");
        assert!(err.to_string().contains("conflict_policy"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_tool_overrides_parse() {
        let path = write_temp_config(
            "tools",
            concat!(
                "tools:\n",
                "  tools:\n",
                "    - name: typecheck\n",
                "      kind: typecheck\n",
                "      config:\n",
                "        command: tsc\n",
                "        args: [\"--noEmit\"]\n",
            ),
        );
        let config = load_config(&path).expect("load");
        let spec = config.tools.get("typecheck").expect("typecheck");
        assert_eq!(spec.config["command"], "tsc");
        let _ = fs::remove_file(path);
    }
}
