use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PlanweaveError, Result};

/// Top-level planweave configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Command-backed capabilities keyed by capability name.
    #[serde(default)]
    pub capabilities: HashMap<String, CapabilityConfig>,
    /// Directory scanned for drop-in `capability.toml` manifests.
    #[serde(default)]
    pub capabilities_dir: Option<String>,
    /// Runner for code embedded in capability outputs.
    #[serde(default)]
    pub code_executor: Option<CodeExecutorConfig>,
}

/// DAG executor loop limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum scheduler iterations before the run is abandoned as incomplete.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Sleep between iterations when nothing is ready and nothing failed.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            idle_backoff_ms: default_idle_backoff_ms(),
        }
    }
}

fn default_max_iterations() -> usize { 20 }
fn default_idle_backoff_ms() -> u64 { 300 }

/// Names of the capabilities with special roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Capability that produces the plan graph.
    #[serde(default = "default_planner_agent")]
    pub agent: String,
    /// Capability that profiles uploaded files before planning.
    #[serde(default = "default_profiler_agent")]
    pub profiler_agent: String,
    /// Capability that receives the whole namespace when run as a step.
    #[serde(default = "default_formatter_agent")]
    pub formatter_agent: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            agent: default_planner_agent(),
            profiler_agent: default_profiler_agent(),
            formatter_agent: default_formatter_agent(),
            strategy: default_strategy(),
        }
    }
}

fn default_planner_agent() -> String { "PlannerAgent".to_string() }
fn default_profiler_agent() -> String { "DistillerAgent".to_string() }
fn default_formatter_agent() -> String { "FormatterAgent".to_string() }
fn default_strategy() -> String { "conservative".to_string() }

/// Session persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base directory; sessions land in `<dir>/YYYY/MM/DD/session_<id>.json`.
    #[serde(default = "default_session_dir")]
    pub dir: String,
    /// Save the graph after every state change round.
    #[serde(default = "default_auto_save")]
    pub auto_save: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dir: default_session_dir(),
            auto_save: default_auto_save(),
        }
    }
}

fn default_session_dir() -> String { "memory/session_summaries_index".to_string() }
fn default_auto_save() -> bool { true }

/// A capability implemented by an external command (JSON on stdin/stdout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConfig {
    pub command: String,
    #[serde(default = "default_capability_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_capability_timeout() -> u64 { 120 }

/// External code runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExecutorConfig {
    pub command: String,
    #[serde(default = "default_code_timeout")]
    pub timeout_secs: u64,
}

fn default_code_timeout() -> u64 { 50 }

impl AppConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| PlanweaveError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| PlanweaveError::Config(e.to_string()))
    }

    /// Resolve the session directory (expand ~).
    pub fn session_dir(&self) -> PathBuf {
        expand_home(&self.session.dir)
    }

    /// Resolve the drop-in capabilities directory, if configured.
    pub fn capabilities_dir(&self) -> Option<PathBuf> {
        self.capabilities_dir.as_deref().map(expand_home)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_PLANWEAVE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_PLANWEAVE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_PLANWEAVE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_PLANWEAVE_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_PLANWEAVE_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.executor.max_iterations, 20);
        assert_eq!(config.executor.idle_backoff_ms, 300);
        assert_eq!(config.planner.agent, "PlannerAgent");
        assert_eq!(config.planner.profiler_agent, "DistillerAgent");
        assert_eq!(config.planner.formatter_agent, "FormatterAgent");
        assert_eq!(config.planner.strategy, "conservative");
        assert_eq!(config.session.dir, "memory/session_summaries_index");
        assert!(config.session.auto_save);
        assert!(config.capabilities.is_empty());
        assert!(config.code_executor.is_none());
    }

    #[test]
    fn test_capability_defaults() {
        let toml_str = r#"
[capabilities.CoderAgent]
command = "python3 agents/coder.py"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let cap = &config.capabilities["CoderAgent"];
        assert_eq!(cap.command, "python3 agents/coder.py");
        assert_eq!(cap.timeout_secs, 120);
        assert!(cap.working_dir.is_none());
        assert!(cap.env.is_empty());
    }

    #[test]
    fn test_code_executor_timeout_default() {
        let toml_str = r#"
[code_executor]
command = "python3 sandbox.py"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.code_executor.unwrap().timeout_secs, 50);
    }

    #[test]
    fn test_session_dir_relative() {
        let config = AppConfig::default();
        assert_eq!(
            config.session_dir(),
            PathBuf::from("memory/session_summaries_index")
        );
        assert!(config.capabilities_dir().is_none());
    }
}
