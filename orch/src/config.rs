//! Orchestrator configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::engine::RetryPolicy;

/// Main orchestrator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Planner LLM endpoint
    pub llm: LlmConfig,

    /// Execution loop budgets
    pub engine: EngineConfig,

    /// Action executors
    pub dispatch: DispatchConfig,

    /// Task persistence
    pub storage: StorageConfig,

    /// Log level (overridden by --log-level)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain, then apply environment overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file_chain(config_path)?;
        config.apply_env();
        Ok(config)
    }

    fn load_file_chain(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .orchestrator.yml
        let local_config = PathBuf::from(".orchestrator.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/orchestrator/orchestrator.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("orchestrator").join("orchestrator.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup; unparseable numbers are ignored
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = get("ORCH_MODEL") {
            self.llm.model = model;
        }
        if let Some(base) = get("OPENAI_API_BASE") {
            self.llm.base_url = base;
        }
        if let Some(url) = get("DESKTOP_DRIVER_URL") {
            self.dispatch.desktop_driver_url = url;
        }
        if let Some(python) = get("PYTHON_BIN") {
            self.dispatch.external_job.program = python;
        }
        override_num(&mut self.engine.max_steps, get("MAX_STEPS"), "MAX_STEPS");
        override_num(
            &mut self.engine.max_retries_per_step,
            get("MAX_RETRIES_PER_STEP"),
            "MAX_RETRIES_PER_STEP",
        );
        override_num(
            &mut self.engine.max_recursion_depth,
            get("MAX_RECURSION_DEPTH"),
            "MAX_RECURSION_DEPTH",
        );
        override_num(&mut self.engine.base_backoff_ms, get("BASE_BACKOFF_MS"), "BASE_BACKOFF_MS");
        override_num(&mut self.engine.max_context_chars, get("MAX_CONTEXT_CHARS"), "MAX_CONTEXT_CHARS");
    }
}

fn override_num<T: FromStr>(slot: &mut T, value: Option<String>, key: &str) {
    if let Some(raw) = value {
        match raw.trim().parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(%key, %raw, "Ignoring unparseable environment override"),
        }
    }
}

/// Planner LLM configuration (OpenAI-compatible chat API)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model identifier
    pub model: String,

    /// API base URL, including the version segment
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable containing the API key (optional for local servers)
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    pub temperature: f32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl LlmConfig {
    /// API key from the configured environment variable, if set
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "qwen2.5-coder-1.5b".to_string(),
            base_url: "http://localhost:1234/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 1024,
            temperature: 0.2,
            timeout_ms: 120_000,
        }
    }
}

/// Execution loop budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Planner iterations per task
    #[serde(rename = "max-steps")]
    pub max_steps: usize,

    #[serde(rename = "max-retries-per-step")]
    pub max_retries_per_step: u32,

    #[serde(rename = "base-backoff-ms")]
    pub base_backoff_ms: u64,

    #[serde(rename = "backoff-jitter")]
    pub backoff_jitter: bool,

    /// Deepest allowed sub-task nesting
    #[serde(rename = "max-recursion-depth")]
    pub max_recursion_depth: u32,

    /// Character budget for the planning context
    #[serde(rename = "max-context-chars")]
    pub max_context_chars: usize,
}

impl EngineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries_per_step: self.max_retries_per_step,
            base_backoff_ms: self.base_backoff_ms,
            jitter: self.backoff_jitter,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 8,
            max_retries_per_step: 2,
            base_backoff_ms: 500,
            backoff_jitter: false,
            max_recursion_depth: 2,
            max_context_chars: 6000,
        }
    }
}

/// Action executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Remote desktop-control driver endpoint
    #[serde(rename = "desktop-driver-url")]
    pub desktop_driver_url: String,

    #[serde(rename = "driver-timeout-ms")]
    pub driver_timeout_ms: u64,

    /// Shell used for run_shell and command probes (invoked as `<shell> -c`)
    pub shell: String,

    #[serde(rename = "shell-timeout-ms")]
    pub shell_timeout_ms: u64,

    /// Default working directory for shell actions
    #[serde(rename = "working-dir")]
    pub working_dir: Option<PathBuf>,

    #[serde(rename = "external-job")]
    pub external_job: ExternalJobConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            desktop_driver_url: "http://127.0.0.1:39990/computer-use".to_string(),
            driver_timeout_ms: 30_000,
            shell: "sh".to_string(),
            shell_timeout_ms: 120_000,
            working_dir: None,
            external_job: ExternalJobConfig::default(),
        }
    }
}

/// External job runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalJobConfig {
    pub program: String,
    pub args: Vec<String>,

    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ExternalJobConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: Vec::new(),
            timeout_ms: 600_000,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Per-task directories live here
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,

    /// Screenshot artifacts live here
    #[serde(rename = "artifacts-dir")]
    pub artifacts_dir: PathBuf,

    /// Backlog size when streaming a task
    #[serde(rename = "tail-lines")]
    pub tail_lines: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("orchestrator");
        Self {
            data_dir: base.join("tasks"),
            artifacts_dir: base.join("shots"),
            tail_lines: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.llm.model, "qwen2.5-coder-1.5b");
        assert_eq!(config.llm.base_url, "http://localhost:1234/v1");
        assert_eq!(config.engine.max_steps, 8);
        assert_eq!(config.engine.max_retries_per_step, 2);
        assert_eq!(config.engine.base_backoff_ms, 500);
        assert!(!config.engine.backoff_jitter);
        assert_eq!(config.dispatch.shell, "sh");
        assert_eq!(config.dispatch.external_job.program, "python3");
        assert_eq!(config.storage.tail_lines, 20);
        assert!(config.storage.data_dir.ends_with("orchestrator/tasks"));
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
llm:
  model: llama-3
  base-url: http://gpu-box:8080/v1
  api-key-env: MY_KEY
  temperature: 0.7

engine:
  max-steps: 20
  max-retries-per-step: 4
  base-backoff-ms: 250
  backoff-jitter: true

dispatch:
  shell: bash
  working-dir: /srv/work
  external-job:
    program: /usr/bin/python3
    args: ["-m", "autodev"]

storage:
  data-dir: /var/lib/orch/tasks
  tail-lines: 50

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.llm.model, "llama-3");
        assert_eq!(config.llm.api_key_env, "MY_KEY");
        assert_eq!(config.engine.max_steps, 20);
        assert!(config.engine.backoff_jitter);
        assert_eq!(config.dispatch.shell, "bash");
        assert_eq!(config.dispatch.working_dir, Some(PathBuf::from("/srv/work")));
        assert_eq!(config.dispatch.external_job.args, vec!["-m", "autodev"]);
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/orch/tasks"));
        assert_eq!(config.storage.tail_lines, 50);
        assert_eq!(config.log_level.as_deref(), Some("debug"));

        let policy = config.engine.retry_policy();
        assert_eq!(policy.max_retries_per_step, 4);
        assert_eq!(policy.base_backoff_ms, 250);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
engine:
  max-steps: 3
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.engine.max_steps, 3);
        assert_eq!(config.engine.max_retries_per_step, 2);
        assert_eq!(config.llm.model, "qwen2.5-coder-1.5b");
        assert_eq!(config.dispatch.driver_timeout_ms, 30_000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ORCH_MODEL", "mistral"),
            ("OPENAI_API_BASE", "http://other/v1"),
            ("MAX_STEPS", "12"),
            ("MAX_RETRIES_PER_STEP", "5"),
            ("BASE_BACKOFF_MS", "not-a-number"),
            ("PYTHON_BIN", "python3.12"),
            ("MAX_CONTEXT_CHARS", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_with(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.llm.model, "mistral");
        assert_eq!(config.llm.base_url, "http://other/v1");
        assert_eq!(config.engine.max_steps, 12);
        assert_eq!(config.engine.max_retries_per_step, 5);
        // unparseable and blank values are ignored
        assert_eq!(config.engine.base_backoff_ms, 500);
        assert_eq!(config.engine.max_context_chars, 6000);
        assert_eq!(config.dispatch.external_job.program, "python3.12");
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orch.yml");
        std::fs::write(&path, "engine:\n  max-steps: 2\n").unwrap();

        let config = Config::load_file_chain(Some(&path)).unwrap();
        assert_eq!(config.engine.max_steps, 2);

        let missing = dir.path().join("missing.yml");
        assert!(Config::load_file_chain(Some(&missing)).is_err());
    }
}
