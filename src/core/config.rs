//! Configuration management for Repoflow.
//!
//! Handles loading configuration from TOML files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::workflow::{EngineConfig, DEFAULT_EVENTS, DEFAULT_WORKERS};

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV: &str = "REPOFLOW_CONFIG";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker pool settings
    pub engine: EngineSettings,

    /// Workflow storage and trigger settings
    pub workflows: WorkflowsConfig,

    /// Run log settings
    pub history: HistoryConfig,
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Number of concurrent workers
    pub workers: usize,

    /// Default per-step timeout in seconds (unlimited when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_timeout_secs: Option<u64>,

    /// Working directory for step commands (current directory when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

/// Workflow storage and trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowsConfig {
    /// Directory holding workflow documents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// Directory holding workflow templates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub templates_dir: Option<String>,

    /// Recognized trigger events
    pub allowed_events: Vec<String>,
}

/// Run log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of records to keep
    pub max_entries: usize,

    /// Path of the run log file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { workers: DEFAULT_WORKERS, step_timeout_secs: None, working_dir: None }
    }
}

impl Default for WorkflowsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            templates_dir: None,
            allowed_events: DEFAULT_EVENTS.iter().map(|e| (*e).to_string()).collect(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_entries: 1000, path: None }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Looks for config in:
    /// 1. the file named by `REPOFLOW_CONFIG`
    /// 2. `.repoflow.toml` in current directory
    /// 3. `~/.config/repoflow/config.toml`
    /// 4. Falls back to defaults
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load_from_file(Path::new(&path));
        }

        let local_config = PathBuf::from(".repoflow.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(global_config) = Self::config_dir().map(|d| d.join("config.toml")) {
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("repoflow"))
    }

    /// Get the data directory path (for workflows, templates, run log).
    pub fn data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("repoflow"))
    }

    /// Directory holding workflow documents.
    pub fn workflows_dir(&self) -> PathBuf {
        resolve_dir(self.workflows.dir.as_deref(), "workflows")
    }

    /// Directory holding workflow templates.
    pub fn templates_dir(&self) -> PathBuf {
        resolve_dir(self.workflows.templates_dir.as_deref(), "templates")
    }

    /// Path of the run log.
    pub fn history_path(&self) -> PathBuf {
        resolve_dir(self.history.path.as_deref(), "history.json")
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default()
            .workers(self.engine.workers)
            .allowed_events(self.workflows.allowed_events.clone());

        if let Some(secs) = self.engine.step_timeout_secs {
            config = config.step_timeout(Duration::from_secs(secs));
        }
        if let Some(ref dir) = self.engine.working_dir {
            config = config.working_dir(expand(dir));
        }
        config
    }
}

/// Use the configured path (with `~` and env vars expanded) or a data-dir default.
fn resolve_dir(configured: Option<&str>, default_leaf: &str) -> PathBuf {
    match configured {
        Some(path) => expand(path),
        None => Config::data_dir()
            .unwrap_or_else(|| PathBuf::from(".repoflow"))
            .join(default_leaf),
    }
}

fn expand(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            tracing::warn!(path, error = %e, "Could not expand path, using it verbatim");
            PathBuf::from(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.workers, 5);
        assert_eq!(config.workflows.allowed_events, vec!["push", "pull_request", "merge"]);
        assert_eq!(config.history.max_entries, 1000);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[engine]"));
        assert!(toml_str.contains("allowed_events"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
[engine]
workers = 2
step_timeout_secs = 120

[workflows]
dir = "/srv/repoflow/workflows"
allowed_events = ["push", "tag"]
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.workers, 2);
        assert_eq!(config.workflows_dir(), PathBuf::from("/srv/repoflow/workflows"));
        assert_eq!(config.history.max_entries, 1000);

        let engine = config.engine_config();
        assert_eq!(engine.workers, 2);
        assert_eq!(engine.step_timeout, Some(Duration::from_secs(120)));
        assert_eq!(engine.allowed_events, vec!["push", "tag"]);
    }

    #[test]
    fn test_zero_workers_clamped() {
        let config: Config = toml::from_str("[engine]\nworkers = 0\n").unwrap();
        assert_eq!(config.engine_config().workers, 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[history]\nmax_entries = 10\n").unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.history.max_entries, 10);

        std::fs::write(&path, "[history\n").unwrap();
        assert!(Config::load_from_file(&path).is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_load_honours_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[engine]\nworkers = 9\n").unwrap();

        std::env::set_var(CONFIG_ENV, &path);
        let config = Config::load();
        std::env::remove_var(CONFIG_ENV);

        assert_eq!(config.unwrap().engine.workers, 9);
    }
}
