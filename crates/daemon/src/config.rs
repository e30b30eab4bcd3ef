//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// HTTP listen address
    pub listen: String,

    /// Root of the automation suite; the test process runs with this as its
    /// working directory
    pub suite_dir: PathBuf,

    /// Store directory path
    pub store_path: PathBuf,

    /// Display name shown by the dashboard and CLI
    pub project_name: String,

    /// How many run records to retain in history
    pub history_limit: usize,

    /// Recognized input parameters (e.g. region, environment)
    #[serde(default)]
    pub inputs: Vec<InputParameter>,

    /// Test process configuration
    pub runner: RunnerConfig,

    /// Script discovery configuration
    pub discovery: DiscoveryConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8980".to_string(),
            suite_dir: PathBuf::from("."),
            store_path: testdeck_common::default_store_path(),
            project_name: "testdeck".to_string(),
            history_limit: 100,
            inputs: Vec::new(),
            runner: RunnerConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

/// One input parameter the dashboard renders and the runner receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputParameter {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub default: Option<String>,
}

/// Test process configuration.
///
/// `command`, `args` and `env` values may contain `{key}` placeholders
/// resolved against the run's input values plus `{runId}`, `{script}` and
/// `{scriptPaths}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Command to invoke, e.g. "npx playwright test"
    pub command: String,

    /// Additional templated arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Template expanding one script id into its spec path
    pub script_path_pattern: String,

    /// Seconds to wait between SIGTERM and SIGKILL when stopping a run
    pub grace_period_secs: u64,

    /// Templated environment variables for the test process
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: "npx playwright test".to_string(),
            args: vec!["{scriptPaths}".to_string()],
            env: HashMap::new(),
            script_path_pattern: "tests/{script}/{script}.spec.ts".to_string(),
            grace_period_secs: 5,
        }
    }
}

/// Script discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Templated path, relative to `suite_dir`, whose subdirectories are the
    /// runnable script ids for the current input selection
    pub lookup_path: String,

    /// Which input id is denormalized onto run records for display
    pub primary_input: String,

    /// Input value rewrites applied before template resolution, keyed by
    /// input id then by selected value (e.g. region "ZA" -> "za-prod")
    #[serde(default)]
    pub path_mappings: HashMap<String, HashMap<String, String>>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            lookup_path: "tests".to_string(),
            path_mappings: HashMap::new(),
            primary_input: "region".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the history database path
    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("history.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_roundtrip_through_toml() {
        let config = DaemonConfig::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: DaemonConfig = toml::from_str(&toml).unwrap();

        assert_eq!(parsed.listen, config.listen);
        assert_eq!(parsed.history_limit, 100);
        assert_eq!(parsed.runner.grace_period_secs, 5);
        assert_eq!(parsed.discovery.primary_input, "region");
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.listen, "127.0.0.1:8980");
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = DaemonConfig::default();
        config.project_name = "gamesite-qa".to_string();
        config.inputs.push(InputParameter {
            id: "region".to_string(),
            label: "Region".to_string(),
            options: vec!["ZA".to_string(), "NG".to_string()],
            default: Some("ZA".to_string()),
        });
        config.save(&path).unwrap();

        let loaded = DaemonConfig::load(&path).unwrap();
        assert_eq!(loaded.project_name, "gamesite-qa");
        assert_eq!(loaded.inputs.len(), 1);
        assert_eq!(loaded.inputs[0].options, vec!["ZA", "NG"]);
    }
}
