//! CLI configuration management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Directory under which job workspaces are created.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Repository cloned by `actions/checkout`.
    #[serde(default)]
    pub repository: Option<String>,
    /// Per-step time limit in minutes; 0 disables it.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_minutes: u64,
    /// `runs-on` labels served by this host.
    #[serde(default = "default_environments")]
    pub environments: Vec<String>,
    #[serde(default)]
    pub keep_workspaces: bool,
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("tollgate")
}

fn default_step_timeout() -> u64 {
    30
}

fn default_environments() -> Vec<String> {
    tollgate_runner::environments::default_labels()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            repository: None,
            step_timeout_minutes: default_step_timeout(),
            environments: default_environments(),
            keep_workspaces: false,
            output_format: OutputFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl CliConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let dirs = directories::ProjectDirs::from("ci", "tollgate", "tollgate")
            .ok_or("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        match self.step_timeout_minutes {
            0 => None,
            minutes => Some(Duration::from_secs(minutes * 60)),
        }
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "workspace_root" => self.workspace_root = PathBuf::from(value),
            "repository" => {
                self.repository = match value.trim() {
                    "" => None,
                    repo => Some(repo.to_string()),
                }
            }
            "step_timeout_minutes" => {
                self.step_timeout_minutes = value
                    .parse()
                    .map_err(|_| format!("Invalid number of minutes: {}", value))?;
            }
            "environments" => {
                let labels: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect();
                if labels.is_empty() {
                    return Err("At least one environment label is required".to_string());
                }
                self.environments = labels;
            }
            "keep_workspaces" => {
                self.keep_workspaces = value
                    .parse()
                    .map_err(|_| format!("Invalid boolean: {}", value))?;
            }
            "output_format" => {
                self.output_format = match value {
                    "table" => OutputFormat::Table,
                    "json" => OutputFormat::Json,
                    _ => return Err(format!("Invalid output format: {}", value)),
                };
            }
            _ => return Err(format!("Unknown config key: {}", key)),
        }
        Ok(())
    }
}
