//! CLI configuration management.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CliConfig {
    /// Directory of the filesystem cache store.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Workflow file used when no path is given.
    #[serde(default)]
    pub default_workflow: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

const DEFAULT_WORKFLOW: &str = "trellis.yaml";

fn project_dirs() -> Result<directories::ProjectDirs, Box<dyn std::error::Error>> {
    Ok(directories::ProjectDirs::from("dev", "trellis", "trellis")
        .ok_or("Could not determine config directory")?)
}

impl CliConfig {
    /// Load configuration from file.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::config_path()?;
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        Ok(project_dirs()?.config_dir().join("config.yaml"))
    }

    /// Cache store directory: the configured one, else the platform cache dir.
    pub fn cache_dir(&self) -> Result<PathBuf, Box<dyn std::error::Error>> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.cache_dir().join("deps")),
        }
    }

    /// Workflow path: the explicit one, else the configured default, else
    /// `trellis.yaml`.
    pub fn workflow_path(&self, explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| self.default_workflow.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKFLOW))
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "cache_dir" => self.cache_dir = Some(PathBuf::from(value)),
            "default_workflow" => self.default_workflow = Some(PathBuf::from(value)),
            "output_format" => {
                self.output_format = match value {
                    "table" => OutputFormat::Table,
                    "json" => OutputFormat::Json,
                    "yaml" => OutputFormat::Yaml,
                    _ => return Err(format!("Invalid output format: {}", value)),
                };
            }
            _ => return Err(format!("Unknown config key: {}", key)),
        }
        Ok(())
    }
}
