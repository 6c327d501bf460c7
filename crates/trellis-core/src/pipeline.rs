//! Workflow definition types.
//!
//! These types represent the user-authored workflow YAML configuration.

use crate::error::{Error, Result};
use crate::gate::Gate;
use crate::run::StepKind;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A matrix field value as written in the workflow (string, number or bool).
pub type MatrixValue = serde_json::Value;

/// Ordered axis-name (or extra field) to value mapping.
pub type MatrixEntry = IndexMap<String, MatrixValue>;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Branch on which documentation is deployed.
    #[serde(default = "default_deploy_branch")]
    pub deploy_branch: String,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub matrix: MatrixConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub flags: FlagsConfig,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub steps: StepOverrides,
    #[serde(default = "default_step_timeout")]
    pub timeout_minutes: u32,
}

fn default_deploy_branch() -> String {
    "master".to_string()
}

fn default_step_timeout() -> u32 {
    60
}

impl WorkflowDefinition {
    /// Parse and validate a workflow document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let definition: WorkflowDefinition = serde_yaml::from_str(content)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Check the settings that can be judged without expanding the matrix.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidWorkflow("workflow name is empty".into()));
        }
        if self.deploy_branch.trim().is_empty() {
            return Err(Error::InvalidWorkflow("deploy_branch is empty".into()));
        }
        if self.matrix.max_parallel == Some(0) {
            return Err(Error::InvalidWorkflow(
                "matrix.max_parallel must be at least 1".into(),
            ));
        }
        for flag in &self.flags.known {
            if flag.is_empty() || flag.chars().any(char::is_whitespace) {
                return Err(Error::InvalidWorkflow(format!(
                    "flag name {:?} must be a single non-empty token",
                    flag
                )));
            }
        }
        if let Some(cache) = &self.cache {
            if cache.lockfile.trim().is_empty() {
                return Err(Error::InvalidWorkflow("cache.lockfile is empty".into()));
            }
            if cache.prefix.contains(['/', '\\']) {
                return Err(Error::InvalidWorkflow(format!(
                    "cache.prefix {:?} must not contain path separators",
                    cache.prefix
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TriggerConfig {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    /// Branch glob patterns; empty matches every branch.
    #[serde(default)]
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Push,
    PullRequest,
    Schedule,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MatrixConfig {
    /// Axes in declaration order; the first axis varies slowest.
    #[serde(default)]
    pub axes: IndexMap<String, Vec<MatrixValue>>,
    #[serde(default)]
    pub include: Vec<MatrixEntry>,
    #[serde(default)]
    pub exclude: Vec<MatrixEntry>,
    #[serde(default = "default_true")]
    pub fail_fast: bool,
    #[serde(default)]
    pub max_parallel: Option<u32>,
    /// Reject include/exclude values that are not declared in their axis.
    #[serde(default = "default_true")]
    pub strict_includes: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            axes: IndexMap::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            fail_fast: true,
            max_parallel: None,
            strict_includes: true,
        }
    }
}

/// Names of the matrix fields the context resolver reads.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResolverConfig {
    #[serde(default = "default_os_axis")]
    pub os_axis: String,
    #[serde(default = "default_dependency_axis")]
    pub dependency_axis: String,
    /// Dependency-axis value that turns on the extended dependency set.
    #[serde(default = "default_extended_marker")]
    pub extended_marker: String,
    #[serde(default = "default_options_axis")]
    pub options_axis: String,
    /// Boolean field that marks a job as allowed to fail.
    #[serde(default = "default_experimental_field")]
    pub experimental_field: String,
}

fn default_os_axis() -> String {
    "os".to_string()
}
fn default_dependency_axis() -> String {
    "depends".to_string()
}
fn default_extended_marker() -> String {
    "OPTIONAL_DEPS".to_string()
}
fn default_options_axis() -> String {
    "options".to_string()
}
fn default_experimental_field() -> String {
    "experimental".to_string()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            os_axis: default_os_axis(),
            dependency_axis: default_dependency_axis(),
            extended_marker: default_extended_marker(),
            options_axis: default_options_axis(),
            experimental_field: default_experimental_field(),
        }
    }
}

/// Flag names recognized in addition to the built-in ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct FlagsConfig {
    #[serde(default)]
    pub known: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheConfig {
    /// Leading component of every cache key.
    #[serde(default = "default_cache_prefix")]
    pub prefix: String,
    /// Dependency manifest whose content hash keys the cache.
    pub lockfile: String,
    /// Workspace paths packed into the cache blob.
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub compression: ArchiveCompression,
}

fn default_cache_prefix() -> String {
    "deps".to_string()
}

/// Compression used for cache blobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveCompression {
    None,
    #[default]
    Zstd,
}

/// Shell command templates for the external actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CommandsConfig {
    #[serde(default)]
    pub setup: Option<String>,
    #[serde(default)]
    pub install: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub deploy_docs: Option<String>,
}

impl CommandsConfig {
    pub fn for_step(&self, kind: StepKind) -> Option<&str> {
        match kind {
            StepKind::CacheRestore => None,
            StepKind::Setup => self.setup.as_deref(),
            StepKind::Install => self.install.as_deref(),
            StepKind::Test => self.test.as_deref(),
            StepKind::DeployDocs => self.deploy_docs.as_deref(),
        }
    }
}

/// Per-step overrides of the default step descriptors.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StepOverrides {
    #[serde(default)]
    pub cache_restore: Option<StepOverride>,
    #[serde(default)]
    pub setup: Option<StepOverride>,
    #[serde(default)]
    pub install: Option<StepOverride>,
    #[serde(default)]
    pub test: Option<StepOverride>,
    #[serde(default)]
    pub deploy_docs: Option<StepOverride>,
}

impl StepOverrides {
    pub fn for_step(&self, kind: StepKind) -> Option<&StepOverride> {
        match kind {
            StepKind::CacheRestore => self.cache_restore.as_ref(),
            StepKind::Setup => self.setup.as_ref(),
            StepKind::Install => self.install.as_ref(),
            StepKind::Test => self.test.as_ref(),
            StepKind::DeployDocs => self.deploy_docs.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StepOverride {
    #[serde(default)]
    pub gate: Option<Gate>,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKFLOW: &str = r#"
name: fury
triggers:
  - type: push
    branches: [master]
  - type: schedule
matrix:
  axes:
    python-version: ["3.8", 3.9]
    os: [ubuntu-latest, macos-latest]
  include:
    - { os: ubuntu-latest, options: "COVERAGE" }
  fail_fast: false
cache:
  lockfile: requirements.txt
  paths: [.pip-cache]
commands:
  test: pytest
steps:
  deploy_docs:
    gate: { when: deploy_branch }
"#;

    #[test]
    fn test_parse_workflow() {
        let def = WorkflowDefinition::from_yaml(WORKFLOW).unwrap();

        assert_eq!(def.name, "fury");
        assert_eq!(def.deploy_branch, "master");
        assert_eq!(def.triggers.len(), 2);
        assert_eq!(def.triggers[1].trigger_type, TriggerType::Schedule);
        assert!(!def.matrix.fail_fast);
        assert!(def.matrix.strict_includes);

        let axes: Vec<&String> = def.matrix.axes.keys().collect();
        assert_eq!(axes, vec!["python-version", "os"]);
        assert_eq!(def.matrix.axes["python-version"][1], serde_json::json!(3.9));

        let cache = def.cache.as_ref().unwrap();
        assert_eq!(cache.prefix, "deps");
        assert_eq!(cache.compression, ArchiveCompression::Zstd);

        assert_eq!(def.commands.for_step(StepKind::Test), Some("pytest"));
        assert_eq!(def.commands.for_step(StepKind::Install), None);
        assert!(matches!(
            def.steps.for_step(StepKind::DeployDocs).and_then(|o| o.gate.as_ref()),
            Some(Gate::DeployBranch)
        ));
    }

    #[test]
    fn test_defaults() {
        let def = WorkflowDefinition::from_yaml("name: minimal").unwrap();
        assert!(def.matrix.axes.is_empty());
        assert!(def.matrix.fail_fast);
        assert_eq!(def.resolver.os_axis, "os");
        assert_eq!(def.resolver.extended_marker, "OPTIONAL_DEPS");
        assert!(def.cache.is_none());
        assert_eq!(def.timeout_minutes, 60);
    }

    #[test]
    fn test_rejects_zero_max_parallel() {
        let err = WorkflowDefinition::from_yaml("name: x\nmatrix:\n  max_parallel: 0\n").unwrap_err();
        assert!(matches!(err, Error::InvalidWorkflow(_)));
    }

    #[test]
    fn test_rejects_multi_token_flag_name() {
        let err =
            WorkflowDefinition::from_yaml("name: x\nflags:\n  known: [\"TWO WORDS\"]\n").unwrap_err();
        assert!(matches!(err, Error::InvalidWorkflow(_)));
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        let err = WorkflowDefinition::from_yaml("name: [unterminated").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
