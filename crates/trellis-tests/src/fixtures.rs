//! Test fixtures for workflows and run contexts.

use trellis_core::pipeline::{MatrixEntry, WorkflowDefinition};
use trellis_core::{RunContext, Secrets};

/// A workflow in the shape of a scientific Python project: a version and
/// OS product, one include that turns on coverage with the optional
/// dependency set, one experimental pre-release job, and docs deployed
/// from the Linux job.
pub const FURY_WORKFLOW: &str = r#"
name: fury
deploy_branch: master
triggers:
  - type: push
    branches: [master, "release/*"]
  - type: pull_request
  - type: schedule
matrix:
  axes:
    python-version: ["3.10", "3.11"]
    os: [ubuntu-latest, macos-latest]
  include:
    - python-version: "3.11"
      os: ubuntu-latest
      depends: OPTIONAL_DEPS
      options: "COVERAGE DEPLOY_DOCS"
    - python-version: "3.12"
      os: ubuntu-latest
      options: "USE_PRE"
      experimental: true
  strict_includes: false
  fail_fast: false
cache:
  prefix: pip
  lockfile: requirements.txt
  paths: [.venv]
commands:
  setup: "python -m venv .venv"
  install: "pip install -r requirements.txt"
  test: "pytest"
  deploy_docs: "make -C docs deploy"
"#;

pub struct WorkflowFixture;

impl WorkflowFixture {
    /// The [`FURY_WORKFLOW`] definition.
    pub fn fury() -> WorkflowDefinition {
        Self::parse(FURY_WORKFLOW)
    }

    /// The smallest valid workflow: one job per `os` value.
    pub fn single_axis(name: &str, os: &[&str]) -> WorkflowDefinition {
        let values = os
            .iter()
            .map(|o| format!("\"{}\"", o))
            .collect::<Vec<_>>()
            .join(", ");
        Self::parse(&format!("name: {}\nmatrix:\n  axes:\n    os: [{}]\n", name, values))
    }

    /// Parse a workflow document, panicking on invalid input.
    pub fn parse(yaml: &str) -> WorkflowDefinition {
        match WorkflowDefinition::from_yaml(yaml) {
            Ok(definition) => definition,
            Err(e) => panic!("invalid fixture workflow: {}", e),
        }
    }
}

pub struct ContextFixture;

impl ContextFixture {
    /// Push to the deploy branch with a docs token.
    pub fn push_master(os: &str) -> RunContext {
        let mut secrets = Secrets::new();
        secrets.insert("DOCS_TOKEN", "ghp_fixture_docs_token");
        RunContext::new(os, "push", "master")
            .with_repository("fury-gl/fury")
            .with_secrets(secrets)
    }

    pub fn pull_request(os: &str) -> RunContext {
        RunContext::new(os, "pull_request", "feature/surface-rendering").with_repository("fury-gl/fury")
    }

    pub fn scheduled(os: &str) -> RunContext {
        RunContext::new(os, "schedule", "master").with_repository("fury-gl/fury")
    }
}

/// Build a matrix entry from string pairs.
pub fn entry(pairs: &[(&str, &str)]) -> MatrixEntry {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect()
}
