//! Run context and its resolution into job environment variables.
//!
//! The [`RunContext`] is built once per invocation and passed explicitly to
//! every component; nothing here reads the process environment.

use crate::flags::FlagParser;
use crate::pipeline::{ResolverConfig, WorkflowDefinition};
use crate::run::JobDescriptor;
use crate::secrets::Secrets;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Current and legacy names for the OS fact.
pub const OS_VARS: [&str; 2] = ["CI_OS_NAME", "TRAVIS_OS_NAME"];
/// Current and legacy names for the trigger event fact.
pub const EVENT_VARS: [&str; 2] = ["CI_EVENT_TYPE", "TRAVIS_EVENT_TYPE"];
/// Current and legacy names for the branch fact.
pub const BRANCH_VARS: [&str; 2] = ["CI_BRANCH", "TRAVIS_BRANCH"];
/// Current and legacy names for the repository fact.
pub const REPOSITORY_VARS: [&str; 2] = ["CI_REPOSITORY", "TRAVIS_REPO_SLUG"];
/// Current and legacy names for the extended-dependencies flag.
pub const EXTENDED_DEPS_VARS: [&str; 2] = ["EXTENDED_DEPS", "INSTALL_OPTIONAL_DEPS"];

/// Kind of event that triggered the run. Unrecognized identifiers are kept
/// verbatim in [`EventKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Push,
    PullRequest,
    Schedule,
    Manual,
    Other(String),
}

impl EventKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "push" => EventKind::Push,
            "pull_request" | "pull-request" => EventKind::PullRequest,
            "schedule" | "scheduled" | "cron" => EventKind::Schedule,
            "workflow_dispatch" | "manual" => EventKind::Manual,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::Schedule => "schedule",
            EventKind::Manual => "workflow_dispatch",
            EventKind::Other(raw) => raw,
        }
    }
}

impl FromStr for EventKind {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<String> for EventKind {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating-system family of a runner identifier such as `macos-latest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsFamily {
    Linux,
    Macos,
    Windows,
    Other,
}

impl OsFamily {
    pub fn classify(identifier: &str) -> Self {
        let id = identifier.trim().to_ascii_lowercase();
        if id.starts_with("macos") || id.starts_with("osx") || id.starts_with("darwin") {
            OsFamily::Macos
        } else if id.starts_with("ubuntu") || id.starts_with("linux") || id.starts_with("debian") {
            OsFamily::Linux
        } else if id.starts_with("windows") || id.starts_with("win") {
            OsFamily::Windows
        } else {
            OsFamily::Other
        }
    }
}

/// Normalized OS name: every macOS variant becomes `osx`, anything else
/// passes through unchanged.
pub fn os_alias(identifier: &str) -> String {
    match OsFamily::classify(identifier) {
        OsFamily::Macos => "osx".to_string(),
        _ => identifier.to_string(),
    }
}

/// Normalized event name: scheduled runs become `cron`, anything else
/// passes through unchanged.
pub fn event_alias(raw: &str) -> String {
    match EventKind::parse(raw) {
        EventKind::Schedule => "cron".to_string(),
        _ => raw.to_string(),
    }
}

/// Ambient facts of one invocation. Read-only for the whole run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Runner OS identifier, used when a job has no OS field of its own.
    pub os: String,
    /// Trigger event identifier as supplied by the invoking platform.
    pub event: String,
    pub branch: String,
    pub repository: Option<String>,
    pub secrets: Secrets,
}

impl RunContext {
    pub fn new(os: impl Into<String>, event: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            event: event.into(),
            branch: branch.into(),
            repository: None,
            secrets: Secrets::new(),
        }
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn with_secrets(mut self, secrets: Secrets) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn event_kind(&self) -> EventKind {
        EventKind::parse(&self.event)
    }
}

/// Turns a bare expanded job plus the run context into a resolved job:
/// derived flags, environment variables and the continue-on-error marker.
#[derive(Debug, Clone)]
pub struct ContextResolver {
    config: ResolverConfig,
    flags: FlagParser,
}

impl ContextResolver {
    pub fn new(config: ResolverConfig, flags: FlagParser) -> Self {
        Self { config, flags }
    }

    pub fn from_workflow(definition: &WorkflowDefinition) -> Self {
        Self::new(
            definition.resolver.clone(),
            FlagParser::with_builtin(definition.flags.known.iter().cloned()),
        )
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn effective_os(&self, job: &JobDescriptor, ctx: &RunContext) -> String {
        effective_os(job, ctx, &self.config.os_axis)
    }

    pub fn derive_flags(&self, job: &JobDescriptor) -> BTreeMap<String, bool> {
        let options = job.value_str(&self.config.options_axis);
        self.flags.parse(options.as_deref())
    }

    pub fn extended_deps(&self, job: &JobDescriptor) -> bool {
        job.value_str(&self.config.dependency_axis).as_deref()
            == Some(self.config.extended_marker.as_str())
    }

    /// Environment for `job` under `ctx`.
    ///
    /// Every job field is exported under its upper-cased name, then the
    /// flags, then the ambient facts under both current and legacy names.
    pub fn resolve(&self, job: &JobDescriptor, ctx: &RunContext) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        for (field, value) in &job.values {
            env.insert(env_name(field), crate::run::render_value(value));
        }

        let flags = if job.flags.is_empty() {
            self.derive_flags(job)
        } else {
            job.flags.clone()
        };
        for (flag, on) in flags {
            env.insert(flag, if on { "1" } else { "0" }.to_string());
        }

        let os = os_alias(&self.effective_os(job, ctx));
        let event = event_alias(&ctx.event);
        let extended = self.extended_deps(job).to_string();

        for name in OS_VARS {
            env.insert(name.to_string(), os.clone());
        }
        for name in EVENT_VARS {
            env.insert(name.to_string(), event.clone());
        }
        for name in BRANCH_VARS {
            env.insert(name.to_string(), ctx.branch.clone());
        }
        if let Some(repository) = &ctx.repository {
            for name in REPOSITORY_VARS {
                env.insert(name.to_string(), repository.clone());
            }
        }
        for name in EXTENDED_DEPS_VARS {
            env.insert(name.to_string(), extended.clone());
        }

        env
    }

    /// Attach flags, environment and continue-on-error to a bare job.
    pub fn resolve_job(&self, job: JobDescriptor, ctx: &RunContext) -> JobDescriptor {
        let flags = self.derive_flags(&job);
        let continue_on_error = match job.value(&self.config.experimental_field) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => s == "true",
            _ => false,
        };
        let job = job.with_flags(flags);
        let env = self.resolve(&job, ctx);
        job.with_env(env).with_continue_on_error(continue_on_error)
    }
}

impl Default for ContextResolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default(), FlagParser::default())
    }
}

/// The job's own OS field when present, else the runner OS.
pub fn effective_os(job: &JobDescriptor, ctx: &RunContext, os_axis: &str) -> String {
    job.value_str(os_axis)
        .filter(|os| !os.is_empty())
        .unwrap_or_else(|| ctx.os.clone())
}

/// Environment variable name for a matrix field: `python-version` becomes
/// `PYTHON_VERSION`.
pub fn env_name(field: &str) -> String {
    field
        .chars()
        .map(|c| match c {
            '-' | '.' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::MatrixEntry;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn job(pairs: &[(&str, serde_json::Value)]) -> JobDescriptor {
        let values: MatrixEntry = pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        JobDescriptor::new(0, "job", values)
    }

    fn ctx(os: &str, event: &str) -> RunContext {
        RunContext::new(os, event, "master").with_repository("fury-gl/fury")
    }

    #[test]
    fn test_os_alias() {
        assert_eq!(os_alias("macos-latest"), "osx");
        assert_eq!(os_alias("macOS-12"), "osx");
        assert_eq!(os_alias("ubuntu-latest"), "ubuntu-latest");
        assert_eq!(os_alias("windows-2022"), "windows-2022");
        assert_eq!(os_alias("plan9"), "plan9");
    }

    #[test]
    fn test_event_alias() {
        assert_eq!(event_alias("schedule"), "cron");
        assert_eq!(event_alias("scheduled"), "cron");
        assert_eq!(event_alias("push"), "push");
        assert_eq!(event_alias("pull_request"), "pull_request");
        assert_eq!(event_alias("repository_dispatch"), "repository_dispatch");
    }

    #[test]
    fn test_event_kind_parse() {
        assert_eq!(EventKind::parse("pull-request"), EventKind::PullRequest);
        assert_eq!(EventKind::parse("workflow_dispatch"), EventKind::Manual);
        assert_eq!(
            EventKind::parse("release"),
            EventKind::Other("release".to_string())
        );
        let parsed: EventKind = serde_json::from_str("\"cron\"").unwrap();
        assert_eq!(parsed, EventKind::Schedule);
    }

    #[test]
    fn test_legacy_and_current_names_agree() {
        let resolver = ContextResolver::default();
        for (os, event) in [
            ("macos-latest", "push"),
            ("ubuntu-latest", "schedule"),
            ("windows-latest", "pull_request"),
            ("haiku", "something-new"),
        ] {
            let env = resolver.resolve(&job(&[]), &ctx(os, event));
            for pair in [OS_VARS, EVENT_VARS, BRANCH_VARS, REPOSITORY_VARS, EXTENDED_DEPS_VARS] {
                assert_eq!(env[pair[0]], env[pair[1]], "{:?} for {}/{}", pair, os, event);
            }
        }
    }

    #[test]
    fn test_macos_resolves_to_osx() {
        let resolver = ContextResolver::default();
        let env = resolver.resolve(&job(&[]), &ctx("macos-latest", "push"));
        assert_eq!(env["CI_OS_NAME"], "osx");
        assert_eq!(env["TRAVIS_OS_NAME"], "osx");
    }

    #[test]
    fn test_job_os_overrides_runner_os() {
        let resolver = ContextResolver::default();
        let job = job(&[("os", json!("macos-13"))]);
        let env = resolver.resolve(&job, &ctx("ubuntu-latest", "push"));
        assert_eq!(env["CI_OS_NAME"], "osx");
        assert_eq!(env["OS"], "macos-13");
    }

    #[test]
    fn test_extended_deps_flag() {
        let resolver = ContextResolver::default();
        let optional = job(&[("depends", json!("OPTIONAL_DEPS"))]);
        let default = job(&[("depends", json!("DEFAULT_DEPS"))]);
        let run = ctx("ubuntu-latest", "push");

        assert_eq!(resolver.resolve(&optional, &run)["EXTENDED_DEPS"], "true");
        assert_eq!(resolver.resolve(&default, &run)["EXTENDED_DEPS"], "false");
        assert_eq!(resolver.resolve(&job(&[]), &run)["INSTALL_OPTIONAL_DEPS"], "false");
    }

    #[test]
    fn test_fields_and_flags_exported() {
        let resolver = ContextResolver::default();
        let job = job(&[
            ("python-version", json!(3.9)),
            ("pip-flags", json!("--pre")),
            ("options", json!("COVERAGE")),
        ]);
        let env = resolver.resolve(&job, &ctx("ubuntu-latest", "push"));

        assert_eq!(env["PYTHON_VERSION"], "3.9");
        assert_eq!(env["PIP_FLAGS"], "--pre");
        assert_eq!(env["COVERAGE"], "1");
        assert_eq!(env["BUILD_DOCS"], "0");
        assert_eq!(env["CI_BRANCH"], "master");
        assert_eq!(env["CI_REPOSITORY"], "fury-gl/fury");
    }

    #[test]
    fn test_repository_vars_absent_without_repository() {
        let resolver = ContextResolver::default();
        let env = resolver.resolve(&job(&[]), &RunContext::new("ubuntu", "push", "main"));
        assert!(!env.contains_key("CI_REPOSITORY"));
        assert!(!env.contains_key("TRAVIS_REPO_SLUG"));
    }

    #[test]
    fn test_resolve_job_sets_flags_and_continue_on_error() {
        let resolver = ContextResolver::default();
        let bare = job(&[("options", json!("DEPLOY_DOCS")), ("experimental", json!(true))]);
        let resolved = resolver.resolve_job(bare, &ctx("ubuntu-latest", "push"));

        assert!(resolved.flag("DEPLOY_DOCS"));
        assert!(!resolved.flag("COVERAGE"));
        assert!(resolved.continue_on_error);
        assert_eq!(resolved.env["DEPLOY_DOCS"], "1");
    }

    #[test]
    fn test_resolution_is_pure() {
        let resolver = ContextResolver::default();
        let job = job(&[("os", json!("macos-latest")), ("options", json!("USE_PRE"))]);
        let run = ctx("ubuntu-latest", "schedule");
        assert_eq!(resolver.resolve(&job, &run), resolver.resolve(&job, &run));
    }

    #[test]
    fn test_env_name() {
        assert_eq!(env_name("python-version"), "PYTHON_VERSION");
        assert_eq!(env_name("install.type"), "INSTALL_TYPE");
        assert_eq!(env_name("os"), "OS");
    }
}
