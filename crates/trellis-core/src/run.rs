//! Job and run execution types.

use crate::ids::RunId;
use crate::pipeline::{MatrixEntry, MatrixValue};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The fixed steps of every job, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    CacheRestore,
    Setup,
    Install,
    Test,
    DeployDocs,
}

impl StepKind {
    pub const ORDER: [StepKind; 5] = [
        StepKind::CacheRestore,
        StepKind::Setup,
        StepKind::Install,
        StepKind::Test,
        StepKind::DeployDocs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::CacheRestore => "cache_restore",
            StepKind::Setup => "setup",
            StepKind::Install => "install",
            StepKind::Test => "test",
            StepKind::DeployDocs => "deploy_docs",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepResult {
    Skipped,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StepRecord {
    pub kind: StepKind,
    pub result: StepResult,
    pub duration_ms: u64,
}

/// Render a matrix value the way it appears in environment variables and
/// display names: strings verbatim, null as empty, anything else as JSON.
pub fn render_value(value: &MatrixValue) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A concrete job produced by matrix expansion.
///
/// `flags` and `env` start empty and are filled once by the resolution
/// stage; after that the descriptor is only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub index: usize,
    pub display_name: String,
    pub values: MatrixEntry,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub continue_on_error: bool,
}

impl JobDescriptor {
    pub fn new(index: usize, display_name: impl Into<String>, values: MatrixEntry) -> Self {
        Self {
            index,
            display_name: display_name.into(),
            values,
            flags: BTreeMap::new(),
            env: BTreeMap::new(),
            continue_on_error: false,
        }
    }

    pub fn value(&self, field: &str) -> Option<&MatrixValue> {
        self.values.get(field)
    }

    pub fn value_str(&self, field: &str) -> Option<String> {
        self.values.get(field).map(render_value)
    }

    /// Whether a derived flag is set. Unknown flags read as false.
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    pub fn with_flags(mut self, flags: BTreeMap<String, bool>) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failure,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobReport {
    pub index: usize,
    pub display_name: String,
    pub status: JobStatus,
    pub continue_on_error: bool,
    pub steps: Vec<StepRecord>,
}

impl JobReport {
    /// Report for a job whose steps ran; failed iff any step failed.
    pub fn completed(job: &JobDescriptor, steps: Vec<StepRecord>) -> Self {
        let status = if steps.iter().any(|s| s.result == StepResult::Failed) {
            JobStatus::Failure
        } else {
            JobStatus::Success
        };
        Self {
            index: job.index,
            display_name: job.display_name.clone(),
            status,
            continue_on_error: job.continue_on_error,
            steps,
        }
    }

    /// Report for a job that never started.
    pub fn cancelled(job: &JobDescriptor) -> Self {
        Self {
            index: job.index,
            display_name: job.display_name.clone(),
            status: JobStatus::Cancelled,
            continue_on_error: job.continue_on_error,
            steps: Vec::new(),
        }
    }

    /// Report for a job whose task died before producing step records.
    pub fn aborted(job: &JobDescriptor) -> Self {
        Self {
            status: JobStatus::Failure,
            ..Self::cancelled(job)
        }
    }

    /// Whether this job makes the whole run fail.
    pub fn fails_run(&self) -> bool {
        self.status == JobStatus::Failure && !self.continue_on_error
    }

    pub fn results(&self) -> Vec<StepResult> {
        self.steps.iter().map(|s| s.result).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    pub run_id: RunId,
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub jobs: Vec<JobReport>,
    pub success: bool,
}

impl RunReport {
    /// Assemble a report; jobs are ordered by index.
    pub fn new(
        run_id: RunId,
        workflow: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        mut jobs: Vec<JobReport>,
    ) -> Self {
        jobs.sort_by_key(|j| j.index);
        let success = !jobs.iter().any(JobReport::fails_run);
        Self {
            run_id,
            workflow: workflow.into(),
            started_at,
            duration_ms,
            jobs,
            success,
        }
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(index: usize) -> JobDescriptor {
        let mut values = MatrixEntry::new();
        values.insert("os".into(), json!("ubuntu-latest"));
        values.insert("python-version".into(), json!(3.9));
        JobDescriptor::new(index, format!("job {}", index), values)
    }

    fn record(kind: StepKind, result: StepResult) -> StepRecord {
        StepRecord {
            kind,
            result,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&json!("3.8")), "3.8");
        assert_eq!(render_value(&json!(3.9)), "3.9");
        assert_eq!(render_value(&json!(true)), "true");
        assert_eq!(render_value(&json!(null)), "");
    }

    #[test]
    fn test_job_value_access() {
        let job = job(0);
        assert_eq!(job.value_str("python-version").as_deref(), Some("3.9"));
        assert_eq!(job.value_str("missing"), None);
        assert!(!job.flag("COVERAGE"));
    }

    #[test]
    fn test_skips_do_not_fail_a_job() {
        let report = JobReport::completed(
            &job(0),
            vec![
                record(StepKind::CacheRestore, StepResult::Succeeded),
                record(StepKind::DeployDocs, StepResult::Skipped),
            ],
        );
        assert_eq!(report.status, JobStatus::Success);
    }

    #[test]
    fn test_run_success_ignores_continue_on_error_jobs() {
        let failing = vec![record(StepKind::Test, StepResult::Failed)];
        let experimental =
            JobReport::completed(&job(1).with_continue_on_error(true), failing.clone());
        let ok = JobReport::completed(&job(0), vec![record(StepKind::Test, StepResult::Succeeded)]);

        let report = RunReport::new(RunId::new(), "wf", Utc::now(), 0, vec![experimental, ok]);
        assert!(report.success);
        assert_eq!(report.jobs[0].index, 0);
        assert_eq!(report.count(JobStatus::Failure), 1);

        let strict = JobReport::completed(&job(2), failing);
        let report = RunReport::new(RunId::new(), "wf", Utc::now(), 0, vec![strict]);
        assert!(!report.success);
    }

    #[test]
    fn test_cancelled_job_does_not_fail_run_by_itself() {
        let report = RunReport::new(RunId::new(), "wf", Utc::now(), 0, vec![JobReport::cancelled(&job(0))]);
        assert!(report.success);
        assert!(report.jobs[0].steps.is_empty());
    }

    #[test]
    fn test_step_order() {
        let names: Vec<&str> = StepKind::ORDER.iter().map(StepKind::as_str).collect();
        assert_eq!(names, vec!["cache_restore", "setup", "install", "test", "deploy_docs"]);
    }
}
