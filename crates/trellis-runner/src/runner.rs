//! Per-job step sequencing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{Duration, timeout};
use tracing::{debug, error, info, warn};
use trellis_cache::{CacheKey, CacheStore, SaveOutcome};
use trellis_core::gate::{GateEvaluator, StepDescriptor};
use trellis_core::pipeline::WorkflowDefinition;
use trellis_core::{
    ContextResolver, Error, JobDescriptor, JobReport, Result, RunContext, StepKind, StepRecord, StepResult,
};

/// External collaborators that do the actual work of a job.
///
/// `run_step` is called for every step except cache restore; an `Err` is
/// recorded as a failed step.
#[async_trait]
pub trait JobActions: Send + Sync {
    async fn run_step(&self, step: &StepDescriptor, job: &JobDescriptor, ctx: &RunContext) -> Result<()>;

    /// Produce the dependency blob to cache after a successful test step.
    async fn export_cache(&self, job: &JobDescriptor) -> Result<Vec<u8>>;

    /// Install a dependency blob restored from the cache.
    async fn import_cache(&self, job: &JobDescriptor, blob: &[u8]) -> Result<()>;
}

/// Where and under which lockfile hash a job's dependency cache lives.
#[derive(Clone)]
pub struct CacheBinding {
    pub store: Arc<dyn CacheStore>,
    pub prefix: String,
    pub lockfile_hash: String,
}

impl CacheBinding {
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>, lockfile_hash: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            lockfile_hash: lockfile_hash.into(),
        }
    }

    pub fn key_for(&self, os: &str) -> CacheKey {
        CacheKey::for_os(&self.prefix, os, &self.lockfile_hash)
    }
}

/// Runs the fixed step plan of one job.
pub struct PipelineRunner {
    steps: Vec<StepDescriptor>,
    gates: GateEvaluator,
    resolver: ContextResolver,
    actions: Arc<dyn JobActions>,
    cache: Option<CacheBinding>,
}

impl PipelineRunner {
    pub fn new(
        steps: Vec<StepDescriptor>,
        gates: GateEvaluator,
        resolver: ContextResolver,
        actions: Arc<dyn JobActions>,
    ) -> Self {
        Self {
            steps,
            gates,
            resolver,
            actions,
            cache: None,
        }
    }

    pub fn from_workflow(definition: &WorkflowDefinition, actions: Arc<dyn JobActions>) -> Self {
        Self::new(
            StepDescriptor::for_workflow(definition),
            GateEvaluator::from_workflow(definition),
            ContextResolver::from_workflow(definition),
            actions,
        )
    }

    pub fn with_cache(mut self, cache: CacheBinding) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn steps(&self) -> &[StepDescriptor] {
        &self.steps
    }

    /// Run every step of `job` in order and report the outcome.
    ///
    /// Never returns an error: action failures become failed steps and
    /// cache problems are logged.
    pub async fn run(&self, job: &JobDescriptor, ctx: &RunContext) -> JobReport {
        let mut records: Vec<StepRecord> = Vec::with_capacity(self.steps.len());
        info!(job = %job.display_name, "Starting job");

        for step in &self.steps {
            let start = Instant::now();

            let result = match self.gates.first_unmet(&step.gate, job, ctx, &records) {
                Some(unmet) => {
                    info!(job = %job.display_name, step = %step.kind, unmet = ?unmet, "Step skipped");
                    StepResult::Skipped
                }
                None if step.kind == StepKind::CacheRestore => self.restore_cache(job, ctx).await,
                None => self.execute(step, job, ctx).await,
            };

            records.push(StepRecord {
                kind: step.kind,
                result,
                duration_ms: start.elapsed().as_millis() as u64,
            });

            if step.kind == StepKind::Test && result == StepResult::Succeeded {
                self.save_cache(job, ctx).await;
            }
        }

        let report = JobReport::completed(job, records);
        info!(job = %job.display_name, status = ?report.status, "Job finished");
        report
    }

    async fn execute(&self, step: &StepDescriptor, job: &JobDescriptor, ctx: &RunContext) -> StepResult {
        let limit = Duration::from_secs(u64::from(step.timeout_minutes) * 60);
        debug!(job = %job.display_name, step = %step.kind, "Running step");

        match timeout(limit, self.actions.run_step(step, job, ctx)).await {
            Ok(Ok(())) => StepResult::Succeeded,
            Ok(Err(e)) => {
                error!(job = %job.display_name, step = %step.kind, error = %ctx.secrets.mask(&e.to_string()), "Step failed");
                StepResult::Failed
            }
            Err(_) => {
                let e = Error::StepTimeout {
                    minutes: step.timeout_minutes,
                };
                warn!(job = %job.display_name, step = %step.kind, error = %e, "Step timed out");
                StepResult::Failed
            }
        }
    }

    /// A cold or unreadable cache never fails the job.
    async fn restore_cache(&self, job: &JobDescriptor, ctx: &RunContext) -> StepResult {
        let Some(cache) = &self.cache else {
            debug!(job = %job.display_name, "No cache configured");
            return StepResult::Succeeded;
        };

        let key = cache.key_for(&self.resolver.effective_os(job, ctx)).to_string();
        match cache.store.get(&key).await {
            Ok(Some(blob)) => match self.actions.import_cache(job, &blob).await {
                Ok(()) => info!(job = %job.display_name, key = %key, bytes = blob.len(), "Cache restored"),
                Err(e) => warn!(job = %job.display_name, key = %key, error = %e, "Cache import failed"),
            },
            Ok(None) => info!(job = %job.display_name, key = %key, "Cache miss"),
            Err(e) => warn!(job = %job.display_name, key = %key, error = %e, "Cache lookup failed"),
        }
        StepResult::Succeeded
    }

    async fn save_cache(&self, job: &JobDescriptor, ctx: &RunContext) {
        let Some(cache) = &self.cache else {
            return;
        };

        let key = cache.key_for(&self.resolver.effective_os(job, ctx)).to_string();
        match cache.store.exists(&key).await {
            Ok(true) => {
                debug!(job = %job.display_name, key = %key, "Cache entry already present");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(job = %job.display_name, key = %key, error = %e, "Cache lookup failed");
                return;
            }
        }

        let blob = match self.actions.export_cache(job).await {
            Ok(blob) => blob,
            Err(e) => {
                warn!(job = %job.display_name, key = %key, error = %e, "Cache export failed");
                return;
            }
        };

        match cache.store.put_if_absent(&key, blob).await {
            Ok(SaveOutcome::Stored(entry)) => {
                info!(job = %job.display_name, key = %key, bytes = entry.size_bytes, "Cache saved")
            }
            Ok(SaveOutcome::AlreadyPresent) => {
                debug!(job = %job.display_name, key = %key, "Cache entry already present")
            }
            Err(e) => warn!(job = %job.display_name, key = %key, error = %e, "Cache save failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use trellis_cache::MemoryStore;
    use trellis_core::pipeline::MatrixEntry;
    use trellis_core::JobStatus;

    #[derive(Default)]
    struct Scripted {
        failing: BTreeSet<StepKind>,
        calls: Mutex<Vec<StepKind>>,
        imported: Mutex<Vec<Vec<u8>>>,
    }

    impl Scripted {
        fn failing(kinds: &[StepKind]) -> Self {
            Self {
                failing: kinds.iter().copied().collect(),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<StepKind> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobActions for Scripted {
        async fn run_step(&self, step: &StepDescriptor, _job: &JobDescriptor, _ctx: &RunContext) -> Result<()> {
            self.calls.lock().unwrap().push(step.kind);
            if self.failing.contains(&step.kind) {
                return Err(Error::ActionFailed(format!("{} failed", step.kind)));
            }
            Ok(())
        }

        async fn export_cache(&self, _job: &JobDescriptor) -> Result<Vec<u8>> {
            Ok(b"site-packages".to_vec())
        }

        async fn import_cache(&self, _job: &JobDescriptor, blob: &[u8]) -> Result<()> {
            self.imported.lock().unwrap().push(blob.to_vec());
            Ok(())
        }
    }

    fn workflow() -> WorkflowDefinition {
        WorkflowDefinition::from_yaml("name: fury\ncache:\n  prefix: pip\n  lockfile: requirements.txt\n").unwrap()
    }

    fn deploy_job() -> JobDescriptor {
        let mut values = MatrixEntry::new();
        values.insert("os".into(), json!("ubuntu-latest"));
        values.insert("options".into(), json!("DEPLOY_DOCS"));
        let job = JobDescriptor::new(0, "fury (os=ubuntu-latest)", values);
        ContextResolver::from_workflow(&workflow()).resolve_job(job, &push_to_master())
    }

    fn push_to_master() -> RunContext {
        RunContext::new("ubuntu-latest", "push", "master")
    }

    fn results(report: &JobReport) -> Vec<(StepKind, StepResult)> {
        report.steps.iter().map(|s| (s.kind, s.result)).collect()
    }

    #[tokio::test]
    async fn test_all_steps_run_on_deploy_push() {
        let actions = Arc::new(Scripted::default());
        let runner = PipelineRunner::from_workflow(&workflow(), actions.clone());

        let report = runner.run(&deploy_job(), &push_to_master()).await;

        assert_eq!(report.status, JobStatus::Success);
        assert_eq!(report.results(), vec![StepResult::Succeeded; 5]);
        assert_eq!(
            actions.calls(),
            vec![StepKind::Setup, StepKind::Install, StepKind::Test, StepKind::DeployDocs]
        );
    }

    #[tokio::test]
    async fn test_failure_skips_dependent_steps() {
        let actions = Arc::new(Scripted::failing(&[StepKind::Install]));
        let runner = PipelineRunner::from_workflow(&workflow(), actions.clone());

        let report = runner.run(&deploy_job(), &push_to_master()).await;

        assert_eq!(report.status, JobStatus::Failure);
        assert_eq!(
            results(&report),
            vec![
                (StepKind::CacheRestore, StepResult::Succeeded),
                (StepKind::Setup, StepResult::Succeeded),
                (StepKind::Install, StepResult::Failed),
                (StepKind::Test, StepResult::Skipped),
                (StepKind::DeployDocs, StepResult::Skipped),
            ]
        );
        assert_eq!(actions.calls(), vec![StepKind::Setup, StepKind::Install]);
    }

    #[tokio::test]
    async fn test_deploy_skipped_off_deploy_branch() {
        let actions = Arc::new(Scripted::default());
        let runner = PipelineRunner::from_workflow(&workflow(), actions.clone());
        let ctx = RunContext::new("ubuntu-latest", "push", "feature/docs");

        let report = runner.run(&deploy_job(), &ctx).await;

        assert_eq!(report.status, JobStatus::Success);
        assert_eq!(report.steps[4].result, StepResult::Skipped);
        assert!(!actions.calls().contains(&StepKind::DeployDocs));
    }

    #[tokio::test]
    async fn test_cache_saved_after_test_and_restored_next_run() {
        let store = Arc::new(MemoryStore::new());
        let binding = CacheBinding::new(store.clone(), "pip", "abcd");

        let actions = Arc::new(Scripted::default());
        let runner = PipelineRunner::from_workflow(&workflow(), actions.clone()).with_cache(binding.clone());

        runner.run(&deploy_job(), &push_to_master()).await;
        assert!(store.exists("pip-linux-abcd").await.unwrap());
        assert!(actions.imported.lock().unwrap().is_empty());

        let second = Arc::new(Scripted::default());
        let runner = PipelineRunner::from_workflow(&workflow(), second.clone()).with_cache(binding);
        runner.run(&deploy_job(), &push_to_master()).await;
        assert_eq!(*second.imported.lock().unwrap(), vec![b"site-packages".to_vec()]);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_cache_not_saved_when_tests_fail() {
        let store = Arc::new(MemoryStore::new());
        let actions = Arc::new(Scripted::failing(&[StepKind::Test]));
        let runner = PipelineRunner::from_workflow(&workflow(), actions)
            .with_cache(CacheBinding::new(store.clone(), "pip", "abcd"));

        let report = runner.run(&deploy_job(), &push_to_master()).await;

        assert_eq!(report.status, JobStatus::Failure);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_fails_step() {
        struct Hangs;

        #[async_trait]
        impl JobActions for Hangs {
            async fn run_step(&self, _: &StepDescriptor, _: &JobDescriptor, _: &RunContext) -> Result<()> {
                std::future::pending::<()>().await;
                Ok(())
            }
            async fn export_cache(&self, _: &JobDescriptor) -> Result<Vec<u8>> {
                Ok(Vec::new())
            }
            async fn import_cache(&self, _: &JobDescriptor, _: &[u8]) -> Result<()> {
                Ok(())
            }
        }

        let runner = PipelineRunner::from_workflow(&workflow(), Arc::new(Hangs));
        let report = runner.run(&deploy_job(), &push_to_master()).await;

        assert_eq!(report.steps[1].result, StepResult::Failed);
        assert_eq!(report.steps[2].result, StepResult::Skipped);
    }
}
