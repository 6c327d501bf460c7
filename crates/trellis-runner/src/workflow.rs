//! End-to-end run of one workflow: expansion, resolution, trigger check,
//! execution.

use crate::executor::MatrixExecutor;
use crate::runner::{CacheBinding, JobActions, PipelineRunner};
use std::sync::Arc;
use tracing::info;
use trellis_cache::CacheStore;
use trellis_core::pipeline::WorkflowDefinition;
use trellis_core::{ContextResolver, Error, JobDescriptor, Result, RunContext, RunReport};
use trellis_scheduler::{MatrixExpander, TriggerMatcher};

/// Expand the workflow matrix and resolve every job against `ctx`.
///
/// Configuration errors surface here, before any job starts.
pub fn plan(definition: &WorkflowDefinition, ctx: &RunContext) -> Result<Vec<JobDescriptor>> {
    let expansion = MatrixExpander::new().expand(&definition.matrix, &definition.name)?;
    let resolver = ContextResolver::from_workflow(definition);
    Ok(expansion
        .jobs
        .into_iter()
        .map(|job| resolver.resolve_job(job, ctx))
        .collect())
}

/// Builder for a single invocation of a workflow.
pub struct WorkflowRun {
    definition: WorkflowDefinition,
    cache: Option<(Arc<dyn CacheStore>, String)>,
    job_filter: Option<usize>,
    force: bool,
}

impl WorkflowRun {
    pub fn new(definition: WorkflowDefinition) -> Self {
        Self {
            definition,
            cache: None,
            job_filter: None,
            force: false,
        }
    }

    /// Use `store` for the dependency cache, keyed by `lockfile_hash`.
    /// Ignored when the workflow has no `cache` section.
    pub fn with_cache(mut self, store: Arc<dyn CacheStore>, lockfile_hash: impl Into<String>) -> Self {
        self.cache = Some((store, lockfile_hash.into()));
        self
    }

    /// Run only the job with this index.
    pub fn with_job(mut self, index: Option<usize>) -> Self {
        self.job_filter = index;
        self
    }

    /// Run even when no trigger matches the context.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// Execute the workflow. Returns `None` when the workflow is not
    /// triggered by `ctx`. Configuration errors are reported either way.
    pub async fn execute(&self, ctx: &RunContext, actions: Arc<dyn JobActions>) -> Result<Option<RunReport>> {
        let mut jobs = plan(&self.definition, ctx)?;
        if let Some(index) = self.job_filter {
            jobs.retain(|job| job.index == index);
            if jobs.is_empty() {
                return Err(Error::InvalidMatrix(format!("no job with index {}", index)));
            }
        }

        if !self.force && !TriggerMatcher::new().matches(&self.definition, ctx) {
            info!(workflow = %self.definition.name, event = %ctx.event, branch = %ctx.branch, "Workflow not triggered");
            return Ok(None);
        }

        let mut runner = PipelineRunner::from_workflow(&self.definition, actions);
        if let (Some(settings), Some((store, hash))) = (&self.definition.cache, &self.cache) {
            runner = runner.with_cache(CacheBinding::new(Arc::clone(store), &settings.prefix, hash));
        }

        let executor = MatrixExecutor::new(Arc::new(runner))
            .with_fail_fast(self.definition.matrix.fail_fast)
            .with_max_parallel(self.definition.matrix.max_parallel);

        executor
            .run(&self.definition.name, jobs, ctx)
            .await
            .map(Some)
    }
}
