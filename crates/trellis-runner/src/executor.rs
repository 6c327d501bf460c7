//! Parallel execution of an expanded matrix.

use crate::runner::PipelineRunner;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use trellis_core::{Error, JobDescriptor, JobReport, JobStatus, Result, RunContext, RunId, RunReport};

/// Runs every job of a matrix on the tokio runtime.
///
/// At most `max_parallel` jobs run at once. With `fail_fast`, the first
/// failing job (one without `continue_on_error`) cancels every job that
/// has not started yet; running jobs are left to finish.
pub struct MatrixExecutor {
    runner: Arc<PipelineRunner>,
    fail_fast: bool,
    max_parallel: Option<u32>,
}

impl MatrixExecutor {
    pub fn new(runner: Arc<PipelineRunner>) -> Self {
        Self {
            runner,
            fail_fast: true,
            max_parallel: None,
        }
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: Option<u32>) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub async fn run(&self, workflow: &str, jobs: Vec<JobDescriptor>, ctx: &RunContext) -> Result<RunReport> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let start = Instant::now();

        let permits = self
            .max_parallel
            .map(|n| n.max(1) as usize)
            .unwrap_or(Semaphore::MAX_PERMITS);
        let semaphore = Arc::new(Semaphore::new(permits));
        let cancelled = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(ctx.clone());

        info!(%run_id, workflow, jobs = jobs.len(), max_parallel = ?self.max_parallel, fail_fast = self.fail_fast, "Starting run");

        let mut join_set = JoinSet::new();
        for job in jobs {
            let runner = Arc::clone(&self.runner);
            let semaphore = Arc::clone(&semaphore);
            let cancelled = Arc::clone(&cancelled);
            let ctx = Arc::clone(&ctx);
            let fail_fast = self.fail_fast;

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return JobReport::cancelled(&job);
                };
                if cancelled.load(Ordering::SeqCst) {
                    info!(job = %job.display_name, "Job cancelled by fail-fast");
                    return JobReport::cancelled(&job);
                }

                let task = {
                    let job = job.clone();
                    tokio::spawn(async move { runner.run(&job, &ctx).await })
                };
                let report = match task.await {
                    Ok(report) => report,
                    Err(e) => {
                        error!(job = %job.display_name, error = %e, "Job task aborted");
                        JobReport::aborted(&job)
                    }
                };
                if fail_fast && report.status == JobStatus::Failure && !job.continue_on_error {
                    warn!(job = %job.display_name, "Job failed, cancelling pending jobs");
                    cancelled.store(true, Ordering::SeqCst);
                }
                report
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let report = joined.map_err(|e| Error::Internal(format!("job task failed: {}", e)))?;
            reports.push(report);
        }

        let report = RunReport::new(
            run_id,
            workflow,
            started_at,
            start.elapsed().as_millis() as u64,
            reports,
        );
        info!(
            %run_id,
            success = report.success,
            succeeded = report.count(JobStatus::Success),
            failed = report.count(JobStatus::Failure),
            cancelled = report.count(JobStatus::Cancelled),
            "Run finished"
        );
        Ok(report)
    }
}
