//! Scripted job actions that record what the runner asked for.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;
use trellis_core::{Error, JobDescriptor, Result, RunContext, StepDescriptor, StepKind};
use trellis_runner::JobActions;

/// One call observed by [`RecordingActions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub job: usize,
    pub step: StepKind,
}

/// [`JobActions`] double. Steps succeed unless scripted to fail; exported
/// cache blobs are the job's display name.
#[derive(Default)]
pub struct RecordingActions {
    failures: BTreeSet<(usize, StepKind)>,
    delay: Option<Duration>,
    invocations: Mutex<Vec<Invocation>>,
    imported: Mutex<BTreeMap<usize, Vec<u8>>>,
    exports: Mutex<usize>,
}

impl RecordingActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `step` of job `job` fail.
    pub fn fail_on(mut self, job: usize, step: StepKind) -> Self {
        self.failures.insert((job, step));
        self
    }

    /// Sleep this long inside every step.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Steps run for one job, in order.
    pub fn steps_of(&self, job: usize) -> Vec<StepKind> {
        self.invocations()
            .into_iter()
            .filter(|i| i.job == job)
            .map(|i| i.step)
            .collect()
    }

    /// Jobs that ran at least one step.
    pub fn jobs_started(&self) -> BTreeSet<usize> {
        self.invocations().into_iter().map(|i| i.job).collect()
    }

    /// Blob restored into a job, if any.
    pub fn imported(&self, job: usize) -> Option<Vec<u8>> {
        self.imported.lock().ok()?.get(&job).cloned()
    }

    pub fn export_count(&self) -> usize {
        self.exports.lock().map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl JobActions for RecordingActions {
    async fn run_step(&self, step: &StepDescriptor, job: &JobDescriptor, _ctx: &RunContext) -> Result<()> {
        if let Ok(mut invocations) = self.invocations.lock() {
            invocations.push(Invocation {
                job: job.index,
                step: step.kind,
            });
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failures.contains(&(job.index, step.kind)) {
            return Err(Error::ActionFailed(format!("{} failed for {}", step.kind, job.display_name)));
        }
        Ok(())
    }

    async fn export_cache(&self, job: &JobDescriptor) -> Result<Vec<u8>> {
        if let Ok(mut exports) = self.exports.lock() {
            *exports += 1;
        }
        Ok(job.display_name.clone().into_bytes())
    }

    async fn import_cache(&self, job: &JobDescriptor, blob: &[u8]) -> Result<()> {
        if let Ok(mut imported) = self.imported.lock() {
            imported.insert(job.index, blob.to_vec());
        }
        Ok(())
    }
}
