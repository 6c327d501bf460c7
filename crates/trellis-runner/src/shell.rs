//! Shell-based job actions on the host.

use crate::interpolation::InterpolationContext;
use crate::runner::JobActions;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};
use trellis_core::gate::StepDescriptor;
use trellis_core::pipeline::{ArchiveCompression, CommandsConfig, WorkflowDefinition};
use trellis_core::secrets::Secrets;
use trellis_core::{Error, JobDescriptor, Result, RunContext, StepKind};

/// Output line from a step command.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub job: usize,
    pub step: StepKind,
    pub stream: OutputStream,
    /// Line content with secrets masked.
    pub content: String,
    pub line_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Output stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Runs the configured command templates with `sh -c` in the workspace.
pub struct ShellActions {
    commands: CommandsConfig,
    workspace: PathBuf,
    cache_paths: Vec<PathBuf>,
    compression: ArchiveCompression,
    output_tx: Option<mpsc::Sender<OutputLine>>,
}

impl ShellActions {
    pub fn new(commands: CommandsConfig, workspace: impl Into<PathBuf>) -> Self {
        Self {
            commands,
            workspace: workspace.into(),
            cache_paths: Vec::new(),
            compression: ArchiveCompression::default(),
            output_tx: None,
        }
    }

    pub fn from_workflow(definition: &WorkflowDefinition, workspace: impl Into<PathBuf>) -> Self {
        let mut actions = Self::new(definition.commands.clone(), workspace);
        if let Some(cache) = &definition.cache {
            actions.cache_paths = cache.paths.iter().map(PathBuf::from).collect();
            actions.compression = cache.compression;
        }
        actions
    }

    /// Forward every output line to `tx` in addition to logging it.
    pub fn with_output(mut self, tx: mpsc::Sender<OutputLine>) -> Self {
        self.output_tx = Some(tx);
        self
    }

    async fn execute_command(
        &self,
        command: &str,
        step: StepKind,
        job: &JobDescriptor,
        ctx: &RunContext,
        secrets: &Secrets,
    ) -> Result<()> {
        info!(
            job = %job.display_name,
            step = %step,
            command = %ctx.secrets.mask(command),
            workspace = %self.workspace.display(),
            "Executing shell command"
        );

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .envs(&job.env)
            .envs(secrets.iter())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ActionFailed(format!("failed to spawn process: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("stderr not captured".to_string()))?;

        let stdout_handle = tokio::spawn(stream_lines(
            stdout,
            OutputStream::Stdout,
            job.index,
            step,
            ctx.secrets.clone(),
            self.output_tx.clone(),
        ));
        let stderr_handle = tokio::spawn(stream_lines(
            stderr,
            OutputStream::Stderr,
            job.index,
            step,
            ctx.secrets.clone(),
            self.output_tx.clone(),
        ));

        let status = child.wait().await;

        let _ = stdout_handle.await;
        let _ = stderr_handle.await;

        let status = status.map_err(|e| Error::ActionFailed(format!("failed to wait for process: {}", e)))?;
        let exit_code = status.code().unwrap_or(-1);
        debug!(job = %job.display_name, step = %step, exit_code, "Command completed");

        if exit_code == 0 {
            Ok(())
        } else {
            Err(Error::StepFailed {
                exit_code,
                message: format!("{} exited with code {}", step, exit_code),
            })
        }
    }
}

async fn stream_lines<R: AsyncRead + Unpin>(
    reader: R,
    stream: OutputStream,
    job: usize,
    step: StepKind,
    secrets: Secrets,
    tx: Option<mpsc::Sender<OutputLine>>,
) {
    let mut lines = BufReader::new(reader).lines();
    let mut line_num = 0u32;

    while let Ok(Some(line)) = lines.next_line().await {
        line_num += 1;
        let content = secrets.mask(&line);
        debug!(job, step = %step, stream = ?stream, "{}", content);

        if let Some(tx) = &tx {
            let output = OutputLine {
                job,
                step,
                stream,
                content,
                line_number: line_num,
                timestamp: chrono::Utc::now(),
            };
            if tx.send(output).await.is_err() {
                break;
            }
        }
    }
}

#[async_trait]
impl JobActions for ShellActions {
    async fn run_step(&self, step: &StepDescriptor, job: &JobDescriptor, ctx: &RunContext) -> Result<()> {
        let Some(template) = self.commands.for_step(step.kind) else {
            debug!(job = %job.display_name, step = %step.kind, "No command configured");
            return Ok(());
        };

        // Only the deploy action receives secrets.
        let secrets = if step.kind == StepKind::DeployDocs {
            ctx.secrets.clone()
        } else {
            Secrets::new()
        };

        let command = InterpolationContext::for_job(job)
            .with_secrets(secrets.clone())
            .interpolate(template);

        self.execute_command(&command, step.kind, job, ctx, &secrets).await
    }

    async fn export_cache(&self, job: &JobDescriptor) -> Result<Vec<u8>> {
        if self.cache_paths.is_empty() {
            return Err(Error::CacheWriteFailed("no cache paths configured".to_string()));
        }
        debug!(job = %job.display_name, paths = self.cache_paths.len(), "Packing cache");

        let paths = self.cache_paths.clone();
        let workspace = self.workspace.clone();
        let compression = self.compression;
        tokio::task::spawn_blocking(move || trellis_cache::pack(&paths, &workspace, compression))
            .await
            .map_err(|e| Error::Internal(format!("cache pack task failed: {}", e)))?
    }

    async fn import_cache(&self, job: &JobDescriptor, blob: &[u8]) -> Result<()> {
        debug!(job = %job.display_name, bytes = blob.len(), "Unpacking cache");

        let blob = blob.to_vec();
        let workspace = self.workspace.clone();
        let compression = self.compression;
        tokio::task::spawn_blocking(move || trellis_cache::unpack(&blob, &workspace, compression))
            .await
            .map_err(|e| Error::Internal(format!("cache unpack task failed: {}", e)))?
    }
}
