//! Command handlers.

use crate::commands::ContextArgs;
use crate::config::{CliConfig, OutputFormat};
use crate::output;
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;
use trellis_cache::{CacheStore, FilesystemStore, hash_lockfile_path};
use trellis_core::pipeline::WorkflowDefinition;
use trellis_core::{Error, RunContext, RunReport, Secrets};
use trellis_runner::{OutputLine, OutputStream, ShellActions, WorkflowRun};
use trellis_scheduler::MatrixExpander;

type BoxResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Read and validate a workflow file.
pub fn load_workflow(path: &Path) -> BoxResult<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::WorkflowNotFound(format!("{}: {}", path.display(), e)))?;
    Ok(WorkflowDefinition::from_yaml(&content)?)
}

fn run_context(args: &ContextArgs, secrets: Secrets) -> RunContext {
    let ctx = RunContext::new(&args.os, &args.event, &args.branch).with_secrets(secrets);
    match &args.repository {
        Some(repository) => ctx.with_repository(repository),
        None => ctx,
    }
}

/// Read the named secrets from the process environment.
fn read_secrets(names: &[String]) -> BoxResult<Secrets> {
    let mut secrets = Secrets::new();
    for name in names {
        let value = std::env::var(name)
            .map_err(|_| format!("Secret {} is not set in the environment", name))?;
        secrets.insert(name, value);
    }
    Ok(secrets)
}

/// Validate a workflow configuration.
pub async fn validate(config: &CliConfig, path: Option<PathBuf>) -> BoxResult<()> {
    let path = config.workflow_path(path);
    let definition = load_workflow(&path)?;
    let expansion = MatrixExpander::new().expand(&definition.matrix, &definition.name)?;

    println!(
        "{} Workflow \"{}\" is valid",
        style("✓").green(),
        definition.name
    );
    println!("  Axes: {}", definition.matrix.axes.len());
    for (axis, values) in &definition.matrix.axes {
        println!("    - {} ({} values)", axis, values.len());
    }
    println!(
        "  Jobs: {} (fail_fast: {}, max_parallel: {})",
        expansion.jobs.len(),
        expansion.fail_fast,
        expansion
            .max_parallel
            .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
    );

    Ok(())
}

/// Show the resolved jobs of a workflow.
pub async fn expand(
    config: &CliConfig,
    path: Option<PathBuf>,
    context: &ContextArgs,
    format: Option<OutputFormat>,
) -> BoxResult<()> {
    let definition = load_workflow(&config.workflow_path(path))?;
    let ctx = run_context(context, Secrets::new());
    let jobs = trellis_runner::plan(&definition, &ctx)?;
    output::print_jobs(&jobs, format.unwrap_or(config.output_format))
}

/// Options of `trellis run` beyond the run context.
pub struct RunOptions {
    pub secrets: Vec<String>,
    pub job: Option<usize>,
    pub force: bool,
    pub workspace: Option<PathBuf>,
    pub no_cache: bool,
}

/// Run a workflow locally. Returns `None` when the workflow is not
/// triggered.
pub async fn run_workflow(
    config: &CliConfig,
    path: Option<PathBuf>,
    context: &ContextArgs,
    options: RunOptions,
) -> BoxResult<Option<RunReport>> {
    let definition = load_workflow(&config.workflow_path(path))?;
    let ctx = run_context(context, read_secrets(&options.secrets)?);
    let workspace = match options.workspace {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    println!(
        "\n{} Running workflow: {}",
        style("▶").cyan().bold(),
        style(&definition.name).bold()
    );
    println!(
        "  os: {}, event: {}, branch: {}\n",
        ctx.os, ctx.event, ctx.branch
    );

    let mut run = WorkflowRun::new(definition.clone())
        .with_job(options.job)
        .force(options.force);

    if let Some(cache) = definition.cache.as_ref().filter(|_| !options.no_cache) {
        match hash_lockfile_path(&workspace.join(&cache.lockfile)).await {
            Ok(hash) => {
                let store: Arc<dyn CacheStore> = Arc::new(FilesystemStore::new(config.cache_dir()?));
                run = run.with_cache(store, hash);
            }
            Err(e) => warn!(error = %e, "Running without dependency cache"),
        }
    }

    let (tx, mut rx) = mpsc::channel::<OutputLine>(256);
    let printer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let prefix = style(format!("[{}:{}]", line.job, line.step)).dim();
            match line.stream {
                OutputStream::Stdout => println!("{} {}", prefix, line.content),
                OutputStream::Stderr => eprintln!("{} {}", prefix, style(&line.content).yellow()),
            }
        }
    });

    let actions = Arc::new(ShellActions::from_workflow(&definition, &workspace).with_output(tx));
    let result = run.execute(&ctx, actions).await;
    let _ = printer.await;

    match result? {
        Some(report) => {
            output::print_report(&report, config.output_format)?;
            Ok(Some(report))
        }
        None => {
            println!(
                "{} Workflow not triggered by {} on {} (use --force to run anyway)",
                style("i").blue(),
                ctx.event,
                ctx.branch
            );
            Ok(None)
        }
    }
}

/// List cache entries.
pub async fn list_cache(config: &CliConfig, prefix: &str) -> BoxResult<()> {
    let store = FilesystemStore::new(config.cache_dir()?);
    let entries = store.list(prefix).await?;
    output::print_cache_entries(&entries, config.output_format)
}

/// Clear cache entries under a prefix.
pub async fn clear_cache(config: &CliConfig, prefix: &str) -> BoxResult<usize> {
    let store = FilesystemStore::new(config.cache_dir()?);
    let mut removed = 0;
    for entry in store.list(prefix).await? {
        if store.delete(&entry.key).await? {
            removed += 1;
        }
    }

    match prefix {
        "" => println!("{} Cleared {} cache entries", style("✓").green(), removed),
        p => println!(
            "{} Cleared {} cache entries with prefix {}",
            style("✓").green(),
            removed,
            style(p).bold()
        ),
    }
    Ok(removed)
}

/// Print the workflow JSON schema.
pub fn schema() -> BoxResult<()> {
    let schema = schemars::schema_for!(WorkflowDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> BoxResult<()> {
    println!("Current configuration:");
    match config.cache_dir() {
        Ok(dir) => println!("  cache_dir: {}", dir.display()),
        Err(_) => println!("  cache_dir: (not set)"),
    }
    println!("  output_format: {:?}", config.output_format);
    println!(
        "  default_workflow: {}",
        config.workflow_path(None).display()
    );

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(())
}

/// Set configuration.
pub fn set_config(key: &str, value: &str) -> BoxResult<()> {
    let mut config = CliConfig::load().unwrap_or_default();
    config.set(key, value)?;
    config.save()?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}
