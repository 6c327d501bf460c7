//! CLI command definitions.

use crate::config::OutputFormat;
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a workflow file and its matrix
    Validate {
        /// Path to workflow file
        path: Option<PathBuf>,
    },

    /// Show the jobs a workflow expands to
    Expand {
        /// Path to workflow file
        path: Option<PathBuf>,

        #[command(flatten)]
        context: ContextArgs,

        /// Output format (defaults to the configured one)
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Run a workflow locally
    Run {
        /// Path to workflow file
        path: Option<PathBuf>,

        #[command(flatten)]
        context: ContextArgs,

        /// Secret to pass to the deploy action, read from the environment
        #[arg(long = "secret", value_name = "NAME")]
        secrets: Vec<String>,

        /// Run only the job with this index
        #[arg(short, long)]
        job: Option<usize>,

        /// Run even when no trigger matches
        #[arg(long)]
        force: bool,

        /// Workspace directory (defaults to the current directory)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Do not restore or save the dependency cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Print the JSON schema of the workflow file
    Schema,

    /// Manage the dependency cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Facts about the invocation, normally supplied by the CI platform.
#[derive(Args, Debug, Clone)]
pub struct ContextArgs {
    /// Runner OS identifier, used for jobs without an OS axis
    #[arg(long, default_value = std::env::consts::OS)]
    pub os: String,

    /// Trigger event (push, pull_request, schedule, workflow_dispatch)
    #[arg(long, default_value = "push")]
    pub event: String,

    /// Branch being built
    #[arg(long, default_value = "master")]
    pub branch: String,

    /// Repository identifier (owner/name)
    #[arg(long)]
    pub repository: Option<String>,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// List cache entries
    List {
        /// Cache key prefix
        #[arg(short, long, default_value = "")]
        prefix: String,
    },

    /// Clear cache
    Clear {
        /// Cache key prefix
        #[arg(short, long, default_value = "")]
        prefix: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
