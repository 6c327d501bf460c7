//! Trellis CLI entrypoint.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;
mod output;


use commands::{CacheCommands, Commands, ConfigCommands};
use config::CliConfig;

#[derive(Parser)]
#[command(name = "trellis")]
#[command(author, version, about = "Trellis matrix CI runner", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = CliConfig::load().unwrap_or_default();

    match cli.command {
        Commands::Validate { path } => handlers::validate(&config, path).await?,
        Commands::Expand {
            path,
            context,
            format,
        } => handlers::expand(&config, path, &context, format).await?,
        Commands::Run {
            path,
            context,
            secrets,
            job,
            force,
            workspace,
            no_cache,
        } => {
            let options = handlers::RunOptions {
                secrets,
                job,
                force,
                workspace,
                no_cache,
            };
            let report = handlers::run_workflow(&config, path, &context, options).await?;
            if report.is_some_and(|r| !r.success) {
                return Err("run failed".into());
            }
        }
        Commands::Schema => handlers::schema()?,
        Commands::Cache { command } => match command {
            CacheCommands::List { prefix } => handlers::list_cache(&config, &prefix).await?,
            CacheCommands::Clear { prefix } => {
                handlers::clear_cache(&config, &prefix).await?;
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }

    Ok(())
}
