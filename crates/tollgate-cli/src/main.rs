//! tollgate CLI entrypoint.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;
mod report;


use commands::{Commands, ConfigCommands};
use config::CliConfig;
use handlers::RunOptions;

#[derive(Parser)]
#[command(name = "tollgate")]
#[command(author, version, about = "Evaluate repository events and run CI pipelines locally", long_about = None)]
struct Cli {
    /// Log progress to stderr (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("✗").red(), e);
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn execute(command: Commands) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = CliConfig::load().unwrap_or_default();

    match command {
        Commands::Init { path } => handlers::init(&path)?,
        Commands::Validate { path } => handlers::validate(path.as_deref())?,
        Commands::Run {
            path,
            event,
            branch,
            json,
            keep_workspaces,
        } => {
            return handlers::run_pipeline(
                &config,
                RunOptions {
                    path,
                    event,
                    branch,
                    json,
                    keep_workspaces,
                },
            )
            .await;
        }
        Commands::Schema => handlers::schema()?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }

    Ok(ExitCode::SUCCESS)
}
