//! Command handlers.

use crate::config::{CliConfig, OutputFormat};
use crate::report;
use console::style;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tollgate_core::events::{EventKind, TriggerEvent};
use tollgate_core::pipeline::{PipelineDocument, PipelineSpec};
use tollgate_core::run::PipelineRun;
use tollgate_runner::{
    ActionRegistry, CheckoutAction, ExecutorConfig, HostEnvironmentConfig,
    HostEnvironmentProvider, JobExecutor, ShellRunner, StepRunner,
};
use tollgate_scheduler::Orchestrator;
use tracing::info;

const PIPELINE_CANDIDATES: &[&str] = &[
    "tollgate.yaml",
    "tollgate.yml",
    ".github/workflows/ci.yml",
    ".github/workflows/ci.yaml",
    ".github/workflows/rust.yml",
];

const TEMPLATE: &str = r#"name: CI

on:
  push:
    branches: [main]
  pull_request:
    branches: [main]

env:
  CARGO_TERM_COLOR: always

jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - uses: actions-rs/toolchain@v1
        with:
          toolchain: stable
      - uses: actions/checkout@v2
      - name: Run tests
        run: cargo test

  rustfmt:
    runs-on: ubuntu-latest
    steps:
      - uses: actions-rs/toolchain@v1
        with:
          toolchain: stable
          components: rustfmt
      - uses: actions/checkout@v2
      - run: cargo fmt -- --check
"#;

/// Write a starter pipeline.
pub fn init(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = Path::new(path);

    if path.exists() {
        println!("{} {} already exists", style("!").yellow(), path.display());
        return Ok(());
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, TEMPLATE)?;
    println!("{} Created {}", style("✓").green(), path.display());
    Ok(())
}

/// Locate the pipeline file: the given path, or the first standard location
/// that exists.
pub fn find_pipeline_file(path: Option<&str>) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(p) = path {
        let path = PathBuf::from(p);
        if path.exists() {
            return Ok(path);
        }
        return Err(format!("pipeline file not found: {}", p).into());
    }

    PIPELINE_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or_else(|| {
            format!(
                "no pipeline file found (looked for {})",
                PIPELINE_CANDIDATES.join(", ")
            )
            .into()
        })
}

/// Validate a pipeline file.
pub fn validate(path: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let path = find_pipeline_file(path)?;
    let spec = PipelineSpec::load(&path)?;

    println!(
        "{} Pipeline \"{}\" is valid ({})",
        style("✓").green(),
        spec.name,
        path.display()
    );
    for kind in spec.trigger.kinds() {
        let patterns = spec.trigger.patterns(kind).unwrap_or_default();
        println!("  on {}: {}", kind, patterns.join(", "));
    }
    println!("  Jobs: {}", spec.jobs.len());
    for job in &spec.jobs {
        println!(
            "    - {} on {} ({} steps)",
            job.name,
            job.target,
            job.steps.len()
        );
    }

    Ok(())
}

/// Options for `run`.
pub struct RunOptions {
    pub path: Option<String>,
    pub event: EventKind,
    pub branch: String,
    pub json: bool,
    pub keep_workspaces: bool,
}

/// Evaluate an event and, on a match, run the pipeline and print its report.
pub async fn run_pipeline(
    config: &CliConfig,
    options: RunOptions,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let path = find_pipeline_file(options.path.as_deref())?;
    let spec = PipelineSpec::load(&path)?;
    let event = TriggerEvent::new(options.event, options.branch);
    let json = options.json || config.output_format == OutputFormat::Json;

    let orchestrator = build_orchestrator(config, spec, options.keep_workspaces);
    let Some(handle) = orchestrator.start(event.clone()).await else {
        if json {
            println!("{}", serde_json::json!({ "status": "no_match", "event": event }));
        } else {
            println!(
                "{} {} does not trigger \"{}\", nothing to run",
                style("i").blue(),
                event,
                orchestrator.spec().name
            );
        }
        return Ok(ExitCode::SUCCESS);
    };

    if !json {
        eprintln!(
            "{} Running {} for {} ({} jobs)",
            style("▶").cyan(),
            style(&orchestrator.spec().name).bold(),
            event,
            orchestrator.spec().jobs.len()
        );
    }

    let canceller = handle.canceller();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} Interrupted, cancelling run", style("!").yellow());
            canceller.cancel();
        }
    });
    let run = handle.wait().await;
    interrupt.abort();
    let run = run?;

    print_report(&run, json)?;
    Ok(ExitCode::from(run.exit_code() as u8))
}

fn print_report(run: &PipelineRun, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", report::render_json(run)?);
    } else {
        print!("{}", report::render_table(run));
    }
    Ok(())
}

/// Wire the host environment provider and built-in actions into an
/// orchestrator for `spec`.
pub fn build_orchestrator(config: &CliConfig, spec: PipelineSpec, keep_workspaces: bool) -> Orchestrator {
    let provider = HostEnvironmentProvider::new(HostEnvironmentConfig {
        root: config.workspace_root.clone(),
        labels: config.environments.clone(),
        keep_workspaces: keep_workspaces || config.keep_workspaces,
    });

    let repository = config.repository.clone().or_else(local_repository);
    info!(repository = ?repository, "Configured checkout source");
    let actions = ActionRegistry::with_builtins(CheckoutAction::new(repository));

    let executor = JobExecutor::new(
        Arc::new(provider),
        StepRunner::new(ShellRunner::default(), Arc::new(actions)),
        ExecutorConfig {
            step_timeout: config.step_timeout(),
        },
    );
    Orchestrator::new(spec, executor)
}

/// The current directory, when it is a git checkout.
fn local_repository() -> Option<String> {
    let cwd = std::env::current_dir().ok()?;
    cwd.join(".git")
        .exists()
        .then(|| cwd.display().to_string())
}

/// Print the pipeline file's JSON schema.
pub fn schema() -> Result<(), Box<dyn std::error::Error>> {
    let schema = schemars::schema_for!(PipelineDocument);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("Current configuration:");
    println!("  workspace_root: {}", config.workspace_root.display());
    println!(
        "  repository: {}",
        config.repository.as_deref().unwrap_or("(current directory)")
    );
    match config.step_timeout_minutes {
        0 => println!("  step_timeout_minutes: (none)"),
        minutes => println!("  step_timeout_minutes: {}", minutes),
    }
    println!("  environments: {}", config.environments.join(", "));
    println!("  keep_workspaces: {}", config.keep_workspaces);
    println!("  output_format: {:?}", config.output_format);

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(())
}

/// Set configuration.
pub fn set_config(key: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = CliConfig::load().unwrap_or_default();
    config.set(key, value)?;
    config.save()?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}
