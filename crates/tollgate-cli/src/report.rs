//! Rendering of pipeline run reports.

use console::style;
use std::fmt::Write;
use tollgate_core::Result;
use tollgate_core::run::{JobRun, JobStatus, PipelineRun, PipelineStatus, StepStatus};

/// Lines of output shown for the step that ended a job.
const OUTPUT_TAIL: usize = 10;

/// Human-readable report.
pub fn render_table(run: &PipelineRun) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {} ({}) {}",
        style("Pipeline").bold(),
        style(&run.pipeline_name).bold(),
        run.event,
        style(run.id.short()).dim()
    );

    let width = run.jobs.iter().map(|j| j.name.len()).max().unwrap_or(0);
    for job in &run.jobs {
        render_job(&mut out, job, width);
    }

    let duration = format_duration(run.duration_ms);
    let _ = match run.status {
        PipelineStatus::Succeeded => writeln!(out, "\n{} {}", style("succeeded").green().bold(), duration),
        status => writeln!(
            out,
            "\n{} {}",
            style(format!("{:?}", status).to_lowercase()).red().bold(),
            duration
        ),
    };
    out
}

fn render_job(out: &mut String, job: &JobRun, width: usize) {
    let (marker, label) = match job.status {
        JobStatus::Succeeded => (style("✓").green(), style("succeeded").green()),
        JobStatus::Failed => (style("✗").red(), style("failed").red()),
        JobStatus::Errored => (style("!").red(), style("errored").red()),
        JobStatus::Cancelled => (style("-").yellow(), style("cancelled").yellow()),
        JobStatus::Pending | JobStatus::Running => (style("…").dim(), style("incomplete").dim()),
    };
    let _ = writeln!(
        out,
        "  {} {:<width$}  {:<10} {}",
        marker,
        job.name,
        label,
        format_duration(job.duration_ms),
        width = width
    );

    if let Some(failure) = job.failure() {
        let _ = writeln!(out, "      {}", style(failure).red());
    }

    for step in &job.steps {
        if matches!(step.status, StepStatus::Succeeded | StepStatus::Skipped) {
            continue;
        }
        if step.status == StepStatus::Failed {
            if let Some(error) = &step.error {
                let _ = writeln!(out, "      {}", error);
            }
        }

        let skip = step.output.len().saturating_sub(OUTPUT_TAIL);
        for line in step.output.iter().skip(skip) {
            let _ = writeln!(out, "      {} {}", style("|").dim(), line.content);
        }
    }
}

/// Machine-readable report.
pub fn render_json(run: &PipelineRun) -> Result<String> {
    Ok(serde_json::to_string_pretty(run)?)
}

fn format_duration(ms: Option<u64>) -> String {
    match ms {
        Some(ms) if ms >= 1000 => format!("{:.1}s", ms as f64 / 1000.0),
        Some(ms) => format!("{}ms", ms),
        None => String::new(),
    }
}
