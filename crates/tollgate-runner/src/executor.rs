//! Job execution logic.

use crate::lease::EnvironmentLease;
use crate::runner::StepRunner;
use crate::shell::env_keys;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tollgate_core::events::TriggerEvent;
use tollgate_core::ids::RunId;
use tollgate_core::pipeline::JobSpec;
use tollgate_core::ports::{EnvironmentProvider, StepContext};
use tollgate_core::run::{JobRun, JobStatus};
use tracing::{Instrument, error, info, info_span, warn};

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Per-step time limit, unless the job sets `timeout-minutes`.
    pub step_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            step_timeout: Some(Duration::from_secs(30 * 60)),
        }
    }
}

/// Per-run information passed to every job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub run_id: RunId,
    pub event: TriggerEvent,
}

/// Executes one job in its own environment.
pub struct JobExecutor {
    provider: Arc<dyn EnvironmentProvider>,
    steps: Arc<StepRunner>,
    config: ExecutorConfig,
}

impl JobExecutor {
    pub fn new(
        provider: Arc<dyn EnvironmentProvider>,
        steps: StepRunner,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            provider,
            steps: Arc::new(steps),
            config,
        }
    }

    /// Execute a job: lease an environment, run its steps and release the
    /// environment on every path.
    ///
    /// Never fails; every outcome is reflected in the returned `JobRun`.
    pub async fn execute(
        &self,
        job: &JobSpec,
        ctx: &JobContext,
        mut cancel: watch::Receiver<bool>,
    ) -> JobRun {
        let mut run = JobRun::new(&job.name, &job.target);
        run.start();

        info!(
            run_id = %ctx.run_id,
            job = %job.name,
            target = %job.target,
            "Starting job execution"
        );

        if *cancel.borrow() {
            info!(job = %job.name, "Job cancelled before an environment was acquired");
            run.cancelled();
            return run;
        }

        let lease = EnvironmentLease::acquire(self.provider.clone(), &job.target, &job.name).await;
        let lease = match lease {
            Ok(lease) => lease,
            Err(e) => {
                error!(job = %job.name, error = %e, "Failed to acquire environment");
                run.errored(e.to_string());
                return run;
            }
        };

        let step_ctx = StepContext {
            handle: lease.handle().clone(),
            env: self.job_env(job, ctx, lease.handle().workspace.display().to_string()),
            timeout: job
                .timeout_minutes
                .map(|m| Duration::from_secs(u64::from(m) * 60))
                .or(self.config.step_timeout),
        };
        info!(
            job = %job.name,
            environment = %step_ctx.handle.id,
            env = %env_keys(&step_ctx.env),
            "Environment ready"
        );

        let runner = self.steps.clone();
        let steps = job.steps.clone();
        let span = info_span!("steps", job = %job.name);
        let task = tokio::spawn(
            async move { runner.run(&steps, &step_ctx, &mut cancel).await }.instrument(span),
        );

        match task.await {
            Ok(report) => run.finish(report.outcome, report.records),
            Err(e) => {
                error!(job = %job.name, error = %e, "Step runner crashed");
                run.errored(format!("step runner crashed: {}", e));
            }
        }

        if let Err(e) = lease.release().await {
            warn!(job = %job.name, error = %e, "Environment teardown failed");
        }

        match run.status {
            JobStatus::Succeeded => info!(
                job = %job.name,
                duration_ms = run.duration_ms.unwrap_or_default(),
                "Job succeeded"
            ),
            status => warn!(
                job = %job.name,
                status = ?status,
                failed_step = ?run.failed_step,
                error = ?run.error,
                "Job did not succeed"
            ),
        }

        run
    }

    /// Build the job's environment: built-in variables first, then the job's
    /// declared variables on top.
    fn job_env(&self, job: &JobSpec, ctx: &JobContext, workspace: String) -> BTreeMap<String, String> {
        let mut env = BTreeMap::from([
            ("CI".to_string(), "true".to_string()),
            ("TOLLGATE_RUN_ID".to_string(), ctx.run_id.to_string()),
            ("TOLLGATE_EVENT".to_string(), ctx.event.kind.to_string()),
            ("TOLLGATE_BRANCH".to_string(), ctx.event.branch.clone()),
            ("TOLLGATE_JOB".to_string(), job.name.clone()),
            ("TOLLGATE_WORKSPACE".to_string(), workspace),
        ]);
        env.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}
