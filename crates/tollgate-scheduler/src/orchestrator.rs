//! Pipeline orchestration: one concurrent job task per declared job.

use crate::triggers::TriggerMatcher;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tollgate_core::events::TriggerEvent;
use tollgate_core::ids::RunId;
use tollgate_core::pipeline::PipelineSpec;
use tollgate_core::run::{JobRun, PipelineRun};
use tollgate_core::{Error, Result};
use tollgate_runner::{JobContext, JobExecutor};
use tracing::{Instrument, error, info, info_span, warn};

/// Result of dispatching an event.
#[derive(Debug)]
pub enum Dispatch {
    /// The event did not satisfy the trigger; nothing was started.
    NoMatch,
    Completed(PipelineRun),
}

/// Requests cancellation of a pipeline run. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RunCanceller {
    tx: Arc<watch::Sender<bool>>,
}

impl RunCanceller {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A pipeline run in flight.
pub struct RunHandle {
    id: RunId,
    canceller: RunCanceller,
    task: JoinHandle<PipelineRun>,
}

impl RunHandle {
    pub fn id(&self) -> RunId {
        self.id
    }

    /// Cancel every still-running job of this run.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn canceller(&self) -> RunCanceller {
        self.canceller.clone()
    }

    /// Wait for every job to reach a terminal state.
    pub async fn wait(self) -> Result<PipelineRun> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("pipeline task failed: {}", e)))
    }
}

struct ActiveRun {
    id: RunId,
    canceller: RunCanceller,
}

/// Evaluates events against one pipeline and runs its jobs.
pub struct Orchestrator {
    spec: Arc<PipelineSpec>,
    executor: Arc<JobExecutor>,
    matcher: TriggerMatcher,
    /// In-flight runs by branch, tracked when superseding is enabled.
    active: Arc<Mutex<HashMap<String, ActiveRun>>>,
}

impl Orchestrator {
    pub fn new(spec: PipelineSpec, executor: JobExecutor) -> Self {
        Self {
            spec: Arc::new(spec),
            executor: Arc::new(executor),
            matcher: TriggerMatcher::new(),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    /// Run the pipeline for `event` to completion.
    pub async fn dispatch(&self, event: TriggerEvent) -> Result<Dispatch> {
        match self.start(event).await {
            Some(handle) => Ok(Dispatch::Completed(handle.wait().await?)),
            None => Ok(Dispatch::NoMatch),
        }
    }

    /// Start the pipeline for `event` without waiting for it.
    ///
    /// Returns `None` when the event does not match the trigger. When the
    /// pipeline cancels in-progress runs, any run still active for the same
    /// branch is cancelled first.
    pub async fn start(&self, event: TriggerEvent) -> Option<RunHandle> {
        if !self.matcher.matches(&event, &self.spec.trigger) {
            info!(pipeline = %self.spec.name, event = %event, "Event does not match trigger");
            return None;
        }

        let run = PipelineRun::new(&self.spec.name, event.clone());
        let id = run.id;
        let (tx, rx) = watch::channel(false);
        let canceller = RunCanceller { tx: Arc::new(tx) };

        if self.spec.cancel_in_progress {
            let previous = self.active.lock().await.insert(
                event.branch.clone(),
                ActiveRun {
                    id,
                    canceller: canceller.clone(),
                },
            );
            if let Some(previous) = previous {
                info!(run_id = %previous.id, superseded_by = %id, "Cancelling superseded run");
                previous.canceller.cancel();
            }
        }

        let spec = self.spec.clone();
        let executor = self.executor.clone();
        let active = self.active.clone();
        let span = info_span!("pipeline", run_id = %id, pipeline = %spec.name, event = %event);
        let task = tokio::spawn(
            async move {
                let run = execute_run(spec.clone(), executor, run, rx).await;
                if spec.cancel_in_progress {
                    let mut active = active.lock().await;
                    if active.get(&event.branch).is_some_and(|a| a.id == id) {
                        active.remove(&event.branch);
                    }
                }
                run
            }
            .instrument(span),
        );

        Some(RunHandle {
            id,
            canceller,
            task,
        })
    }
}

async fn execute_run(
    spec: Arc<PipelineSpec>,
    executor: Arc<JobExecutor>,
    mut run: PipelineRun,
    cancel: watch::Receiver<bool>,
) -> PipelineRun {
    run.start();
    info!(run_id = %run.id, jobs = spec.jobs.len(), "Starting pipeline run");

    let ctx = JobContext {
        run_id: run.id,
        event: run.event.clone(),
    };

    let mut set = JoinSet::new();
    for index in 0..spec.jobs.len() {
        let spec = spec.clone();
        let executor = executor.clone();
        let ctx = ctx.clone();
        let cancel = cancel.clone();
        let span = info_span!("job", job = %spec.jobs[index].name);
        set.spawn(
            async move {
                let job = &spec.jobs[index];
                (index, executor.execute(job, &ctx, cancel).await)
            }
            .instrument(span),
        );
    }

    let mut slots: Vec<Option<JobRun>> = vec![None; spec.jobs.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, job_run)) => slots[index] = Some(job_run),
            Err(e) => error!(run_id = %run.id, error = %e, "Job task failed"),
        }
    }

    let jobs = slots
        .into_iter()
        .zip(spec.jobs.iter())
        .map(|(slot, job)| {
            slot.unwrap_or_else(|| {
                let mut lost = JobRun::new(&job.name, &job.target);
                lost.start();
                lost.errored("job task terminated unexpectedly");
                lost
            })
        })
        .collect();
    run.complete(jobs);

    if run.exit_code() == 0 {
        info!(run_id = %run.id, status = ?run.status, "Pipeline run finished");
    } else {
        warn!(run_id = %run.id, status = ?run.status, "Pipeline run finished");
    }
    run
}
