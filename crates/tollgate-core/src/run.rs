//! Run and execution types.
//!
//! A `PipelineRun` is one invocation of a pipeline for one matched event; it
//! owns a `JobRun` per declared job. Both serialize to the structured report.

use crate::events::TriggerEvent;
use crate::ids::{JobRunId, RunId};
use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Succeeded | PipelineStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Errored,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Errored | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Succeeded,
    Failed,
    Errored,
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub stream: LogStream,
    pub content: String,
}

/// Per-step record retained for reporting regardless of outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub name: String,
    pub kind: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub output: Vec<OutputLine>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StepRecord {
    pub fn pending(index: usize, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            kind: kind.into(),
            status: StepStatus::Pending,
            exit_code: None,
            output: Vec::new(),
            error: None,
            duration_ms: 0,
        }
    }
}

/// Result of running a job's steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    /// A step ran and reported a failing status.
    Failed {
        step_index: usize,
        exit_code: Option<i32>,
    },
    /// A step could not be invoked at all.
    Errored { step_index: usize, message: String },
    Cancelled { step_index: usize },
}

impl StepOutcome {
    pub fn job_status(&self) -> JobStatus {
        match self {
            StepOutcome::Succeeded => JobStatus::Succeeded,
            StepOutcome::Failed { .. } => JobStatus::Failed,
            StepOutcome::Errored { .. } => JobStatus::Errored,
            StepOutcome::Cancelled { .. } => JobStatus::Cancelled,
        }
    }

    pub fn failing_step(&self) -> Option<usize> {
        match self {
            StepOutcome::Succeeded => None,
            StepOutcome::Failed { step_index, .. }
            | StepOutcome::Errored { step_index, .. }
            | StepOutcome::Cancelled { step_index } => Some(*step_index),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: JobRunId,
    pub name: String,
    pub target: String,
    pub status: JobStatus,
    pub current_step: usize,
    pub steps: Vec<StepRecord>,
    /// Index of the step that ended the job, if any.
    pub failed_step: Option<usize>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl JobRun {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: JobRunId::new(),
            name: name.into(),
            target: target.into(),
            status: JobStatus::Pending,
            current_step: 0,
            steps: Vec::new(),
            failed_step: None,
            error: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn start(&mut self) {
        if self.status == JobStatus::Pending {
            self.status = JobStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    /// Record the step runner's outcome. Terminal jobs are left untouched.
    pub fn finish(&mut self, outcome: StepOutcome, steps: Vec<StepRecord>) {
        if self.status.is_terminal() {
            return;
        }
        self.failed_step = outcome.failing_step();
        self.current_step = self.failed_step.unwrap_or(steps.len());
        if let StepOutcome::Errored { message, .. } = &outcome {
            self.error = Some(message.clone());
        }
        self.steps = steps;
        self.complete(outcome.job_status());
    }

    /// Mark the job as errored before or around step execution.
    pub fn errored(&mut self, message: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.error = Some(message.into());
        self.complete(JobStatus::Errored);
    }

    pub fn cancelled(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.complete(JobStatus::Cancelled);
    }

    /// The job's failure expressed in the error taxonomy, if it did not succeed.
    pub fn failure(&self) -> Option<Error> {
        let step_name = |idx: usize| {
            self.steps
                .get(idx)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| format!("#{}", idx))
        };
        match (self.status, self.failed_step) {
            (JobStatus::Failed, Some(idx)) => Some(Error::StepFailed {
                step: step_name(idx),
                exit_code: self.steps.get(idx).and_then(|s| s.exit_code),
            }),
            (JobStatus::Errored, Some(idx)) => Some(Error::StepError {
                step: step_name(idx),
                message: self.error.clone().unwrap_or_default(),
            }),
            (JobStatus::Errored, None) => Some(Error::Environment(
                self.error.clone().unwrap_or_default(),
            )),
            (JobStatus::Cancelled, _) => Some(Error::Cancelled),
            (JobStatus::Failed, None) => Some(Error::Internal(
                self.error.clone().unwrap_or_else(|| "job failed".to_string()),
            )),
            _ => None,
        }
    }

    fn complete(&mut self, status: JobStatus) {
        let now = Utc::now();
        let started = *self.started_at.get_or_insert(now);
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - started).num_milliseconds().max(0) as u64);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub pipeline_name: String,
    pub event: TriggerEvent,
    pub status: PipelineStatus,
    pub jobs: Vec<JobRun>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl PipelineRun {
    pub fn new(pipeline_name: impl Into<String>, event: TriggerEvent) -> Self {
        Self {
            id: RunId::new(),
            pipeline_name: pipeline_name.into(),
            event,
            status: PipelineStatus::Pending,
            jobs: Vec::new(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn start(&mut self) {
        if self.status == PipelineStatus::Pending {
            self.status = PipelineStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    /// `Succeeded` iff every job succeeded.
    pub fn aggregate(&self) -> PipelineStatus {
        if !self.jobs.is_empty() && self.jobs.iter().all(|j| j.status == JobStatus::Succeeded) {
            PipelineStatus::Succeeded
        } else {
            PipelineStatus::Failed
        }
    }

    /// Store the job runs and move to the aggregated terminal status.
    pub fn complete(&mut self, jobs: Vec<JobRun>) {
        if self.status.is_terminal() {
            return;
        }
        self.jobs = jobs;
        let now = Utc::now();
        let started = *self.started_at.get_or_insert(now);
        self.status = self.aggregate();
        self.completed_at = Some(now);
        self.duration_ms = Some((now - started).num_milliseconds().max(0) as u64);
    }

    pub fn job(&self, name: &str) -> Option<&JobRun> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Process exit code for the invocation.
    pub fn exit_code(&self) -> i32 {
        if self.status == PipelineStatus::Succeeded {
            0
        } else {
            1
        }
    }
}
