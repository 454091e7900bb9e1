//! Pipeline definition types.
//!
//! Two layers live here: the document types mirror the user-authored YAML
//! one-to-one, and the spec types are the validated, immutable form the
//! matcher and orchestrator work with. `PipelineSpec::from_yaml` is the only
//! way from the first to the second.

use crate::events::EventKind;
use crate::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Pipeline document as written in the YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineDocument {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "on")]
    pub on: BTreeMap<EventKind, BranchFilter>,
    #[serde(default)]
    pub concurrency: Option<ConcurrencyDocument>,
    #[serde(default)]
    #[schemars(with = "BTreeMap<String, String>")]
    pub env: BTreeMap<String, serde_yaml::Value>,
    /// Jobs keyed by name, kept as a mapping so declaration order survives.
    #[schemars(with = "BTreeMap<String, JobDocument>")]
    pub jobs: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct BranchFilter {
    #[serde(default)]
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct ConcurrencyDocument {
    #[serde(default)]
    pub cancel_in_progress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub struct JobDocument {
    pub runs_on: String,
    #[serde(default)]
    #[schemars(with = "BTreeMap<String, String>")]
    pub env: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
    #[serde(default)]
    pub steps: Vec<StepDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepDocument {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    #[schemars(with = "BTreeMap<String, String>")]
    pub with: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub run: Option<String>,
}

/// Event kinds mapped to the branch patterns that trigger the pipeline.
///
/// A kind registered with no patterns never matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
    branches: BTreeMap<EventKind, Vec<String>>,
}

impl TriggerSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `patterns` for `kind`, replacing any previous set.
    pub fn with(mut self, kind: EventKind, patterns: &[&str]) -> Self {
        self.branches
            .insert(kind, patterns.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Patterns registered for `kind`, or `None` when the kind is absent.
    pub fn patterns(&self, kind: EventKind) -> Option<&[String]> {
        self.branches.get(&kind).map(Vec::as_slice)
    }

    pub fn kinds(&self) -> impl Iterator<Item = EventKind> + '_ {
        self.branches.keys().copied()
    }
}

/// One unit of work inside a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// An opaque toolchain action such as `actions/checkout@v2`.
    ToolchainAction {
        name: String,
        action: String,
        params: BTreeMap<String, String>,
    },
    /// A script handed to the job's shell.
    ShellCommand { name: String, run: String },
}

impl Step {
    pub fn action(action: impl Into<String>, params: &[(&str, &str)]) -> Self {
        let action = action.into();
        Step::ToolchainAction {
            name: action.clone(),
            action,
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn shell(run: impl Into<String>) -> Self {
        let run = run.into();
        Step::ShellCommand {
            name: default_run_name(&run),
            run,
        }
    }

    pub fn named(self, name: impl Into<String>) -> Self {
        let name = name.into();
        match self {
            Step::ToolchainAction { action, params, .. } => Step::ToolchainAction {
                name,
                action,
                params,
            },
            Step::ShellCommand { run, .. } => Step::ShellCommand { name, run },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Step::ToolchainAction { name, .. } | Step::ShellCommand { name, .. } => name,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Step::ToolchainAction { .. } => "action",
            Step::ShellCommand { .. } => "shell",
        }
    }
}

fn default_run_name(run: &str) -> String {
    run.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("run")
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    /// Execution environment label (`runs-on`).
    pub target: String,
    pub env: BTreeMap<String, String>,
    pub steps: Vec<Step>,
    /// Per-step timeout override for this job.
    pub timeout_minutes: Option<u32>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, target: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            env: BTreeMap::new(),
            steps,
            timeout_minutes: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Validated pipeline definition. Created once at load time, read-only after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub name: String,
    pub trigger: TriggerSpec,
    pub jobs: Vec<JobSpec>,
    /// Starting a run for a branch cancels the in-flight run for that branch.
    pub cancel_in_progress: bool,
}

impl PipelineSpec {
    pub fn new(name: impl Into<String>, trigger: TriggerSpec, jobs: Vec<JobSpec>) -> Self {
        Self {
            name: name.into(),
            trigger,
            jobs,
            cancel_in_progress: false,
        }
    }

    /// Read and validate a pipeline file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a pipeline document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let document: PipelineDocument = serde_yaml::from_str(content)?;
        Self::from_document(document)
    }

    pub fn from_document(document: PipelineDocument) -> Result<Self> {
        if document.on.is_empty() {
            return Err(invalid("'on' must declare at least one event"));
        }

        let mut trigger = TriggerSpec::new();
        for (kind, filter) in document.on {
            let branches: Vec<String> = filter
                .branches
                .into_iter()
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty())
                .collect();
            if branches.is_empty() {
                return Err(invalid(format!("trigger '{}' references zero branches", kind)));
            }
            trigger.branches.insert(kind, branches);
        }

        if document.jobs.is_empty() {
            return Err(invalid("pipeline declares zero jobs"));
        }

        let pipeline_env = scalar_map(document.env, "env")?;

        let mut jobs = Vec::with_capacity(document.jobs.len());
        for (key, value) in document.jobs {
            let name = key
                .as_str()
                .ok_or_else(|| invalid("job names must be strings"))?
                .to_string();
            let job: JobDocument = serde_yaml::from_value(value)
                .map_err(|e| invalid(format!("job '{}': {}", name, e)))?;
            jobs.push(build_job(name, job, &pipeline_env)?);
        }

        Ok(Self {
            name: document.name.unwrap_or_else(|| "pipeline".to_string()),
            trigger,
            jobs,
            cancel_in_progress: document
                .concurrency
                .map(|c| c.cancel_in_progress)
                .unwrap_or(false),
        })
    }

    pub fn job(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

fn build_job(
    name: String,
    job: JobDocument,
    pipeline_env: &BTreeMap<String, String>,
) -> Result<JobSpec> {
    if job.runs_on.trim().is_empty() {
        return Err(invalid(format!("job '{}' has an empty 'runs-on'", name)));
    }
    if job.steps.is_empty() {
        return Err(invalid(format!("job '{}' declares zero steps", name)));
    }

    let mut env = pipeline_env.clone();
    env.extend(scalar_map(job.env, &format!("jobs.{}.env", name))?);

    let steps = job
        .steps
        .into_iter()
        .enumerate()
        .map(|(idx, step)| build_step(&name, idx, step))
        .collect::<Result<Vec<_>>>()?;

    Ok(JobSpec {
        name,
        target: job.runs_on.trim().to_string(),
        env,
        steps,
        timeout_minutes: job.timeout_minutes,
    })
}

fn build_step(job: &str, idx: usize, step: StepDocument) -> Result<Step> {
    let location = format!("jobs.{}.steps[{}]", job, idx);
    let built = match (step.uses, step.run) {
        (Some(uses), None) => {
            let action = uses.trim().to_string();
            if action.is_empty() {
                return Err(invalid(format!("{}: 'uses' is empty", location)));
            }
            Step::ToolchainAction {
                name: action.clone(),
                action,
                params: scalar_map(step.with, &format!("{}.with", location))?,
            }
        }
        (None, Some(run)) => {
            if run.trim().is_empty() {
                return Err(invalid(format!("{}: 'run' is empty", location)));
            }
            Step::shell(run)
        }
        (Some(_), Some(_)) => {
            return Err(invalid(format!(
                "{}: a step takes either 'uses' or 'run', not both",
                location
            )));
        }
        (None, None) => {
            return Err(invalid(format!("{}: a step needs 'uses' or 'run'", location)));
        }
    };

    Ok(match step.name {
        Some(name) if !name.trim().is_empty() => built.named(name.trim()),
        _ => built,
    })
}

fn scalar_map(
    values: BTreeMap<String, serde_yaml::Value>,
    location: &str,
) -> Result<BTreeMap<String, String>> {
    values
        .into_iter()
        .map(|(key, value)| {
            let rendered = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Null => String::new(),
                _ => {
                    return Err(invalid(format!(
                        "{}.{} must be a scalar value",
                        location, key
                    )));
                }
            };
            Ok((key, rendered))
        })
        .collect()
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidSpec(reason.into())
}
